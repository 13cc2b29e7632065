//! SQLite store: usage rows updated in IMMEDIATE transactions, history kept
//! as one JSON document per user. All database work runs on the blocking
//! pool, so callers' deadlines still apply while it waits.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parley_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::SessionStore;
use crate::context::HistoryRecord;
use crate::quota::{Limit, PlanTier, UsageRecord};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Durable store backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Usage row as stored; `NULL` limits mean unlimited.
struct UsageRow {
    tier: String,
    tokens_used: i64,
    tokens_limit: Option<i64>,
    assets_used: i64,
    assets_limit: Option<i64>,
    reset_date: String,
}

impl UsageRow {
    fn from_record(record: &UsageRecord) -> Self {
        Self {
            tier: record.tier.as_str().to_string(),
            tokens_used: to_sql_int(record.tokens_used),
            tokens_limit: record.tokens_limit.as_option().map(to_sql_int),
            assets_used: to_sql_int(record.assets_used),
            assets_limit: record.assets_limit.as_option().map(to_sql_int),
            reset_date: record.reset_date.format(DATE_FORMAT).to_string(),
        }
    }

    fn into_record(self) -> Result<UsageRecord> {
        let tier = PlanTier::parse(&self.tier)
            .ok_or_else(|| Error::Storage(format!("unknown plan tier '{}'", self.tier)))?;
        let reset_date = NaiveDate::parse_from_str(&self.reset_date, DATE_FORMAT)
            .map_err(|e| Error::Storage(format!("bad reset_date '{}': {e}", self.reset_date)))?;

        Ok(UsageRecord {
            tier,
            tokens_used: from_sql_int(self.tokens_used),
            tokens_limit: Limit::from_option(self.tokens_limit.map(from_sql_int)),
            assets_used: from_sql_int(self.assets_used),
            assets_limit: Limit::from_option(self.assets_limit.map(from_sql_int)),
            reset_date,
        })
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::init(conn)
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS usage (
                user_id TEXT PRIMARY KEY,
                tier TEXT NOT NULL,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                tokens_limit INTEGER,
                assets_used INTEGER NOT NULL DEFAULT 0,
                assets_limit INTEGER,
                reset_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS history (
                user_id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(storage_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_conn<R, Op>(&self, op: Op) -> Result<R>
    where
        Op: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| Error::Storage(format!("connection lock poisoned: {e}")))?;
            op(&mut conn)
        })
        .await
        .map_err(|e| Error::Storage(format!("blocking task failed: {e}")))?
    }

    fn read_usage(conn: &Connection, user_id: &str) -> Result<Option<UsageRecord>> {
        conn.query_row(
            r"
            SELECT tier, tokens_used, tokens_limit, assets_used, assets_limit, reset_date
            FROM usage WHERE user_id = ?1
            ",
            params![user_id],
            |row| {
                Ok(UsageRow {
                    tier: row.get(0)?,
                    tokens_used: row.get(1)?,
                    tokens_limit: row.get(2)?,
                    assets_used: row.get(3)?,
                    assets_limit: row.get(4)?,
                    reset_date: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(storage_err)?
        .map(UsageRow::into_record)
        .transpose()
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn update_usage<F, T>(&self, user_id: &str, fresh: UsageRecord, f: F) -> Result<T>
    where
        F: FnOnce(&mut UsageRecord) -> T + Send + 'static,
        T: Send + 'static,
    {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(storage_err)?;

            let mut record = Self::read_usage(&tx, &user_id)?.unwrap_or(fresh);
            let output = f(&mut record);
            let row = UsageRow::from_record(&record);

            tx.execute(
                r"
                INSERT INTO usage (user_id, tier, tokens_used, tokens_limit, assets_used, assets_limit, reset_date)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(user_id) DO UPDATE SET
                    tier = excluded.tier,
                    tokens_used = excluded.tokens_used,
                    tokens_limit = excluded.tokens_limit,
                    assets_used = excluded.assets_used,
                    assets_limit = excluded.assets_limit,
                    reset_date = excluded.reset_date
                ",
                params![
                    user_id,
                    row.tier,
                    row.tokens_used,
                    row.tokens_limit,
                    row.assets_used,
                    row.assets_limit,
                    row.reset_date
                ],
            )
            .map_err(storage_err)?;

            tx.commit().map_err(storage_err)?;
            Ok(output)
        })
        .await
    }

    async fn load_usage(&self, user_id: &str) -> Result<Option<UsageRecord>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| Self::read_usage(conn, &user_id))
            .await
    }

    async fn load_history(&self, user_id: &str) -> Result<HistoryRecord> {
        let user_id = user_id.to_string();
        let document: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT document FROM history WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)
            })
            .await?;

        match document {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(HistoryRecord::default()),
        }
    }

    async fn save_history(&self, user_id: &str, history: &HistoryRecord) -> Result<()> {
        let document = serde_json::to_string(history)?;
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                r"
                INSERT INTO history (user_id, document, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(user_id) DO UPDATE SET
                    document = excluded.document,
                    updated_at = excluded.updated_at
                ",
                params![user_id, document, Utc::now().to_rfc3339()],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Turn;
    use crate::quota::{QuotaEnforcer, UsageKind};
    use std::time::Duration;

    fn fresh() -> UsageRecord {
        QuotaEnforcer::default().new_record(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn test_usage_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .update_usage("u1", fresh(), |u| {
                    QuotaEnforcer::record(u, UsageKind::Tokens, 120);
                    QuotaEnforcer::record(u, UsageKind::Assets, 2);
                })
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let usage = store.load_usage("u1").await.unwrap().unwrap();
        assert_eq!(usage.tokens_used, 120);
        assert_eq!(usage.assets_used, 2);
        assert_eq!(usage.tier, PlanTier::Free);
        assert_eq!(usage.tokens_limit, Limit::Limited(10_000));
        assert_eq!(usage.reset_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[tokio::test]
    async fn test_unlimited_roundtrips_as_null() {
        let store = SqliteStore::in_memory().unwrap();
        let quota = QuotaEnforcer::default();
        store
            .update_usage("pro", fresh(), move |u| quota.set_plan(u, PlanTier::Pro))
            .await
            .unwrap();

        let usage = store.load_usage("pro").await.unwrap().unwrap();
        assert_eq!(usage.tokens_limit, Limit::Unlimited);
        assert_eq!(usage.assets_limit, Limit::Unlimited);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("race.db")).unwrap());

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .update_usage("u", fresh(), |u| {
                            QuotaEnforcer::record(u, UsageKind::Tokens, 7)
                        })
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.load_usage("u").await.unwrap().unwrap().tokens_used, 224);
    }

    #[tokio::test]
    async fn test_history_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.load_history("u").await.unwrap().is_empty());

        let mut history = HistoryRecord::default();
        history.turns.push(Turn::user("hello", Utc::now()));
        history.turns.push(Turn::assistant("hi", "m1", Utc::now()));
        store.save_history("u", &history).await.unwrap();
        assert_eq!(store.load_history("u").await.unwrap(), history);

        store
            .save_history("u", &HistoryRecord::default())
            .await
            .unwrap();
        assert!(store.load_history("u").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_busy_connection_leaves_deadline_to_caller() {
        let store = SqliteStore::in_memory().unwrap();
        let held = store.conn.lock().unwrap();

        let waited =
            tokio::time::timeout(Duration::from_millis(100), store.load_usage("u")).await;
        assert!(waited.is_err());

        drop(held);
        assert!(store.load_usage("u").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_tier_is_storage_error() {
        let store = SqliteStore::in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO usage (user_id, tier, reset_date) VALUES ('x', 'gold', '2024-01-01')",
                [],
            )
            .unwrap();
        }
        let err = store.load_usage("x").await.unwrap_err();
        assert!(err.is_storage());
    }
}
