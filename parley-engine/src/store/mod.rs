//! Persistence for usage and history records.
//!
//! Both records are keyed by user identity. `update_usage` runs the caller's
//! closure inside the store's per-key critical section, which is what makes
//! reset-then-check and check-then-record free of lost updates.

mod memory;
mod sqlite;

use async_trait::async_trait;
use parley_common::{Result, StorageConfig};
use std::sync::Arc;

use crate::context::HistoryRecord;
use crate::quota::UsageRecord;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Per-user persistence contract.
///
/// `update_usage` closures are `'static` so backends may run them off the
/// async runtime.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomically read-modify-write a user's usage record.
    ///
    /// `fresh` is stored first if the user has no record yet.
    async fn update_usage<F, T>(&self, user_id: &str, fresh: UsageRecord, f: F) -> Result<T>
    where
        F: FnOnce(&mut UsageRecord) -> T + Send + 'static,
        T: Send + 'static;

    /// Read a usage record without creating it.
    async fn load_usage(&self, user_id: &str) -> Result<Option<UsageRecord>>;

    /// Read a user's history; unknown users get an empty one.
    async fn load_history(&self, user_id: &str) -> Result<HistoryRecord>;

    /// Replace a user's history.
    async fn save_history(&self, user_id: &str, history: &HistoryRecord) -> Result<()>;
}

#[async_trait]
impl<S: SessionStore> SessionStore for Arc<S> {
    async fn update_usage<F, T>(&self, user_id: &str, fresh: UsageRecord, f: F) -> Result<T>
    where
        F: FnOnce(&mut UsageRecord) -> T + Send + 'static,
        T: Send + 'static,
    {
        (**self).update_usage(user_id, fresh, f).await
    }

    async fn load_usage(&self, user_id: &str) -> Result<Option<UsageRecord>> {
        (**self).load_usage(user_id).await
    }

    async fn load_history(&self, user_id: &str) -> Result<HistoryRecord> {
        (**self).load_history(user_id).await
    }

    async fn save_history(&self, user_id: &str, history: &HistoryRecord) -> Result<()> {
        (**self).save_history(user_id, history).await
    }
}

/// Either backend, chosen from configuration.
pub enum ConfiguredStore {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl ConfiguredStore {
    /// Open the backend named by `storage.backend`.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        match config.backend.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory(MemoryStore::new())),
            "sqlite" => Ok(Self::Sqlite(SqliteStore::open(&config.resolved_path())?)),
            other => Err(parley_common::Error::Config(format!(
                "unknown storage backend '{other}'"
            ))),
        }
    }
}

#[async_trait]
impl SessionStore for ConfiguredStore {
    async fn update_usage<F, T>(&self, user_id: &str, fresh: UsageRecord, f: F) -> Result<T>
    where
        F: FnOnce(&mut UsageRecord) -> T + Send + 'static,
        T: Send + 'static,
    {
        match self {
            Self::Memory(store) => store.update_usage(user_id, fresh, f).await,
            Self::Sqlite(store) => store.update_usage(user_id, fresh, f).await,
        }
    }

    async fn load_usage(&self, user_id: &str) -> Result<Option<UsageRecord>> {
        match self {
            Self::Memory(store) => store.load_usage(user_id).await,
            Self::Sqlite(store) => store.load_usage(user_id).await,
        }
    }

    async fn load_history(&self, user_id: &str) -> Result<HistoryRecord> {
        match self {
            Self::Memory(store) => store.load_history(user_id).await,
            Self::Sqlite(store) => store.load_history(user_id).await,
        }
    }

    async fn save_history(&self, user_id: &str, history: &HistoryRecord) -> Result<()> {
        match self {
            Self::Memory(store) => store.save_history(user_id, history).await,
            Self::Sqlite(store) => store.save_history(user_id, history).await,
        }
    }
}
