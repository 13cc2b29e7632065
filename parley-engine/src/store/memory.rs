//! In-process store on `dashmap`; shard locks give per-key atomicity.

use async_trait::async_trait;
use dashmap::DashMap;
use parley_common::Result;

use super::SessionStore;
use crate::context::HistoryRecord;
use crate::quota::UsageRecord;

/// Volatile store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    usage: DashMap<String, UsageRecord>,
    history: DashMap<String, HistoryRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with a usage record.
    pub fn user_count(&self) -> usize {
        self.usage.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn update_usage<F, T>(&self, user_id: &str, fresh: UsageRecord, f: F) -> Result<T>
    where
        F: FnOnce(&mut UsageRecord) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut entry = self.usage.entry(user_id.to_string()).or_insert(fresh);
        Ok(f(entry.value_mut()))
    }

    async fn load_usage(&self, user_id: &str) -> Result<Option<UsageRecord>> {
        Ok(self.usage.get(user_id).map(|r| r.value().clone()))
    }

    async fn load_history(&self, user_id: &str) -> Result<HistoryRecord> {
        Ok(self
            .history
            .get(user_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn save_history(&self, user_id: &str, history: &HistoryRecord) -> Result<()> {
        self.history.insert(user_id.to_string(), history.clone());
        Ok(())
    }
}
