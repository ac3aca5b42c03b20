//! Store trait definitions

use async_trait::async_trait;
use tracing::debug;
use turnstile_util::{WEEK_MS, join_timestamps, parse_timestamps, prune_timestamps};

use crate::{StorageKey, StorageTier, StoreResult};

/// Async key/value storage with session and local tiers
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value
    async fn get(&self, key: StorageKey, tier: StorageTier) -> StoreResult<Option<String>>;

    /// Write a value
    async fn set(&self, key: StorageKey, value: &str, tier: StorageTier) -> StoreResult<()>;

    /// Delete a value
    async fn remove(&self, key: StorageKey, tier: StorageTier) -> StoreResult<()>;

    // Event logs

    /// Timestamps recorded under `key` within the last week, oldest first
    async fn get_event(&self, key: StorageKey, now_ms: i64) -> StoreResult<Vec<i64>> {
        let raw = self.get(key, StorageTier::Local).await?;
        let timestamps = raw.as_deref().map(parse_timestamps).unwrap_or_default();
        Ok(prune_timestamps(&timestamps, WEEK_MS, now_ms))
    }

    /// Append `now_ms` to the event log under `key`
    async fn store_event(&self, key: StorageKey, now_ms: i64) -> StoreResult<()> {
        let mut timestamps = self.get_event(key, now_ms).await?;
        timestamps.push(now_ms);
        debug!(key = %key, count = timestamps.len(), "Event stored");
        self.set(key, &join_timestamps(&timestamps), StorageTier::Local)
            .await
    }
}
