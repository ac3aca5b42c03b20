//! In-memory storage

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::{Storage, StorageKey, StorageTier, StoreResult};

/// Storage that keeps both tiers in memory
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<(StorageTier, String), String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read, for assertions in tests
    pub fn peek(&self, key: StorageKey, tier: StorageTier) -> Option<String> {
        self.values().get(&(tier, key.qualified())).cloned()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<(StorageTier, String), String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: StorageKey, tier: StorageTier) -> StoreResult<Option<String>> {
        Ok(self.peek(key, tier))
    }

    async fn set(&self, key: StorageKey, value: &str, tier: StorageTier) -> StoreResult<()> {
        self.values()
            .insert((tier, key.qualified()), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: StorageKey, tier: StorageTier) -> StoreResult<()> {
        self.values().remove(&(tier, key.qualified()));
        Ok(())
    }
}
