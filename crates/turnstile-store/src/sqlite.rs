//! SQLite-based storage implementation

use async_trait::async_trait;
use chrono::Local;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{Storage, StorageKey, StorageTier, StoreResult};

/// SQLite-backed storage.
///
/// The local tier lives in a `kv` table. The session tier is kept in memory
/// and dies with the process.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    session: Mutex<HashMap<String, String>>,
}

impl SqliteStorage {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            session: Mutex::new(HashMap::new()),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    /// Check if store is healthy
    pub fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, key: StorageKey, tier: StorageTier) -> StoreResult<Option<String>> {
        let qualified = key.qualified();
        match tier {
            StorageTier::Session => Ok(self.session().get(&qualified).cloned()),
            StorageTier::Local => {
                let conn = self.conn();
                let value: Option<String> = conn
                    .query_row("SELECT value FROM kv WHERE key = ?", [&qualified], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(value)
            }
        }
    }

    async fn set(&self, key: StorageKey, value: &str, tier: StorageTier) -> StoreResult<()> {
        let qualified = key.qualified();
        match tier {
            StorageTier::Session => {
                self.session().insert(qualified, value.to_string());
            }
            StorageTier::Local => {
                let conn = self.conn();
                conn.execute(
                    r#"
                    INSERT INTO kv (key, value, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(key)
                    DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                    "#,
                    params![qualified, value, Local::now().to_rfc3339()],
                )?;
            }
        }

        debug!(key = %key, ?tier, "Value stored");
        Ok(())
    }

    async fn remove(&self, key: StorageKey, tier: StorageTier) -> StoreResult<()> {
        let qualified = key.qualified();
        match tier {
            StorageTier::Session => {
                self.session().remove(&qualified);
            }
            StorageTier::Local => {
                let conn = self.conn();
                conn.execute("DELETE FROM kv WHERE key = ?", [&qualified])?;
            }
        }

        debug!(key = %key, ?tier, "Value removed");
        Ok(())
    }
}
