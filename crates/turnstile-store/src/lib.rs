//! Persistence layer for turnstile
//!
//! Provides:
//! - Async key/value storage with session and local tiers
//! - Event logs of pruned millisecond timestamps for frequency caps
//! - In-memory storage (tests, ephemeral runs)
//! - SQLite storage (local tier persisted across runs)

mod keys;
mod memory;
mod sqlite;
mod traits;

pub use keys::*;
pub use memory::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
