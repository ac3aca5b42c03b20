//! Shared utilities for turnstile
//!
//! This crate provides:
//! - ID types (PublicationId, ProductId, PageViewId)
//! - Clock abstraction (system clock with mock time, manual clock for tests)
//! - Error types
//! - Sliding-window timestamp pruning for frequency caps
//! - Default paths for config and data directories

mod error;
mod ids;
mod paths;
mod time;
mod window;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
pub use window::*;
