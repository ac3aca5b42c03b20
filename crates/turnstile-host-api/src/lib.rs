//! Host collaborator traits for turnstile
//!
//! This crate defines the interface between the core managers and the
//! environment they run in: network transport, prompt and toast rendering,
//! and analytics availability. It contains no transport code itself.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
