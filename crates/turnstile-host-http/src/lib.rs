//! HTTP host transport for turnstile
//!
//! Provides:
//! - Credentialed JSON fetches with XSSI prefix stripping
//! - Form-encoded pingback posts

mod fetcher;

pub use fetcher::*;
