//! Wire types shared by the turnstile crates
//!
//! This crate defines the shapes exchanged with the entitlements service and
//! the page embedding the library:
//! - Article envelope, entitlement responses and interventions
//! - Client configuration (auto prompt caps, UI predicates)
//! - Client analytics events and their originators
//! - Pingback messages

mod client_config;
mod events;
mod pingback;
mod types;

pub use client_config::*;
pub use events::*;
pub use pingback::*;
pub use types::*;

/// Service id reported on every resolved entitlement set
pub const SERVICE_ID: &str = "subscribe.google.com";
