//! Entitlement resolution and auto prompt decisions for turnstile
//!
//! This crate decides, for one page view:
//! - What the reader is entitled to (server fetch, session cache, pushed
//!   tokens, retries while a purchase settles)
//! - Whether metering grants are consumed and which toasts to show
//! - Which prompt, if any, to display and under which frequency caps
//!
//! All host interaction goes through the traits in `turnstile-host-api`,
//! collected in [`Deps`].

mod auto_prompt;
mod client_config;
mod deps;
mod entitlement;
mod entitlements_manager;
mod error;
mod events;
pub mod jwt;
mod page;
pub mod testing;
pub mod url;

pub use auto_prompt::*;
pub use client_config::*;
pub use deps::*;
pub use entitlement::*;
pub use entitlements_manager::*;
pub use error::*;
pub use events::{ClientEventListener, ClientEventManager};
pub use page::*;
