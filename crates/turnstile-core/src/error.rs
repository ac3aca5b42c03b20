//! Core error type

use thiserror::Error;
use turnstile_host_api::HostError;
use turnstile_store::StoreError;

/// Errors surfaced by the core managers.
///
/// Decode and parse problems never show up here; they degrade to empty values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Publication id is not configured")]
    MissingPublicationId,

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CoreResult<T> = Result<T, CoreError>;
