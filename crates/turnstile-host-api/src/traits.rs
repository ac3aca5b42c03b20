//! Host collaborator traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use turnstile_api::{AutoPromptType, EntitlementsRequest, Intervention};

/// Errors from host collaborators
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Presentation failed: {0}")]
    PresentationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Network transport for the entitlements service
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` with credentials and parse the body as JSON
    async fn fetch_credentialed_json(&self, url: &str) -> HostResult<serde_json::Value>;

    /// POST a pingback to `url`
    async fn send_post(&self, url: &str, message: &EntitlementsRequest) -> HostResult<()>;
}

/// What a prompt shows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptTarget {
    /// Contribution or subscription offers
    Monetization { prompt_type: AutoPromptType },
    /// An audience action (registration wall, survey, ...)
    AudienceAction { intervention: Intervention },
}

/// A prompt to render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub target: PromptTarget,
    pub is_closable: bool,
    /// Shown as a frequency-capped soft paywall
    pub soft_paywall: bool,
}

/// UI collaborator rendering prompts and toasts
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Render a prompt
    async fn show_prompt(&self, request: &PromptRequest) -> HostResult<()>;

    /// Toast announcing access through a non-metering entitlement
    async fn show_entitlement_toast(&self, source: &str) -> HostResult<()>;

    /// Toast announcing a metered read. Resolves once the reader dismisses it.
    async fn show_meter_toast(
        &self,
        client_type: Option<u32>,
        user_attribute: Option<&str>,
    ) -> HostResult<()>;
}

/// Reports whether a page analytics integration is present
#[async_trait]
pub trait AnalyticsProbe: Send + Sync {
    async fn is_available(&self) -> bool;
}
