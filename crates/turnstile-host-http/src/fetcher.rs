//! reqwest-backed fetcher

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use turnstile_api::EntitlementsRequest;
use turnstile_host_api::{Fetcher, HostError, HostResult};

/// Anti-XSSI prefix the service puts in front of JSON bodies
const XSSI_PREFIX: &str = ")]}'";

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetcher talking to the entitlements service over HTTP
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> HostResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| HostError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_credentialed_json(&self, url: &str) -> HostResult<Value> {
        debug!(url = %url, "Fetching");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HostError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Fetch returned an error status");
            return Err(HostError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| HostError::RequestFailed(e.to_string()))?;

        parse_json_body(&body)
    }

    async fn send_post(&self, url: &str, message: &EntitlementsRequest) -> HostResult<()> {
        let payload = message.to_array(false).to_string();
        debug!(url = %url, "Posting pingback");

        let response = self
            .client
            .post(url)
            .form(&[("f.req", payload)])
            .send()
            .await
            .map_err(|e| HostError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HostError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(())
    }
}

/// Parse a response body, dropping the anti-XSSI prefix line if present
pub fn parse_json_body(body: &str) -> HostResult<Value> {
    let json = match body.strip_prefix(XSSI_PREFIX) {
        Some(rest) => rest.trim_start_matches(['\r', '\n']),
        None => body,
    };

    serde_json::from_str(json).map_err(|e| HostError::InvalidResponse(e.to_string()))
}
