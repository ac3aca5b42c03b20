//! Client configuration fetching

use tokio::sync::OnceCell;
use tracing::{debug, warn};
use turnstile_api::{Article, ClientConfig, ClientConfigJson};

use crate::url::{encode_uri_component, service_url};
use crate::{CoreError, CoreResult, Deps};

/// Fetches and memoizes the client configuration of a publication
pub struct ClientConfigManager {
    deps: Deps,
    config: OnceCell<ClientConfig>,
}

impl ClientConfigManager {
    pub fn new(deps: Deps) -> Self {
        Self {
            deps,
            config: OnceCell::new(),
        }
    }

    /// Resolve the configuration once.
    ///
    /// The config embedded in `article` is used when present; otherwise it is
    /// fetched from the client configuration endpoint. Failures are not
    /// memoized.
    pub async fn fetch_client_config(&self, article: Option<&Article>) -> CoreResult<ClientConfig> {
        let config = self
            .config
            .get_or_try_init(|| async {
                let embedded = article.and_then(|a| a.client_config.clone());
                let json = match embedded {
                    Some(json) => {
                        debug!("Using client config from article");
                        json
                    }
                    None => self.fetch().await?,
                };
                Ok::<_, CoreError>(ClientConfig::from_json(
                    json,
                    self.deps.settings.runtime.skip_account_creation_screen,
                ))
            })
            .await?;
        Ok(config.clone())
    }

    /// The resolved configuration, or defaults when nothing was fetched yet
    pub fn get_client_config(&self) -> ClientConfig {
        self.config.get().cloned().unwrap_or_else(|| {
            ClientConfig::from_json(
                ClientConfigJson::default(),
                self.deps.settings.runtime.skip_account_creation_screen,
            )
        })
    }

    async fn fetch(&self) -> CoreResult<ClientConfigJson> {
        let publication_id = &self.deps.settings.publication_id;
        if publication_id.is_empty() {
            return Err(CoreError::MissingPublicationId);
        }

        let url = service_url(
            &self.deps.settings.runtime.service_url,
            &format!(
                "/publication/{}/clientconfiguration",
                encode_uri_component(publication_id.as_str())
            ),
        );
        let json = self.deps.fetcher.fetch_credentialed_json(&url).await?;

        Ok(serde_json::from_value(json).unwrap_or_else(|e| {
            warn!(error = %e, "Malformed client config, using defaults");
            ClientConfigJson::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use serde_json::json;

    #[tokio::test]
    async fn test_prefers_article_config() {
        let harness = TestHarness::new();
        let manager = ClientConfigManager::new(harness.deps());

        let article: Article = serde_json::from_value(json!({
            "clientConfig": {"paySwgVersion": "7"}
        }))
        .unwrap();

        let config = manager.fetch_client_config(Some(&article)).await.unwrap();
        assert_eq!(config.pay_swg_version.as_deref(), Some("7"));
        assert_eq!(harness.fetcher.fetch_count("/clientconfiguration"), 0);
    }

    #[tokio::test]
    async fn test_fetches_once_and_memoizes() {
        let harness = TestHarness::new();
        harness.fetcher.respond(
            "/clientconfiguration",
            json!({"autoPromptConfig": {"impressionConfig": {"maxImpressions": 2}}}),
        );
        let manager = ClientConfigManager::new(harness.deps());
        assert!(manager.get_client_config().auto_prompt_config.is_none());

        let config = manager.fetch_client_config(None).await.unwrap();
        let again = manager.fetch_client_config(None).await.unwrap();
        assert_eq!(config, again);
        assert_eq!(
            config
                .auto_prompt_config
                .as_ref()
                .and_then(|c| c.impression_config.max_impressions),
            Some(2)
        );
        assert_eq!(harness.fetcher.fetch_count("/clientconfiguration"), 1);
        assert_eq!(manager.get_client_config(), config);
        assert!(harness.fetcher.fetched_urls()[0]
            .ends_with("/swg/_/api/v1/publication/pub1/clientconfiguration"));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_not_memoized() {
        let harness = TestHarness::new();
        harness.fetcher.fail("/clientconfiguration", "offline");
        harness.fetcher.respond("/clientconfiguration", json!({}));
        let manager = ClientConfigManager::new(harness.deps());

        assert!(manager.fetch_client_config(None).await.is_err());
        assert!(manager.fetch_client_config(None).await.is_ok());
        assert_eq!(harness.fetcher.fetch_count("/clientconfiguration"), 2);
    }
}
