//! Test fixtures wiring the managers to in-memory collaborators

use serde_json::{Value, json};
use std::sync::Arc;
use turnstile_config::Settings;
use turnstile_host_api::{MockAnalytics, MockFetcher, MockPresenter};
use turnstile_store::MemoryStorage;
use turnstile_util::{ManualClock, PageViewId, ProductId};

use crate::jwt::encode_unsigned_jwt;
use crate::{ClientEventManager, Deps, PageContext};

/// Wall-clock time every harness starts at
pub const TEST_NOW_MS: i64 = 1_700_000_000_000;

pub const TEST_PUBLICATION: &str = "pub1";
pub const TEST_PRODUCT: &str = "pub1:news";

/// Mock collaborators plus the settings and page they are wired with.
///
/// Adjust `settings` or `page` before calling [`TestHarness::deps`].
pub struct TestHarness {
    pub settings: Settings,
    pub page: PageContext,
    pub clock: Arc<ManualClock>,
    pub storage: Arc<MemoryStorage>,
    pub fetcher: Arc<MockFetcher>,
    pub presenter: Arc<MockPresenter>,
    pub analytics: Arc<MockAnalytics>,
    pub events: Arc<ClientEventManager>,
}

impl TestHarness {
    pub fn new() -> Self {
        let mut settings = Settings::for_publication(TEST_PUBLICATION);
        settings.product_id = ProductId::new(TEST_PRODUCT);
        let page = PageContext::from_settings(&settings)
            .with_canonical_url("https://news.example/article");

        Self {
            settings,
            page,
            clock: Arc::new(ManualClock::new(TEST_NOW_MS)),
            storage: Arc::new(MemoryStorage::new()),
            fetcher: Arc::new(MockFetcher::new()),
            presenter: Arc::new(MockPresenter::new()),
            analytics: Arc::new(MockAnalytics::new(true)),
            events: Arc::new(ClientEventManager::new()),
        }
    }

    pub fn locked(mut self) -> Self {
        self.settings.locked = true;
        self.page = self.page.with_locked(true);
        self
    }

    pub fn deps(&self) -> Deps {
        Deps {
            settings: Arc::new(self.settings.clone()),
            page: Arc::new(self.page.clone()),
            clock: self.clock.clone(),
            storage: self.storage.clone(),
            fetcher: self.fetcher.clone(),
            presenter: self.presenter.clone(),
            analytics: self.analytics.clone(),
            events: self.events.clone(),
            page_view: PageViewId::new(),
        }
    }

    /// Page URL with a GAA parameter set valid for another hour
    pub fn gaa_url(&self, access_type: &str) -> String {
        let expires = TEST_NOW_MS / 1000 + 3600;
        format!(
            "https://news.example/article?gaa_at={}&gaa_n=nonce&gaa_sig=sig&gaa_ts={:x}",
            access_type, expires
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Unsigned entitlements token with the given grants and `exp` in seconds
pub fn signed_entitlements(entitlements: Value, exp_secs: i64) -> String {
    encode_unsigned_jwt(&json!({"exp": exp_secs, "entitlements": entitlements}))
}
