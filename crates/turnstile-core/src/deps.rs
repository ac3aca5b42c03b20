//! Collaborators shared by the managers of one page view

use std::sync::Arc;
use turnstile_config::Settings;
use turnstile_host_api::{AnalyticsProbe, Fetcher, Presenter};
use turnstile_store::Storage;
use turnstile_util::{Clock, PageViewId};

use crate::{ClientEventManager, PageContext};

/// Everything a manager needs from the outside world
#[derive(Clone)]
pub struct Deps {
    pub settings: Arc<Settings>,
    pub page: Arc<PageContext>,
    pub clock: Arc<dyn Clock>,
    pub storage: Arc<dyn Storage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub presenter: Arc<dyn Presenter>,
    pub analytics: Arc<dyn AnalyticsProbe>,
    pub events: Arc<ClientEventManager>,
    pub page_view: PageViewId,
}

impl Deps {
    /// Page context is derived from the settings
    pub fn new(
        settings: Settings,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage>,
        fetcher: Arc<dyn Fetcher>,
        presenter: Arc<dyn Presenter>,
        analytics: Arc<dyn AnalyticsProbe>,
    ) -> Self {
        let page = PageContext::from_settings(&settings);
        Self {
            settings: Arc::new(settings),
            page: Arc::new(page),
            clock,
            storage,
            fetcher,
            presenter,
            analytics,
            events: Arc::new(ClientEventManager::new()),
            page_view: PageViewId::new(),
        }
    }

    pub fn with_page(mut self, page: PageContext) -> Self {
        self.page = Arc::new(page);
        self
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}
