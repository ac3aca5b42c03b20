//! Mock collaborators for testing

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use turnstile_api::EntitlementsRequest;

use crate::{AnalyticsProbe, Fetcher, HostError, HostResult, Presenter, PromptRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripted response for a mock route
#[derive(Debug, Clone)]
pub enum MockResponse {
    Json(Value),
    Failure(String),
}

struct Route {
    fragment: String,
    responses: VecDeque<MockResponse>,
}

/// Mock fetcher answering from scripted routes.
///
/// A request is answered by the first route whose fragment occurs in the URL.
/// Responses are consumed in order; the last one repeats.
pub struct MockFetcher {
    routes: Mutex<Vec<Route>>,
    fetches: Mutex<Vec<(String, Instant)>>,
    posts: Mutex<Vec<(String, EntitlementsRequest)>>,

    /// Configure every fetch to fail
    pub fail_fetch: Arc<Mutex<bool>>,

    /// Configure every post to fail
    pub fail_post: Arc<Mutex<bool>>,

    /// Latency added to every fetch
    pub fetch_delay: Arc<Mutex<Option<Duration>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
            fail_fetch: Arc::new(Mutex::new(false)),
            fail_post: Arc::new(Mutex::new(false)),
            fetch_delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue a JSON response for URLs containing `fragment`
    pub fn respond(&self, fragment: &str, json: Value) {
        self.push(fragment, MockResponse::Json(json));
    }

    /// Queue a transport failure for URLs containing `fragment`
    pub fn fail(&self, fragment: &str, message: &str) {
        self.push(fragment, MockResponse::Failure(message.to_string()));
    }

    fn push(&self, fragment: &str, response: MockResponse) {
        let mut routes = lock(&self.routes);
        match routes.iter_mut().find(|r| r.fragment == fragment) {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                fragment: fragment.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
    }

    /// URLs fetched so far, in order
    pub fn fetched_urls(&self) -> Vec<String> {
        lock(&self.fetches).iter().map(|(url, _)| url.clone()).collect()
    }

    /// Instants of fetches whose URL contains `fragment`
    pub fn fetch_times(&self, fragment: &str) -> Vec<Instant> {
        lock(&self.fetches)
            .iter()
            .filter(|(url, _)| url.contains(fragment))
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn fetch_count(&self, fragment: &str) -> usize {
        self.fetch_times(fragment).len()
    }

    /// Pingbacks posted so far
    pub fn posts(&self) -> Vec<(String, EntitlementsRequest)> {
        lock(&self.posts).clone()
    }

    fn next_response(&self, url: &str) -> Option<MockResponse> {
        let mut routes = lock(&self.routes);
        let route = routes.iter_mut().find(|r| url.contains(&r.fragment))?;
        if route.responses.len() > 1 {
            route.responses.pop_front()
        } else {
            route.responses.front().cloned()
        }
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch_credentialed_json(&self, url: &str) -> HostResult<Value> {
        lock(&self.fetches).push((url.to_string(), Instant::now()));

        let delay = *lock(&self.fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *lock(&self.fail_fetch) {
            return Err(HostError::RequestFailed("Mock fetch failure".into()));
        }

        match self.next_response(url) {
            Some(MockResponse::Json(json)) => Ok(json),
            Some(MockResponse::Failure(message)) => Err(HostError::RequestFailed(message)),
            None => Err(HostError::Status {
                status: 404,
                url: url.to_string(),
            }),
        }
    }

    async fn send_post(&self, url: &str, message: &EntitlementsRequest) -> HostResult<()> {
        if *lock(&self.fail_post) {
            return Err(HostError::RequestFailed("Mock post failure".into()));
        }
        lock(&self.posts).push((url.to_string(), message.clone()));
        Ok(())
    }
}

/// Mock presenter recording everything it is asked to show
pub struct MockPresenter {
    prompts: Mutex<Vec<(PromptRequest, Instant)>>,
    toasts: Mutex<Vec<String>>,
    meter_toasts: Mutex<Vec<(Option<u32>, Option<String>)>>,
    hold_meter_toast: AtomicBool,
    meter_toast_dismissed: Notify,
}

impl MockPresenter {
    pub fn new() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            toasts: Mutex::new(Vec::new()),
            meter_toasts: Mutex::new(Vec::new()),
            hold_meter_toast: AtomicBool::new(false),
            meter_toast_dismissed: Notify::new(),
        }
    }

    /// Keep meter toasts open until [`MockPresenter::dismiss_meter_toast`]
    pub fn hold_meter_toasts(&self) {
        self.hold_meter_toast.store(true, Ordering::SeqCst);
    }

    pub fn dismiss_meter_toast(&self) {
        self.meter_toast_dismissed.notify_one();
    }

    pub fn prompts(&self) -> Vec<(PromptRequest, Instant)> {
        lock(&self.prompts).clone()
    }

    pub fn toasts(&self) -> Vec<String> {
        lock(&self.toasts).clone()
    }

    pub fn meter_toasts(&self) -> Vec<(Option<u32>, Option<String>)> {
        lock(&self.meter_toasts).clone()
    }
}

impl Default for MockPresenter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Presenter for MockPresenter {
    async fn show_prompt(&self, request: &PromptRequest) -> HostResult<()> {
        lock(&self.prompts).push((request.clone(), Instant::now()));
        Ok(())
    }

    async fn show_entitlement_toast(&self, source: &str) -> HostResult<()> {
        lock(&self.toasts).push(source.to_string());
        Ok(())
    }

    async fn show_meter_toast(
        &self,
        client_type: Option<u32>,
        user_attribute: Option<&str>,
    ) -> HostResult<()> {
        lock(&self.meter_toasts).push((client_type, user_attribute.map(str::to_string)));
        if self.hold_meter_toast.load(Ordering::SeqCst) {
            self.meter_toast_dismissed.notified().await;
        }
        Ok(())
    }
}

/// Mock analytics probe
pub struct MockAnalytics {
    pub available: AtomicBool,
}

impl MockAnalytics {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
        }
    }
}

#[async_trait]
impl AnalyticsProbe for MockAnalytics {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
