//! Entitlement fetching, caching, retries and metering consumption
//!
//! One manager serves one page view. A resolution cycle goes
//! `IDLE -> FETCHING -> (CACHE_HIT | NETWORK) -> RESOLVED`, after which the
//! bundle may be acknowledged or consumed any number of times.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use turnstile_api::{
    AnalyticsEvent, Article, ClientEvent, EntitlementJwt, EntitlementResult, EntitlementSource,
    EntitlementsRequest, EntitlementsResponse, EventOriginator, EventParams, InterventionType,
    Timestamp, meter_client_type,
};
use turnstile_store::{StorageKey, StorageTier};

use crate::entitlement::{Entitlement, Entitlements, EntitlementsHandler, PRIVILEGED_SOURCE};
use crate::events::{ClientEventListener, lock};
use crate::jwt::{decode_jwt, encode_json_base64url};
use crate::url::{add_query_param, encode_uri_component, service_url};
use crate::{CoreError, CoreResult, Deps, GOOGLE_METERING_SOURCE};

/// Delay between positive-expectation retries
pub const POSITIVE_RETRY_DELAY: Duration = Duration::from_millis(550);

/// Attempts armed by `reset(true)`
pub const POSITIVE_RETRY_BUDGET: u32 = 3;

/// Page hash parameters forwarded to the article endpoint
mod hash_params {
    pub const DEV_ENTITLEMENT: &str = "swg.deventitlement";
    pub const PREVIEW_CONFIG_ID: &str = "rrmPromptRequested";
    pub const PREVIEW_KEY: &str = "rrmPreviewKey";
}

/// Document decryption request
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptionParams {
    pub encrypted_document_key: String,
}

/// Publisher-side metering state forwarded with showcase requests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeteringState {
    pub id: String,
    /// Attribute name to Unix seconds
    pub standard_attributes: BTreeMap<String, i64>,
    pub custom_attributes: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetEntitlementsParams {
    pub encryption: Option<EncryptionParams>,
    pub metering: Option<MeteringState>,
    pub publisher_provided_id: Option<String>,
}

impl GetEntitlementsParams {
    fn is_decryption_request(&self) -> bool {
        self.encryption.is_some()
    }
}

/// Callback invoked with every resolved bundle
pub type EntitlementsCallback = Arc<dyn Fn(&Entitlements) + Send + Sync>;

struct Memo {
    cell: Arc<OnceCell<Entitlements>>,
    params: GetEntitlementsParams,
}

/// Resolves and acts on the reader's entitlements
pub struct EntitlementsManager {
    deps: Deps,
    self_ref: Weak<EntitlementsManager>,
    memo: Mutex<Option<Memo>>,
    article: Mutex<Option<Article>>,
    positive_retries: AtomicU32,
    block_next_notification: AtomicBool,
    block_next_toast: AtomicBool,
    encoded_params: Mutex<Option<String>>,
    consumed_tokens: Mutex<HashSet<String>>,
    on_entitlements: Mutex<Option<EntitlementsCallback>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EntitlementsManager {
    /// Create a manager and subscribe it to the client event bus
    pub fn new(deps: Deps) -> Arc<Self> {
        let manager = Arc::new_cyclic(|self_ref| Self {
            deps,
            self_ref: self_ref.clone(),
            memo: Mutex::new(None),
            article: Mutex::new(None),
            positive_retries: AtomicU32::new(0),
            block_next_notification: AtomicBool::new(false),
            block_next_toast: AtomicBool::new(false),
            encoded_params: Mutex::new(None),
            consumed_tokens: Mutex::new(HashSet::new()),
            on_entitlements: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let listener: Arc<dyn ClientEventListener> = manager.clone();
        manager.deps.events.register(&listener);

        info!(
            publication_id = %manager.deps.settings.publication_id,
            product_id = %manager.deps.page.product_id,
            page_view = %manager.deps.page_view,
            "Entitlements manager initialized"
        );
        manager
    }

    pub fn set_on_entitlements_response(&self, callback: EntitlementsCallback) {
        *lock(&self.on_entitlements) = Some(callback);
    }

    /// Drop the memoized result.
    ///
    /// With `expect_positive`, also wipe the cached token and arm the retry
    /// budget. An already armed budget is never lowered.
    pub async fn reset(&self, expect_positive: bool) -> CoreResult<()> {
        *lock(&self.memo) = None;
        let floor = if expect_positive { POSITIVE_RETRY_BUDGET } else { 0 };
        self.positive_retries.fetch_max(floor, Ordering::SeqCst);

        if expect_positive {
            let storage = &self.deps.storage;
            storage.remove(StorageKey::Entitlements, StorageTier::Session).await?;
            storage.remove(StorageKey::IsReadyToPay, StorageTier::Session).await?;
        }
        debug!(expect_positive, "Entitlements reset");
        Ok(())
    }

    /// Drop the memo, disarm retries and forget everything cached
    pub async fn clear(&self) -> CoreResult<()> {
        *lock(&self.memo) = None;
        self.positive_retries.store(0, Ordering::SeqCst);
        self.unblock_next_notification();

        let storage = &self.deps.storage;
        storage.remove(StorageKey::Entitlements, StorageTier::Session).await?;
        storage.remove(StorageKey::Toast, StorageTier::Session).await?;
        storage.remove(StorageKey::IsReadyToPay, StorageTier::Session).await?;
        debug!("Entitlements cleared");
        Ok(())
    }

    pub fn positive_retries(&self) -> u32 {
        self.positive_retries.load(Ordering::SeqCst)
    }

    pub fn block_next_notification(&self) {
        self.block_next_notification.store(true, Ordering::SeqCst);
    }

    pub fn unblock_next_notification(&self) {
        self.block_next_notification.store(false, Ordering::SeqCst);
    }

    pub fn block_next_toast(&self) {
        self.block_next_toast.store(true, Ordering::SeqCst);
    }

    pub fn unblock_next_toast(&self) {
        self.block_next_toast.store(false, Ordering::SeqCst);
    }

    /// Resolve entitlements for this page.
    ///
    /// Concurrent and repeated callers share one resolution until the next
    /// `reset` or `clear`. Transport failures propagate and are not memoized.
    pub async fn get_entitlements(
        &self,
        params: Option<GetEntitlementsParams>,
    ) -> CoreResult<Entitlements> {
        let (cell, params) = {
            let mut memo = lock(&self.memo);
            let memo = memo.get_or_insert_with(|| Memo {
                cell: Arc::new(OnceCell::new()),
                params: params.unwrap_or_default(),
            });
            (memo.cell.clone(), memo.params.clone())
        };
        self.resolve(&cell, &params).await
    }

    async fn resolve(
        &self,
        cell: &OnceCell<Entitlements>,
        params: &GetEntitlementsParams,
    ) -> CoreResult<Entitlements> {
        let entitlements = cell
            .get_or_try_init(|| async {
                let entitlements = self.fetch_entitlements_with_caching(params).await?;
                self.on_entitlements_fetched(&entitlements).await?;
                Ok::<_, CoreError>(entitlements)
            })
            .await?;
        Ok(entitlements.clone())
    }

    /// Accept an externally supplied signed token.
    ///
    /// Returns whether it was valid for this product and got cached.
    pub async fn push_next_entitlements(&self, raw: &str, is_ready_to_pay: bool) -> CoreResult<bool> {
        let Some(entitlements) = self.get_valid_jwt_entitlements(raw, true, is_ready_to_pay, None)
        else {
            return Ok(false);
        };
        if !entitlements.enables_this(None) {
            return Ok(false);
        }

        self.deps
            .storage
            .set(StorageKey::Entitlements, raw, StorageTier::Session)
            .await?;
        debug!("Pushed entitlements cached");
        Ok(true)
    }

    /// The article of the current resolution, once one has started
    pub async fn get_article(&self) -> CoreResult<Option<Article>> {
        let memo = lock(&self.memo)
            .as_ref()
            .map(|memo| (memo.cell.clone(), memo.params.clone()));
        let Some((cell, params)) = memo else {
            return Ok(None);
        };

        self.resolve(&cell, &params).await?;
        Ok(lock(&self.article).clone())
    }

    pub async fn get_experiment_config_flags(&self) -> CoreResult<Vec<String>> {
        Ok(self
            .get_article()
            .await?
            .map(|article| parse_article_experiment_config_flags(&article))
            .unwrap_or_default())
    }

    /// Audience actions a publisher may trigger on its own
    pub async fn get_available_interventions(&self) -> CoreResult<Option<Vec<InterventionType>>> {
        let Some(article) = self.get_article().await? else {
            warn!("Available interventions requested before any article was fetched");
            return Ok(None);
        };

        Ok(Some(
            article
                .actions()
                .iter()
                .map(|action| action.kind.clone())
                .filter(InterventionType::is_publicly_available)
                .collect(),
        ))
    }

    /// Wait for every background task (pingbacks, meter toasts, acks)
    pub async fn settled(&self) {
        loop {
            let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Background task failed");
                }
            }
        }
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(tokio::spawn(future));
    }

    fn publication_path(&self, endpoint: &str) -> CoreResult<String> {
        let publication_id = &self.deps.settings.publication_id;
        if publication_id.is_empty() {
            return Err(CoreError::MissingPublicationId);
        }
        let path = format!(
            "/publication/{}/{}",
            encode_uri_component(publication_id.as_str()),
            endpoint
        );
        Ok(match self.deps.page.hash_param(hash_params::DEV_ENTITLEMENT) {
            Some(dev) => add_query_param(&path, "devEnt", dev),
            None => path,
        })
    }

    async fn fetch_entitlements_with_caching(
        &self,
        params: &GetEntitlementsParams,
    ) -> CoreResult<Entitlements> {
        let storage = &self.deps.storage;
        let raw = storage.get(StorageKey::Entitlements, StorageTier::Session).await?;
        let is_ready_to_pay = storage
            .get(StorageKey::IsReadyToPay, StorageTier::Session)
            .await?
            .as_deref()
            == Some("true");

        if let Some(raw) = raw.filter(|r| !r.is_empty())
            && !params.is_decryption_request()
        {
            let cached = self.get_valid_jwt_entitlements(&raw, true, is_ready_to_pay, None);
            if let Some(cached) = cached.filter(|c| c.enables_this(None)) {
                self.positive_retries.store(0, Ordering::SeqCst);
                debug!("Entitlements served from cache");
                return Ok(cached);
            }
        }

        let entitlements = self.fetch_entitlements(params).await?;
        if entitlements.enables_this_with_cacheable_entitlements() && !entitlements.raw.is_empty() {
            storage
                .set(StorageKey::Entitlements, &entitlements.raw, StorageTier::Session)
                .await?;
            debug!("Entitlements cached");
        }
        Ok(entitlements)
    }

    async fn fetch_entitlements(&self, params: &GetEntitlementsParams) -> CoreResult<Entitlements> {
        let mut remaining = self.positive_retries.swap(0, Ordering::SeqCst);
        loop {
            remaining = remaining.saturating_sub(1);
            let entitlements = self.fetch(params).await?;
            if entitlements.enables_this(None) || remaining == 0 {
                return Ok(entitlements);
            }
            debug!(remaining, "Not entitled yet, retrying");
            tokio::time::sleep(POSITIVE_RETRY_DELAY).await;
        }
    }

    async fn fetch(&self, params: &GetEntitlementsParams) -> CoreResult<Entitlements> {
        let page = &self.deps.page;
        let storage = &self.deps.storage;
        let mut url = self.publication_path("article")?;

        if let Some(id) = page.hash_param(hash_params::PREVIEW_CONFIG_ID) {
            url = add_query_param(&url, "previewConfigId", id);
        }
        if let Some(key) = page.hash_param(hash_params::PREVIEW_KEY) {
            url = add_query_param(&url, "previewKey", key);
        }
        if let Some(encryption) = &params.encryption {
            url = add_query_param(&url, "crypt", &encryption.encrypted_document_key);
        }
        let user_token = storage.get(StorageKey::UserToken, StorageTier::Local).await?;
        if let Some(token) = user_token.filter(|t| !t.is_empty()) {
            url = add_query_param(&url, "sut", &token);
        }

        let ppid = self
            .deps
            .settings
            .publisher_provided_id
            .clone()
            .or_else(|| params.publisher_provided_id.clone())
            .filter(|id| !id.is_empty());
        if let Some(ppid) = ppid {
            url = add_query_param(&url, "ppid", &ppid);
        }

        let read_time = storage
            .get(StorageKey::ReadTime, StorageTier::Session)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        if read_time != 0 {
            let age = (self.deps.now_ms() - read_time).div_euclid(1000);
            if age >= 0 {
                url = add_query_param(&url, "interaction_age", &age.to_string());
            }
        }

        url = add_query_param(&url, "locked", if page.locked { "true" } else { "false" });
        url = add_query_param(
            &url,
            "contentType",
            if page.locked { "CLOSED" } else { "OPEN" },
        );

        let encoded = encode_json_base64url(&self.encodable_params(params));
        url = add_query_param(&url, "encodedEntitlementsParams", &encoded);
        *lock(&self.encoded_params) = Some(encoded);

        let url = service_url(&self.deps.settings.runtime.service_url, &url);
        self.deps
            .events
            .log_swg_event(AnalyticsEvent::ActionGetEntitlements, false, None)
            .await;

        let json = self.deps.fetcher.fetch_credentialed_json(&url).await?;
        let article: Article = serde_json::from_value(json).unwrap_or_else(|e| {
            warn!(error = %e, "Malformed article response");
            Article::default()
        });
        for message in &article.error_messages {
            warn!(message = %message, "Entitlements service reported an error");
        }

        let response = article.entitlements.clone().unwrap_or_default();
        *lock(&self.article) = Some(article);
        self.parse_entitlements(response).await
    }

    /// Metering block sent as `encodedEntitlementsParams`
    fn encodable_params(&self, params: &GetEntitlementsParams) -> Value {
        let page = &self.deps.page;
        let owner = self.deps.settings.publication_id.as_str();
        let resource = json!({"hashedCanonicalUrl": page.hashed_canonical_url()});

        if self.deps.settings.runtime.enable_metered_by_google {
            return json!({
                "metering": {
                    "clientTypes": [meter_client_type::METERED_BY_GOOGLE],
                    "owner": owner,
                    "resource": resource,
                }
            });
        }

        let now_secs = self.deps.clock.now_secs();
        if let Some(state) = &params.metering
            && page.has_fresh_gaa_params(false, now_secs)
        {
            if state.id.is_empty() {
                warn!("Metering state is missing an id");
            } else {
                let mut attributes = Vec::new();
                for (prefix, map) in [
                    ("standard", &state.standard_attributes),
                    ("custom", &state.custom_attributes),
                ] {
                    for (name, &timestamp) in map {
                        if timestamp == 0 || timestamp > now_secs * 2 {
                            warn!(
                                attribute = %name,
                                timestamp,
                                "Metering attribute timestamp should be in Unix seconds"
                            );
                        }
                        attributes.push(json!({
                            "name": format!("{}_{}", prefix, name),
                            "timestamp": timestamp,
                        }));
                    }
                }

                return json!({
                    "metering": {
                        "clientTypes": [meter_client_type::LICENSED_BY_GOOGLE],
                        "owner": owner,
                        "resource": resource,
                        "state": {"id": state.id, "attributes": attributes},
                        "token": page.gaa_token(),
                    }
                });
            }
        }

        json!({"metering": {"resource": resource}})
    }

    async fn parse_entitlements(&self, response: EntitlementsResponse) -> CoreResult<Entitlements> {
        let storage = &self.deps.storage;
        match response.is_ready_to_pay {
            Some(ready) => {
                storage
                    .set(
                        StorageKey::IsReadyToPay,
                        if ready { "true" } else { "false" },
                        StorageTier::Session,
                    )
                    .await?
            }
            None => {
                storage
                    .remove(StorageKey::IsReadyToPay, StorageTier::Session)
                    .await?
            }
        }

        if let Some(token) = response.swg_user_token.as_deref().filter(|t| !t.is_empty()) {
            storage
                .set(StorageKey::UserToken, token, StorageTier::Local)
                .await?;
        }

        let is_ready_to_pay = response.is_ready_to_pay.unwrap_or(false);
        let key = response.decrypted_document_key;

        if let Some(signed) = response.signed_entitlements.as_deref() {
            if let Some(entitlements) =
                self.get_valid_jwt_entitlements(signed, false, is_ready_to_pay, key.clone())
            {
                return Ok(entitlements);
            }
        } else if let Some(plain) = response.entitlements.as_ref() {
            return Ok(self.create_entitlements(
                "",
                Entitlement::parse_list_from_json(plain),
                is_ready_to_pay,
                key,
            ));
        }

        Ok(self.create_entitlements("", Vec::new(), is_ready_to_pay, key))
    }

    /// Bundle from a signed token, or `None` if it is malformed, expired
    /// (when required) or carries no entitlements claim
    fn get_valid_jwt_entitlements(
        &self,
        raw: &str,
        require_non_expired: bool,
        is_ready_to_pay: bool,
        decrypted_document_key: Option<String>,
    ) -> Option<Entitlements> {
        let claims = match decode_jwt(raw) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Failed to decode signed entitlements");
                return None;
            }
        };

        if require_non_expired {
            let expires_at_ms = claims.get("exp").and_then(Value::as_f64).map(|s| s * 1000.0);
            if expires_at_ms.is_some_and(|exp| exp < self.deps.now_ms() as f64) {
                debug!("Signed entitlements expired");
                return None;
            }
        }

        let claim = claims.get("entitlements").filter(|c| is_truthy(c))?;
        Some(self.create_entitlements(
            raw,
            Entitlement::parse_list_from_json(claim),
            is_ready_to_pay,
            decrypted_document_key,
        ))
    }

    fn create_entitlements(
        &self,
        raw: &str,
        entitlements: Vec<Entitlement>,
        is_ready_to_pay: bool,
        decrypted_document_key: Option<String>,
    ) -> Entitlements {
        let handler: Arc<dyn EntitlementsHandler> = match self.self_ref.upgrade() {
            Some(manager) => manager,
            None => Arc::new(crate::entitlement::NoopHandler),
        };
        Entitlements::new(
            raw,
            entitlements,
            Some(self.deps.page.product_id.clone()),
            handler,
        )
        .with_ready_to_pay(is_ready_to_pay)
        .with_decrypted_document_key(decrypted_document_key)
    }

    async fn on_entitlements_fetched(&self, entitlements: &Entitlements) -> CoreResult<()> {
        let block_notification = self.block_next_notification.swap(false, Ordering::SeqCst);
        let block_toast = self.block_next_toast.swap(false, Ordering::SeqCst);
        if block_notification {
            debug!("Entitlements notification blocked");
            return Ok(());
        }

        let callback = lock(&self.on_entitlements).clone();
        if let Some(callback) = callback {
            callback(entitlements);
        }

        if self.deps.settings.runtime.enable_default_metering_handler
            && entitlements.enables_this_with_google_metering()
        {
            entitlements.consume(None);
        }

        let Some(entitlement) = entitlements.get_entitlement_for_this(None) else {
            self.deps
                .events
                .log_swg_event(AnalyticsEvent::EventNoEntitlements, false, None)
                .await;
            return Ok(());
        };

        if block_toast {
            return Ok(());
        }
        self.maybe_show_toast(entitlement).await
    }

    async fn maybe_show_toast(&self, entitlement: &Entitlement) -> CoreResult<()> {
        let events = &self.deps.events;
        if entitlement.is_metering() {
            events
                .log_swg_event(AnalyticsEvent::EventHasMeteringEntitlements, false, None)
                .await;
            return Ok(());
        }

        let params = EventParams {
            is_user_registered: Some(true),
            subscription_timestamp: entitlement.subscription_timestamp,
        };
        let event = if entitlement.source == PRIVILEGED_SOURCE {
            AnalyticsEvent::EventUnlockedForCrawler
        } else {
            AnalyticsEvent::EventUnlockedBySubscription
        };
        events.log_swg_event(event, false, Some(params)).await;

        let toast = self
            .deps
            .storage
            .get(StorageKey::Toast, StorageTier::Session)
            .await?;
        if toast.as_deref() == Some("1") {
            return Ok(());
        }

        let source = if entitlement.source.is_empty() {
            GOOGLE_METERING_SOURCE
        } else {
            entitlement.source.as_str()
        };
        if let Err(e) = self.deps.presenter.show_entitlement_toast(source).await {
            warn!(error = %e, "Failed to show entitlement toast");
        }
        Ok(())
    }

    /// Report a used meter to the service, once per token
    async fn consume_meter(&self, entitlement: &Entitlement) -> CoreResult<()> {
        if !entitlement.is_metering() {
            return Ok(());
        }

        let page = &self.deps.page;
        let (source, token) =
            if entitlement.metering_client_type() == Some(meter_client_type::METERED_BY_GOOGLE) {
                (EntitlementSource::SubscribeWithGoogleMeteringService, None)
            } else if page.has_fresh_gaa_params(false, self.deps.clock.now_secs()) {
                (
                    EntitlementSource::GoogleShowcaseMeteringService,
                    page.gaa_token().map(str::to_string),
                )
            } else {
                debug!("Meter not reported: no metering client type or GAA parameters");
                return Ok(());
            };

        if !lock(&self.consumed_tokens).insert(entitlement.subscription_token.clone()) {
            debug!("Meter already reported");
            return Ok(());
        }

        self.deps
            .events
            .log_swg_event(AnalyticsEvent::EventUnlockedByMeter, false, None)
            .await;

        let used = EntitlementJwt::new(&entitlement.subscription_token, &entitlement.source);
        self.post_entitlements_request(
            used,
            EntitlementResult::UnlockedMeter,
            source,
            token,
            None,
            None,
        )
        .await
    }

    async fn post_entitlements_request(
        &self,
        used_entitlement: EntitlementJwt,
        result: EntitlementResult,
        source: EntitlementSource,
        token: Option<String>,
        is_user_registered: Option<bool>,
        subscription_timestamp: Option<Timestamp>,
    ) -> CoreResult<()> {
        let mut message = EntitlementsRequest::new(source, result);
        message.used_entitlement = Some(used_entitlement);
        message.client_event_time = Some(Timestamp::from_millis(self.deps.now_ms()));
        message.token = Some(token.unwrap_or_default());
        message.is_user_registered = is_user_registered;
        message.subscription_timestamp = subscription_timestamp;

        let mut url = self.publication_path("article")?;

        let encoded = lock(&self.encoded_params)
            .get_or_insert_with(|| {
                let resource = json!({"hashedCanonicalUrl": self.deps.page.hashed_canonical_url()});
                encode_json_base64url(&json!({"metering": {"resource": resource}}))
            })
            .clone();

        let user_token = self
            .deps
            .storage
            .get(StorageKey::UserToken, StorageTier::Local)
            .await?;
        if let Some(token) = user_token.filter(|t| !t.is_empty()) {
            url = add_query_param(&url, "sut", &token);
        }
        url = add_query_param(&url, "encodedEntitlementsParams", &encoded);

        let url = service_url(&self.deps.settings.runtime.service_url, &url);
        self.deps.fetcher.send_post(&url, &message).await?;
        info!(result = ?result, source = ?source, "Entitlements pingback posted");
        Ok(())
    }
}

impl EntitlementsHandler for EntitlementsManager {
    fn ack(&self, entitlements: &Entitlements) {
        if entitlements.get_entitlement_for_this(None).is_none() {
            return;
        }
        let storage = self.deps.storage.clone();
        self.spawn(async move {
            if let Err(e) = storage
                .set(StorageKey::Toast, "1", StorageTier::Session)
                .await
            {
                warn!(error = %e, "Failed to record toast acknowledgement");
            }
        });
    }

    fn consume(&self, entitlements: &Entitlements, on_close: Option<Box<dyn FnOnce() + Send>>) {
        if !entitlements.enables_this_with_google_metering() {
            return;
        }
        let (Some(manager), Some(entitlement)) = (
            self.self_ref.upgrade(),
            entitlements.get_entitlement_for_this(None).cloned(),
        ) else {
            return;
        };

        self.spawn(async move {
            if entitlement.metering_show_toast() {
                let shown = manager
                    .deps
                    .presenter
                    .show_meter_toast(
                        entitlement.metering_client_type(),
                        entitlement.metering_user_attribute(),
                    )
                    .await;
                if let Err(e) = shown {
                    warn!(error = %e, "Failed to show meter toast");
                }
            }

            if let Some(on_close) = on_close {
                on_close();
            }
            if let Err(e) = manager.consume_meter(&entitlement).await {
                warn!(error = %e, "Failed to report meter");
            }
        });
    }
}

#[async_trait]
impl ClientEventListener for EntitlementsManager {
    /// Report publisher and library unlock events while GAA parameters are present
    async fn on_client_event(&self, event: &ClientEvent) {
        if !self
            .deps
            .page
            .has_fresh_gaa_params(true, self.deps.clock.now_secs())
        {
            return;
        }
        let Some(result) = EntitlementResult::from_event(event.event_type) else {
            return;
        };

        let source = match event.event_originator {
            EventOriginator::ShowcaseClient => EntitlementSource::PublisherEntitlement,
            // Meter unlocks are reported by consumption
            EventOriginator::SwgClient if result != EntitlementResult::UnlockedMeter => {
                EntitlementSource::GoogleSubscriberEntitlement
            }
            _ => return,
        };

        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let token = self.deps.page.gaa_token().map(str::to_string);
        let params = event.additional_parameters.clone().unwrap_or_default();
        self.spawn(async move {
            let posted = manager
                .post_entitlements_request(
                    EntitlementJwt::default(),
                    result,
                    source,
                    token,
                    params.is_user_registered,
                    params.subscription_timestamp,
                )
                .await;
            if let Err(e) = posted {
                warn!(error = %e, "Failed to post entitlements pingback");
            }
        });
    }
}

/// Experiment flags carried by an article
pub fn parse_article_experiment_config_flags(article: &Article) -> Vec<String> {
    article.experiment_flags().to_vec()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TEST_NOW_MS, TestHarness, signed_entitlements};
    use crate::url::decode_uri_component;
    use crate::{GOOGLE_SOURCE, jwt::BASE64_URL};
    use base64::Engine;
    use std::collections::HashMap;
    use turnstile_store::Storage;
    use std::sync::atomic::AtomicUsize;

    fn news_grant() -> Value {
        json!([{"source": "google", "products": ["pub1:news"], "subscriptionToken": "tok"}])
    }

    fn query_of(url: &str) -> HashMap<String, String> {
        crate::url::parse_query_string(crate::url::split_url(url).1)
    }

    #[tokio::test]
    async fn test_plain_entitlements_are_parsed_and_not_cached() {
        let harness = TestHarness::new();
        harness.fetcher.respond(
            "/article",
            json!({"entitlements": {"entitlements": news_grant(), "isReadyToPay": true, "swgUserToken": "sut1"}}),
        );
        let manager = EntitlementsManager::new(harness.deps());

        let ents = manager.get_entitlements(None).await.unwrap();
        assert!(ents.enables_this(None));
        assert!(ents.is_ready_to_pay);
        assert_eq!(ents.raw, "");

        let storage = &harness.storage;
        assert_eq!(
            storage.peek(StorageKey::IsReadyToPay, StorageTier::Session).as_deref(),
            Some("true")
        );
        assert_eq!(
            storage.peek(StorageKey::UserToken, StorageTier::Local).as_deref(),
            Some("sut1")
        );
        assert_eq!(storage.peek(StorageKey::Entitlements, StorageTier::Session), None);
    }

    #[tokio::test]
    async fn test_signed_entitlements_are_cached_and_reused() {
        let harness = TestHarness::new();
        let token = signed_entitlements(news_grant(), TEST_NOW_MS / 1000 + 3600);
        harness.fetcher.respond(
            "/article",
            json!({"entitlements": {"signedEntitlements": token}}),
        );

        let manager = EntitlementsManager::new(harness.deps());
        let ents = manager.get_entitlements(None).await.unwrap();
        assert_eq!(ents.raw, token);
        assert_eq!(
            harness.storage.peek(StorageKey::Entitlements, StorageTier::Session),
            Some(token.clone())
        );
        assert_eq!(
            harness.storage.peek(StorageKey::IsReadyToPay, StorageTier::Session),
            None
        );

        // A fresh manager for the next page view hits the cache
        let next = EntitlementsManager::new(harness.deps());
        let cached = next.get_entitlements(None).await.unwrap();
        assert!(cached.enables_this(None));
        assert_eq!(harness.fetcher.fetch_count("/article"), 1);
    }

    #[tokio::test]
    async fn test_expired_cache_goes_to_network() {
        let harness = TestHarness::new();
        let expired = signed_entitlements(news_grant(), TEST_NOW_MS / 1000 - 1);
        harness
            .storage
            .set(StorageKey::Entitlements, &expired, StorageTier::Session)
            .await
            .unwrap();
        harness.fetcher.respond("/article", json!({}));

        let manager = EntitlementsManager::new(harness.deps());
        let ents = manager.get_entitlements(None).await.unwrap();
        assert!(!ents.enables_this(None));
        assert_eq!(harness.fetcher.fetch_count("/article"), 1);
    }

    #[tokio::test]
    async fn test_decryption_requests_skip_cache() {
        let harness = TestHarness::new();
        let cached = signed_entitlements(news_grant(), TEST_NOW_MS / 1000 + 3600);
        harness
            .storage
            .set(StorageKey::Entitlements, &cached, StorageTier::Session)
            .await
            .unwrap();
        harness.fetcher.respond(
            "/article",
            json!({"entitlements": {"entitlements": news_grant(), "decryptedDocumentKey": "dk"}}),
        );

        let manager = EntitlementsManager::new(harness.deps());
        let params = GetEntitlementsParams {
            encryption: Some(EncryptionParams {
                encrypted_document_key: "edk".into(),
            }),
            ..Default::default()
        };
        let ents = manager.get_entitlements(Some(params)).await.unwrap();
        assert_eq!(ents.decrypted_document_key.as_deref(), Some("dk"));

        let url = &harness.fetcher.fetched_urls()[0];
        assert_eq!(query_of(url).get("crypt").map(String::as_str), Some("edk"));
    }

    #[tokio::test]
    async fn test_signed_entitlements_ignore_expiry_from_network() {
        let harness = TestHarness::new();
        let expired = signed_entitlements(news_grant(), TEST_NOW_MS / 1000 - 100);
        harness.fetcher.respond(
            "/article",
            json!({"entitlements": {"signedEntitlements": expired}}),
        );

        let manager = EntitlementsManager::new(harness.deps());
        assert!(manager.get_entitlements(None).await.unwrap().enables_this(None));
    }

    #[tokio::test]
    async fn test_malformed_payloads_degrade_to_empty() {
        let harness = TestHarness::new();
        harness.fetcher.respond(
            "/article",
            json!({"entitlements": {"signedEntitlements": "garbage"}, "errorMessages": ["oops"]}),
        );
        let manager = EntitlementsManager::new(harness.deps());

        let ents = manager.get_entitlements(None).await.unwrap();
        assert!(ents.entitlements.is_empty());
        assert!(!ents.enables_any(None));
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let harness = TestHarness::new();
        harness.fetcher.fail("/article", "offline");
        let manager = EntitlementsManager::new(harness.deps());

        let result = manager.get_entitlements(None).await;
        assert!(matches!(result, Err(CoreError::Host(_))));
    }

    #[tokio::test]
    async fn test_missing_publication_id_is_fatal() {
        let mut harness = TestHarness::new();
        harness.settings.publication_id = "".into();
        let manager = EntitlementsManager::new(harness.deps());

        let result = manager.get_entitlements(None).await;
        assert!(matches!(result, Err(CoreError::MissingPublicationId)));
    }

    #[tokio::test]
    async fn test_article_query_parameters() {
        let mut harness = TestHarness::new();
        harness.page = harness.page.clone().with_url(
            "https://news.example/a#swg.deventitlement=dev&rrmPromptRequested=cfg&rrmPreviewKey=pk",
        );
        harness.settings.publisher_provided_id = Some("ppid1".into());
        harness
            .storage
            .set(StorageKey::UserToken, "sut1", StorageTier::Local)
            .await
            .unwrap();
        harness
            .storage
            .set(
                StorageKey::ReadTime,
                &(TEST_NOW_MS - 5_500).to_string(),
                StorageTier::Session,
            )
            .await
            .unwrap();
        harness.fetcher.respond("/article", json!({}));

        let manager = EntitlementsManager::new(harness.deps());
        manager.get_entitlements(None).await.unwrap();

        let url = &harness.fetcher.fetched_urls()[0];
        assert!(url.starts_with("https://news.google.com/swg/_/api/v1/publication/pub1/article?devEnt=dev&"));
        let query = query_of(url);
        assert_eq!(query["previewConfigId"], "cfg");
        assert_eq!(query["previewKey"], "pk");
        assert_eq!(query["sut"], "sut1");
        assert_eq!(query["ppid"], "ppid1");
        assert_eq!(query["interaction_age"], "5");
        assert_eq!(query["locked"], "false");
        assert_eq!(query["contentType"], "OPEN");

        let encoded = decode_uri_component(&query["encodedEntitlementsParams"]).unwrap();
        let decoded: Value = serde_json::from_slice(&BASE64_URL.decode(encoded).unwrap()).unwrap();
        assert_eq!(
            decoded["metering"]["resource"]["hashedCanonicalUrl"],
            harness.page.hashed_canonical_url()
        );
        assert!(decoded["metering"].get("clientTypes").is_none());
    }

    #[tokio::test]
    async fn test_metered_by_google_params() {
        let mut harness = TestHarness::new();
        harness.settings.runtime.enable_metered_by_google = true;
        harness.page = harness.page.clone().with_locked(true);
        harness.fetcher.respond("/article", json!({}));

        let manager = EntitlementsManager::new(harness.deps());
        manager.get_entitlements(None).await.unwrap();

        let query = query_of(&harness.fetcher.fetched_urls()[0]);
        assert_eq!(query["locked"], "true");
        assert_eq!(query["contentType"], "CLOSED");
        let decoded: Value = serde_json::from_slice(
            &BASE64_URL.decode(&query["encodedEntitlementsParams"]).unwrap(),
        )
        .unwrap();
        assert_eq!(decoded["metering"]["clientTypes"], json!([2]));
        assert_eq!(decoded["metering"]["owner"], "pub1");
    }

    #[tokio::test]
    async fn test_showcase_metering_state_params() {
        let mut harness = TestHarness::new();
        harness.page = harness.page.clone().with_url(&harness.gaa_url("g"));
        harness.fetcher.respond("/article", json!({}));

        let manager = EntitlementsManager::new(harness.deps());
        let params = GetEntitlementsParams {
            metering: Some(MeteringState {
                id: "user1".into(),
                standard_attributes: BTreeMap::from([("registered_user".to_string(), 100)]),
                custom_attributes: BTreeMap::from([("bad".to_string(), 0)]),
            }),
            ..Default::default()
        };
        manager.get_entitlements(Some(params)).await.unwrap();

        let query = query_of(&harness.fetcher.fetched_urls()[0]);
        let decoded: Value = serde_json::from_slice(
            &BASE64_URL.decode(&query["encodedEntitlementsParams"]).unwrap(),
        )
        .unwrap();
        let metering = &decoded["metering"];
        assert_eq!(metering["clientTypes"], json!([1]));
        assert_eq!(metering["token"], "nonce");
        assert_eq!(metering["state"]["id"], "user1");
        assert_eq!(
            metering["state"]["attributes"],
            json!([
                {"name": "standard_registered_user", "timestamp": 100},
                {"name": "custom_bad", "timestamp": 0}
            ])
        );
    }

    #[tokio::test]
    async fn test_reset_expect_positive_wipes_cache_and_arms_budget() {
        let harness = TestHarness::new();
        harness
            .storage
            .set(StorageKey::Entitlements, "a.b.c", StorageTier::Session)
            .await
            .unwrap();
        harness
            .storage
            .set(StorageKey::IsReadyToPay, "true", StorageTier::Session)
            .await
            .unwrap();
        let manager = EntitlementsManager::new(harness.deps());

        manager.reset(false).await.unwrap();
        assert_eq!(manager.positive_retries(), 0);
        assert!(harness.storage.peek(StorageKey::Entitlements, StorageTier::Session).is_some());

        manager.reset(true).await.unwrap();
        assert_eq!(manager.positive_retries(), POSITIVE_RETRY_BUDGET);
        assert!(harness.storage.peek(StorageKey::Entitlements, StorageTier::Session).is_none());
        assert!(harness.storage.peek(StorageKey::IsReadyToPay, StorageTier::Session).is_none());

        // Never lowered by a plain reset
        manager.reset(false).await.unwrap();
        assert_eq!(manager.positive_retries(), POSITIVE_RETRY_BUDGET);

        manager.clear().await.unwrap();
        assert_eq!(manager.positive_retries(), 0);
    }

    #[tokio::test]
    async fn test_push_next_entitlements() {
        let harness = TestHarness::new();
        let manager = EntitlementsManager::new(harness.deps());

        let valid = signed_entitlements(news_grant(), TEST_NOW_MS / 1000 + 60);
        assert!(manager.push_next_entitlements(&valid, false).await.unwrap());
        assert_eq!(
            harness.storage.peek(StorageKey::Entitlements, StorageTier::Session),
            Some(valid)
        );

        let other = signed_entitlements(
            json!([{"source": "google", "products": ["pub2:x"]}]),
            TEST_NOW_MS / 1000 + 60,
        );
        assert!(!manager.push_next_entitlements(&other, false).await.unwrap());

        let expired = signed_entitlements(news_grant(), TEST_NOW_MS / 1000 - 60);
        assert!(!manager.push_next_entitlements(&expired, false).await.unwrap());
        assert!(!manager.push_next_entitlements("nope", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_notification_toast_and_ack() {
        let harness = TestHarness::new();
        harness.fetcher.respond(
            "/article",
            json!({"entitlements": {"entitlements": news_grant()}}),
        );
        let manager = EntitlementsManager::new(harness.deps());
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            manager.set_on_entitlements_response(Arc::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let ents = manager.get_entitlements(None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(harness.presenter.toasts(), vec![GOOGLE_SOURCE.to_string()]);
        let logged: Vec<_> = harness.events.logged_events().iter().map(|e| e.event_type).collect();
        assert!(logged.contains(&AnalyticsEvent::EventUnlockedBySubscription));

        ents.ack();
        manager.settled().await;
        assert_eq!(
            harness.storage.peek(StorageKey::Toast, StorageTier::Session).as_deref(),
            Some("1")
        );

        // Toast is not shown again once acknowledged
        manager.reset(false).await.unwrap();
        manager.get_entitlements(None).await.unwrap();
        assert_eq!(harness.presenter.toasts().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_blocked_notification_and_toast() {
        let harness = TestHarness::new();
        harness.fetcher.respond(
            "/article",
            json!({"entitlements": {"entitlements": news_grant()}}),
        );
        let manager = EntitlementsManager::new(harness.deps());

        manager.block_next_notification();
        manager.get_entitlements(None).await.unwrap();
        assert!(harness.events.logged_events().iter().all(|e| e.event_type != AnalyticsEvent::EventUnlockedBySubscription));

        manager.reset(false).await.unwrap();
        manager.block_next_toast();
        manager.get_entitlements(None).await.unwrap();
        assert!(harness.presenter.toasts().is_empty());

        manager.reset(false).await.unwrap();
        manager.get_entitlements(None).await.unwrap();
        assert_eq!(harness.presenter.toasts().len(), 1);
    }

    #[tokio::test]
    async fn test_no_entitlements_event() {
        let harness = TestHarness::new();
        harness.fetcher.respond("/article", json!({}));
        let manager = EntitlementsManager::new(harness.deps());

        manager.get_entitlements(None).await.unwrap();
        assert!(harness
            .events
            .logged_events()
            .iter()
            .any(|e| e.event_type == AnalyticsEvent::EventNoEntitlements));
    }

    #[tokio::test]
    async fn test_crawler_unlock_event() {
        let harness = TestHarness::new();
        harness.fetcher.respond(
            "/article",
            json!({"entitlements": {"entitlements": {"source": "privileged", "products": ["pub1:news"]}}}),
        );
        let manager = EntitlementsManager::new(harness.deps());

        manager.get_entitlements(None).await.unwrap();
        let unlock = harness
            .events
            .logged_events()
            .into_iter()
            .find(|e| e.event_type == AnalyticsEvent::EventUnlockedForCrawler)
            .unwrap();
        assert_eq!(
            unlock.additional_parameters.and_then(|p| p.is_user_registered),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_article_accessors() {
        let harness = TestHarness::new();
        harness.fetcher.respond(
            "/article",
            json!({
                "audienceActions": {"actions": [
                    {"type": "TYPE_REGISTRATION_WALL"},
                    {"type": "TYPE_NEWSLETTER_SIGNUP"},
                    {"type": "TYPE_REWARDED_AD"}
                ]},
                "experimentConfig": {"experimentFlags": ["flag_a"]}
            }),
        );
        let manager = EntitlementsManager::new(harness.deps());

        assert!(manager.get_article().await.unwrap().is_none());
        assert!(manager.get_available_interventions().await.unwrap().is_none());

        manager.get_entitlements(None).await.unwrap();
        assert!(manager.get_article().await.unwrap().is_some());
        assert_eq!(
            manager.get_experiment_config_flags().await.unwrap(),
            vec!["flag_a".to_string()]
        );
        assert_eq!(
            manager.get_available_interventions().await.unwrap(),
            Some(vec![
                InterventionType::NewsletterSignup,
                InterventionType::RewardedAd
            ])
        );
        assert_eq!(harness.fetcher.fetch_count("/article"), 1);
    }

    #[tokio::test]
    async fn test_publisher_events_are_pinged_back_with_gaa() {
        let mut harness = TestHarness::new();
        harness.page = harness.page.clone().with_url(&harness.gaa_url("na"));
        let manager = EntitlementsManager::new(harness.deps());

        let params = EventParams {
            is_user_registered: Some(false),
            subscription_timestamp: None,
        };
        harness
            .events
            .log_event(ClientEvent::showcase(AnalyticsEvent::ImpressionRegwall).with_params(params))
            .await;
        // Meter unlocks from the library are left to consumption
        harness
            .events
            .log_swg_event(AnalyticsEvent::EventUnlockedByMeter, false, None)
            .await;
        harness
            .events
            .log_swg_event(AnalyticsEvent::EventUnlockedBySubscription, false, None)
            .await;
        manager.settled().await;

        let posts = harness.fetcher.posts();
        assert_eq!(posts.len(), 2);
        let (url, first) = &posts[0];
        assert!(url.contains("/publication/pub1/article?"));
        assert_eq!(first.entitlement_source, EntitlementSource::PublisherEntitlement);
        assert_eq!(first.entitlement_result, EntitlementResult::LockedRegwall);
        assert_eq!(first.token.as_deref(), Some("nonce"));
        assert_eq!(first.is_user_registered, Some(false));
        assert_eq!(first.used_entitlement, Some(EntitlementJwt::default()));
        assert_eq!(first.client_event_time, Some(Timestamp::from_millis(TEST_NOW_MS)));

        assert_eq!(
            posts[1].1.entitlement_source,
            EntitlementSource::GoogleSubscriberEntitlement
        );
    }

    #[tokio::test]
    async fn test_events_without_gaa_are_not_pinged_back() {
        let harness = TestHarness::new();
        let manager = EntitlementsManager::new(harness.deps());

        harness
            .events
            .log_event(ClientEvent::showcase(AnalyticsEvent::ImpressionPaywall))
            .await;
        manager.settled().await;
        assert!(harness.fetcher.posts().is_empty());
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }

    #[tokio::test]
    async fn test_finished_background_tasks_are_dropped() {
        let harness = TestHarness::new();
        let manager = EntitlementsManager::new(harness.deps());

        manager.spawn(async {});
        while !lock(&manager.tasks).iter().all(JoinHandle::is_finished) {
            tokio::task::yield_now().await;
        }
        manager.spawn(std::future::pending());
        assert_eq!(lock(&manager.tasks).len(), 1);

        for task in lock(&manager.tasks).drain(..) {
            task.abort();
        }
    }
}
