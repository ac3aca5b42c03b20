//! Entitlement model and matching rules

use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use turnstile_api::{SERVICE_ID, Timestamp};
use turnstile_util::ProductId;

use crate::jwt::decode_jwt;

/// Grants from a Google subscription
pub const GOOGLE_SOURCE: &str = "google";

/// Single-use metering grants
pub const GOOGLE_METERING_SOURCE: &str = "google:metering";

/// Grants given to crawlers and similar privileged readers
pub const PRIVILEGED_SOURCE: &str = "privileged";

/// Third-party token that unlocks everything in dev mode
pub const DEV_MODE_TOKEN: &str = "GOOGLE_DEV_MODE_TOKEN";

/// Marker inside first-party tokens minted in dev mode
pub const DEV_MODE_ORDER: &str = "GOOGLE_DEV_MODE_ORDER";

/// A single grant
#[derive(Debug, Clone, PartialEq)]
pub struct Entitlement {
    pub source: String,
    pub products: Vec<String>,
    pub subscription_token: String,
    /// Decoded token claims, absent when the token is not a JWT
    pub subscription_token_contents: Option<Value>,
    pub subscription_timestamp: Option<Timestamp>,
}

impl Entitlement {
    pub fn new(
        source: impl Into<String>,
        products: Vec<String>,
        subscription_token: impl Into<String>,
    ) -> Self {
        let subscription_token = subscription_token.into();
        let subscription_token_contents = decode_jwt(&subscription_token).ok();
        Self {
            source: source.into(),
            products,
            subscription_token,
            subscription_token_contents,
            subscription_timestamp: None,
        }
    }

    /// Build from a raw JSON grant. Missing fields default to empty.
    pub fn parse_from_json(json: &Value) -> Self {
        let text = |key: &str| json.get(key).and_then(Value::as_str).unwrap_or("");
        let products = json
            .get("products")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut entitlement = Self::new(text("source"), products, text("subscriptionToken"));
        entitlement.subscription_timestamp = json
            .get("subscriptionTimestamp")
            .and_then(|ts| serde_json::from_value(ts.clone()).ok());
        entitlement
    }

    /// Accepts a single grant object or an array of them
    pub fn parse_list_from_json(json: &Value) -> Vec<Self> {
        match json {
            Value::Array(items) => items.iter().map(Self::parse_from_json).collect(),
            Value::Null => Vec::new(),
            other => vec![Self::parse_from_json(other)],
        }
    }

    /// Whether this grant unlocks `product`.
    ///
    /// A held `pub:*` unlocks every `pub:<label>`, and a `pub:*` query is met
    /// by any held product under `pub:`.
    pub fn enables(&self, product: &str) -> bool {
        if product.is_empty() {
            return false;
        }

        if let Some(idx) = product.find(':') {
            let publication = &product[..=idx];
            let wildcard = format!("{}{}", publication, ProductId::WILDCARD_LABEL);

            if product == wildcard && self.products.iter().any(|p| p.starts_with(publication)) {
                return true;
            }
            if self.products.iter().any(|p| *p == wildcard) {
                return true;
            }
        }

        self.products.iter().any(|p| p == product)
    }

    pub fn is_metering(&self) -> bool {
        self.source == GOOGLE_METERING_SOURCE
    }

    /// SKU of a Google subscription whose token is a JSON purchase record
    pub fn get_sku(&self) -> Option<String> {
        if self.source != GOOGLE_SOURCE {
            return None;
        }

        let sku = serde_json::from_str::<Value>(&self.subscription_token)
            .ok()
            .and_then(|token| token.get("productId").and_then(Value::as_str).map(str::to_string));
        if sku.is_none() {
            warn!(source = %self.source, "Unable to retrieve SKU from entitlement");
        }
        sku
    }

    fn metering_claims(&self) -> Option<&Value> {
        self.subscription_token_contents.as_ref()?.get("metering")
    }

    /// `metering.clientType` from the token claims
    pub fn metering_client_type(&self) -> Option<u32> {
        self.metering_claims()?
            .get("clientType")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Whether the metering claims ask for a toast before the meter is used
    pub fn metering_show_toast(&self) -> bool {
        self.metering_claims()
            .and_then(|m| m.get("showToast"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn metering_user_attribute(&self) -> Option<&str> {
        self.metering_claims()?
            .get("clientUserAttribute")
            .and_then(Value::as_str)
    }

    pub fn json(&self) -> Value {
        json!({
            "source": self.source,
            "products": self.products,
            "subscriptionToken": self.subscription_token,
        })
    }
}

/// Side effects a resolved bundle can trigger
pub trait EntitlementsHandler: Send + Sync {
    /// Record that the reader saw the access toast
    fn ack(&self, entitlements: &Entitlements);

    /// Use up a metering grant. `on_close` runs once any meter toast is gone.
    fn consume(&self, entitlements: &Entitlements, on_close: Option<Box<dyn FnOnce() + Send>>);
}

/// Handler for bundles that are never acted on
#[derive(Debug, Default)]
pub struct NoopHandler;

impl EntitlementsHandler for NoopHandler {
    fn ack(&self, _entitlements: &Entitlements) {}

    fn consume(&self, _entitlements: &Entitlements, on_close: Option<Box<dyn FnOnce() + Send>>) {
        if let Some(on_close) = on_close {
            on_close();
        }
    }
}

/// A resolved set of grants for one page.
///
/// Cloning copies the data and shares the handler.
#[derive(Clone)]
pub struct Entitlements {
    pub service: String,
    /// Signed payload the grants came from, empty when none
    pub raw: String,
    pub entitlements: Vec<Entitlement>,
    product: Option<ProductId>,
    pub is_ready_to_pay: bool,
    pub decrypted_document_key: Option<String>,
    handler: Arc<dyn EntitlementsHandler>,
}

impl Entitlements {
    pub fn new(
        raw: impl Into<String>,
        entitlements: Vec<Entitlement>,
        product: Option<ProductId>,
        handler: Arc<dyn EntitlementsHandler>,
    ) -> Self {
        Self {
            service: SERVICE_ID.to_string(),
            raw: raw.into(),
            entitlements,
            product,
            is_ready_to_pay: false,
            decrypted_document_key: None,
            handler,
        }
    }

    /// A bundle that unlocks nothing
    pub fn empty(product: Option<ProductId>, handler: Arc<dyn EntitlementsHandler>) -> Self {
        Self::new("", Vec::new(), product, handler)
    }

    pub fn with_ready_to_pay(mut self, is_ready_to_pay: bool) -> Self {
        self.is_ready_to_pay = is_ready_to_pay;
        self
    }

    pub fn with_decrypted_document_key(mut self, key: Option<String>) -> Self {
        self.decrypted_document_key = key;
        self
    }

    pub fn product(&self) -> Option<&ProductId> {
        self.product.as_ref()
    }

    /// The grant for `product`, optionally restricted to `source`.
    ///
    /// The first non-metering match wins over the first metering match.
    pub fn get_entitlement_for(
        &self,
        product: Option<&str>,
        source: Option<&str>,
    ) -> Option<&Entitlement> {
        let Some(product) = product else {
            warn!("No product to look up an entitlement for");
            return None;
        };
        // An empty source does not filter
        let source = source.filter(|s| !s.is_empty());

        let mut metering = None;
        for entitlement in self
            .entitlements
            .iter()
            .filter(|e| e.enables(product) && source.is_none_or(|s| e.source == s))
        {
            if !entitlement.is_metering() {
                return Some(entitlement);
            }
            metering.get_or_insert(entitlement);
        }
        metering
    }

    pub fn get_entitlement_for_this(&self, source: Option<&str>) -> Option<&Entitlement> {
        self.get_entitlement_for(self.product.as_ref().map(ProductId::as_str), source)
    }

    /// First grant from `source` that carries a token
    pub fn get_entitlement_for_source(&self, source: &str) -> Option<&Entitlement> {
        self.entitlements
            .iter()
            .find(|e| !e.subscription_token.is_empty() && e.source == source)
    }

    pub fn enables(&self, product: Option<&str>, source: Option<&str>) -> bool {
        self.get_entitlement_for(product, source).is_some()
    }

    pub fn enables_this(&self, source: Option<&str>) -> bool {
        self.get_entitlement_for_this(source).is_some()
    }

    /// Whether any grant holds at least one product
    pub fn enables_any(&self, source: Option<&str>) -> bool {
        self.entitlements
            .iter()
            .any(|e| !e.products.is_empty() && source.is_none_or(|s| e.source == s))
    }

    pub fn enables_this_with_google_metering(&self) -> bool {
        self.get_entitlement_for_this(None)
            .is_some_and(Entitlement::is_metering)
    }

    pub fn enables_this_with_google_dev_mode(&self) -> bool {
        self.get_entitlement_for_this(None).is_some_and(|e| {
            (e.source == GOOGLE_SOURCE && e.subscription_token.contains(DEV_MODE_ORDER))
                || e.subscription_token == DEV_MODE_TOKEN
        })
    }

    /// Grants that may be written to the cache: neither metering nor dev mode
    pub fn enables_this_with_cacheable_entitlements(&self) -> bool {
        self.enables_this(None)
            && !self.enables_this_with_google_metering()
            && !self.enables_this_with_google_dev_mode()
    }

    pub fn ack(&self) {
        self.handler.ack(self);
    }

    pub fn consume(&self, on_close: Option<Box<dyn FnOnce() + Send>>) {
        self.handler.consume(self, on_close);
    }

    pub fn json(&self) -> Value {
        json!({
            "service": self.service,
            "entitlements": self.entitlements.iter().map(Entitlement::json).collect::<Vec<_>>(),
            "isReadyToPay": self.is_ready_to_pay,
        })
    }
}

impl fmt::Debug for Entitlements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entitlements")
            .field("service", &self.service)
            .field("entitlements", &self.entitlements)
            .field("product", &self.product)
            .field("is_ready_to_pay", &self.is_ready_to_pay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::encode_unsigned_jwt;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn grant(source: &str, products: &[&str]) -> Entitlement {
        Entitlement::new(
            source,
            products.iter().map(|p| p.to_string()).collect(),
            "token",
        )
    }

    fn bundle(entitlements: Vec<Entitlement>, product: &str) -> Entitlements {
        Entitlements::new(
            "raw",
            entitlements,
            Some(ProductId::new(product)),
            Arc::new(NoopHandler),
        )
    }

    #[test]
    fn test_parse_defaults_missing_fields() {
        let e = Entitlement::parse_from_json(&json!({}));
        assert_eq!(e.source, "");
        assert!(e.products.is_empty());
        assert_eq!(e.subscription_token, "");
        assert!(e.subscription_token_contents.is_none());
        assert!(e.subscription_timestamp.is_none());
    }

    #[test]
    fn test_parse_decodes_token_and_timestamp() {
        let token = encode_unsigned_jwt(&json!({"metering": {"clientType": 1, "showToast": true}}));
        let e = Entitlement::parse_from_json(&json!({
            "source": "google:metering",
            "products": ["pub1:news"],
            "subscriptionToken": token,
            "subscriptionTimestamp": {"seconds_": 12, "nanos_": 34}
        }));
        assert_eq!(e.metering_client_type(), Some(1));
        assert!(e.metering_show_toast());
        assert_eq!(e.subscription_timestamp, Some(Timestamp::new(12, 34)));

        let e = Entitlement::parse_from_json(&json!({
            "subscriptionTimestamp": {"seconds": 5}
        }));
        assert_eq!(e.subscription_timestamp, Some(Timestamp::new(5, 0)));

        let e = Entitlement::parse_from_json(&json!({"subscriptionTimestamp": "bad"}));
        assert!(e.subscription_timestamp.is_none());
    }

    #[test]
    fn test_parse_list_accepts_object_or_array() {
        let one = Entitlement::parse_list_from_json(&json!({"source": "a"}));
        assert_eq!(one.len(), 1);
        let many = Entitlement::parse_list_from_json(&json!([{"source": "a"}, {"source": "b"}]));
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].source, "b");
        assert!(Entitlement::parse_list_from_json(&Value::Null).is_empty());
    }

    #[test]
    fn test_enables() {
        let e = grant("google", &["pub1:news"]);
        assert!(e.enables("pub1:news"));
        assert!(e.enables("pub1:*"));
        assert!(!e.enables("pub1:sports"));
        assert!(!e.enables("pub2:*"));
        assert!(!e.enables(""));

        let wildcard = grant("google", &["pub1:*"]);
        assert!(wildcard.enables("pub1:anything"));
        assert!(!wildcard.enables("pub2:anything"));

        let bare = grant("google", &["plain"]);
        assert!(bare.enables("plain"));
        assert!(!bare.enables("pla"));
    }

    #[test]
    fn test_sku() {
        let e = Entitlement::new("google", vec![], r#"{"productId":"sku1"}"#);
        assert_eq!(e.get_sku().as_deref(), Some("sku1"));
        assert_eq!(Entitlement::new("google", vec![], "a.b.c").get_sku(), None);
        assert_eq!(
            Entitlement::new("other", vec![], r#"{"productId":"sku1"}"#).get_sku(),
            None
        );
    }

    #[test]
    fn test_lookups() {
        let ents = bundle(
            vec![
                grant("google:metering", &["pub1:news"]),
                grant("publisher", &["pub1:sports"]),
                Entitlement::new("google", vec![], ""),
            ],
            "pub1:news",
        );

        assert!(ents.enables_this(None));
        assert!(ents.enables_this_with_google_metering());
        assert!(!ents.enables_this_with_cacheable_entitlements());
        assert!(ents.enables(Some("pub1:sports"), Some("publisher")));
        assert!(!ents.enables(Some("pub1:sports"), Some("google")));
        assert!(!ents.enables(None, None));
        assert!(ents.enables_any(None));
        assert!(!ents.enables_any(Some("google")));
        assert_eq!(
            ents.get_entitlement_for_source("publisher").map(|e| e.source.as_str()),
            Some("publisher")
        );
        assert!(ents.get_entitlement_for_source("google").is_none());
    }

    #[test]
    fn test_empty_source_matches_any() {
        let ents = bundle(vec![grant("publisher", &["pub1:news"])], "pub1:news");
        assert_eq!(
            ents.get_entitlement_for_this(Some("")).map(|e| e.source.as_str()),
            Some("publisher")
        );
        assert!(ents.enables(Some("pub1:news"), Some("")));
        assert!(ents.get_entitlement_for_this(Some("google")).is_none());
    }

    #[test]
    fn test_dev_mode_is_not_cacheable() {
        let first_party = Entitlement::new(
            GOOGLE_SOURCE,
            vec!["pub1:news".into()],
            format!("{{\"orderId\":\"{}\"}}", DEV_MODE_ORDER),
        );
        let ents = bundle(vec![first_party], "pub1:news");
        assert!(ents.enables_this_with_google_dev_mode());
        assert!(!ents.enables_this_with_cacheable_entitlements());

        let third_party = Entitlement::new("publisher", vec!["pub1:news".into()], DEV_MODE_TOKEN);
        let ents = bundle(vec![third_party], "pub1:news");
        assert!(ents.enables_this_with_google_dev_mode());

        let ents = bundle(vec![grant("google", &["pub1:news"])], "pub1:news");
        assert!(!ents.enables_this_with_google_dev_mode());
        assert!(ents.enables_this_with_cacheable_entitlements());
    }

    #[test]
    fn test_json_rendering() {
        let ents = bundle(vec![grant("google", &["pub1:news"])], "pub1:news").with_ready_to_pay(true);
        assert_eq!(
            ents.json(),
            json!({
                "service": "subscribe.google.com",
                "entitlements": [{"source": "google", "products": ["pub1:news"], "subscriptionToken": "token"}],
                "isReadyToPay": true
            })
        );
    }

    #[test]
    fn test_clone_shares_handler() {
        struct Counting(AtomicUsize);
        impl EntitlementsHandler for Counting {
            fn ack(&self, _: &Entitlements) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn consume(&self, _: &Entitlements, _: Option<Box<dyn FnOnce() + Send>>) {}
        }

        let handler = Arc::new(Counting(AtomicUsize::new(0)));
        let ents = Entitlements::new("", vec![], None, handler.clone());
        let copy = ents.clone();
        ents.ack();
        copy.ack();
        assert_eq!(handler.0.load(Ordering::SeqCst), 2);
    }

    fn arb_grant() -> impl Strategy<Value = Entitlement> {
        (
            prop_oneof![
                Just("google"),
                Just("google:metering"),
                Just("privileged"),
                Just("publisher")
            ],
            proptest::collection::vec(
                prop_oneof![
                    Just("pub1:news"),
                    Just("pub1:*"),
                    Just("pub1:sports"),
                    Just("pub2:news")
                ],
                0..3,
            ),
        )
            .prop_map(|(source, products)| grant(source, &products))
    }

    proptest! {
        #[test]
        fn priority_prefers_non_metering(
            grants in proptest::collection::vec(arb_grant(), 0..8),
            product in prop_oneof![Just("pub1:news"), Just("pub1:*"), Just("pub2:news")],
        ) {
            let ents = bundle(grants.clone(), product);
            let found = ents.get_entitlement_for(Some(product), None);

            let first_non_metering = grants.iter().find(|e| e.enables(product) && !e.is_metering());
            let first_metering = grants.iter().find(|e| e.enables(product) && e.is_metering());

            match (first_non_metering, first_metering) {
                (Some(expected), _) => prop_assert_eq!(found, Some(expected)),
                (None, Some(expected)) => prop_assert_eq!(found, Some(expected)),
                (None, None) => prop_assert!(found.is_none()),
            }

            // Order never changes which kind wins
            let mut reversed = grants.clone();
            reversed.reverse();
            let found_reversed = bundle(reversed, product)
                .get_entitlement_for(Some(product), None)
                .map(Entitlement::is_metering);
            prop_assert_eq!(found.map(Entitlement::is_metering), found_reversed);
        }

        #[test]
        fn wildcard_law(pub_name in "[a-z]{1,8}", label in "[a-z]{1,8}") {
            let wildcard = format!("{}:*", pub_name);
            let specific = format!("{}:{}", pub_name, label);

            prop_assert!(grant("google", &[wildcard.as_str()]).enables(&specific));
            prop_assert!(grant("google", &[specific.as_str()]).enables(&wildcard));
        }
    }
}
