//! Page state the managers read: URL parameters, lock state, canonical URL

use sha2::{Digest, Sha512};
use std::collections::HashMap;
use turnstile_config::Settings;
use turnstile_util::{ProductId, PublicationId};

use crate::url::{parse_query_string, split_url};

/// Width above which the page counts as desktop
pub const DESKTOP_MIN_WIDTH: u32 = 480;

/// Query parameters carried by Google-authorized-access links
pub mod gaa {
    pub const ACCESS_TYPE: &str = "gaa_at";
    pub const NONCE: &str = "gaa_n";
    pub const SIGNATURE: &str = "gaa_sig";
    pub const TIMESTAMP: &str = "gaa_ts";

    /// Access type that grants nothing on its own
    pub const ACCESS_TYPE_NONE: &str = "na";
}

/// Snapshot of the page a resolution cycle runs for
#[derive(Debug, Clone)]
pub struct PageContext {
    pub publication_id: PublicationId,
    pub product_id: ProductId,

    /// Page is hard paygated
    pub locked: bool,

    pub viewport_width: u32,

    url: Option<String>,
    canonical_url: Option<String>,
    query: HashMap<String, String>,
    hash: HashMap<String, String>,
}

impl PageContext {
    pub fn new(publication_id: PublicationId, product_id: ProductId, locked: bool) -> Self {
        Self {
            publication_id,
            product_id,
            locked,
            viewport_width: turnstile_config::DEFAULT_VIEWPORT_WIDTH,
            url: None,
            canonical_url: None,
            query: HashMap::new(),
            hash: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut page = Self::new(
            settings.publication_id.clone(),
            settings.product_id.clone(),
            settings.locked,
        )
        .with_viewport_width(settings.page.viewport_width);

        if let Some(url) = &settings.page.url {
            page = page.with_url(url);
        }
        if let Some(canonical) = &settings.page.canonical_url {
            page = page.with_canonical_url(canonical);
        }
        page
    }

    /// Set the page URL, parsing its query and fragment parameters
    pub fn with_url(mut self, url: &str) -> Self {
        let (_, query, fragment) = split_url(url);
        self.query = parse_query_string(query);
        self.hash = parse_query_string(fragment);
        self.url = Some(url.to_string());
        self
    }

    pub fn with_canonical_url(mut self, url: &str) -> Self {
        self.canonical_url = Some(url.to_string());
        self
    }

    pub fn with_viewport_width(mut self, width: u32) -> Self {
        self.viewport_width = width;
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn hash_param(&self, name: &str) -> Option<&str> {
        self.hash.get(name).map(String::as_str)
    }

    pub fn is_desktop(&self) -> bool {
        self.viewport_width > DESKTOP_MIN_WIDTH
    }

    /// Whether the URL carries a complete, unexpired set of GAA parameters.
    ///
    /// Unless `allow_all_access_types` is set, the `na` access type does not
    /// count. A timestamp that is not hex counts as expired.
    pub fn has_fresh_gaa_params(&self, allow_all_access_types: bool, now_secs: i64) -> bool {
        let non_empty = |name| self.query_param(name).filter(|v| !v.is_empty());

        let (Some(access_type), Some(_), Some(_), Some(timestamp)) = (
            non_empty(gaa::ACCESS_TYPE),
            non_empty(gaa::NONCE),
            non_empty(gaa::SIGNATURE),
            non_empty(gaa::TIMESTAMP),
        ) else {
            return false;
        };

        if !allow_all_access_types && access_type == gaa::ACCESS_TYPE_NONE {
            return false;
        }

        match i64::from_str_radix(timestamp, 16) {
            Ok(expires_at) => expires_at >= now_secs,
            Err(_) => false,
        }
    }

    /// The `gaa_n` nonce, used as the access token in metering requests
    pub fn gaa_token(&self) -> Option<&str> {
        self.query_param(gaa::NONCE)
    }

    /// Canonical URL: the configured one, else origin and path of the page URL
    pub fn canonical_url(&self) -> String {
        if let Some(canonical) = &self.canonical_url {
            return canonical.clone();
        }
        self.url
            .as_deref()
            .map(|url| split_url(url).0.to_string())
            .unwrap_or_default()
    }

    /// Lowercase hex SHA-512 of the canonical URL
    pub fn hashed_canonical_url(&self) -> String {
        let digest = Sha512::digest(self.canonical_url().as_bytes());
        format!("{:x}", digest)
    }
}
