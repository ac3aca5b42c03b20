//! Validated client settings

use crate::schema::{RawConfig, RawPage, RawRuntime};
use std::path::PathBuf;
use turnstile_util::{ProductId, PublicationId, default_data_dir};

/// Service used when the config does not name one
pub const DEFAULT_SERVICE_URL: &str = "https://news.google.com";

/// Viewport width assumed when the config does not name one
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1024;

/// Validated settings ready for use by the core managers
#[derive(Debug, Clone)]
pub struct Settings {
    pub publication_id: PublicationId,

    /// Product of the current page
    pub product_id: ProductId,

    /// Page is hard paygated
    pub locked: bool,

    pub publisher_provided_id: Option<String>,

    pub runtime: RuntimeSettings,

    pub page: PageSettings,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let publication_id = PublicationId::new(raw.publication.id.trim());
        let product_id = raw
            .publication
            .product_id
            .map(ProductId::new)
            .unwrap_or_else(|| ProductId::wildcard(publication_id.as_str()));

        Self {
            publication_id,
            product_id,
            locked: raw.publication.locked,
            publisher_provided_id: raw.publication.publisher_provided_id,
            runtime: RuntimeSettings::from_raw(raw.runtime),
            page: PageSettings::from_raw(raw.page),
        }
    }

    /// Minimal settings for a publication, everything else defaulted
    pub fn for_publication(publication_id: impl Into<String>) -> Self {
        let publication_id = PublicationId::new(publication_id);
        Self {
            product_id: ProductId::wildcard(publication_id.as_str()),
            publication_id,
            locked: false,
            publisher_provided_id: None,
            runtime: RuntimeSettings::default(),
            page: PageSettings::default(),
        }
    }
}

/// Client runtime settings
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub service_url: String,
    pub enable_default_metering_handler: bool,
    pub enable_metered_by_google: bool,
    pub skip_account_creation_screen: bool,
    pub data_dir: PathBuf,
}

impl RuntimeSettings {
    fn from_raw(raw: RawRuntime) -> Self {
        Self {
            service_url: raw
                .service_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            enable_default_metering_handler: raw.enable_default_metering_handler.unwrap_or(true),
            enable_metered_by_google: raw.enable_metered_by_google,
            skip_account_creation_screen: raw.skip_account_creation_screen,
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_raw(RawRuntime::default())
    }
}

/// Page the client runs on
#[derive(Debug, Clone)]
pub struct PageSettings {
    pub url: Option<String>,
    pub canonical_url: Option<String>,
    pub viewport_width: u32,
}

impl PageSettings {
    fn from_raw(raw: RawPage) -> Self {
        Self {
            url: raw.url,
            canonical_url: raw.canonical_url,
            viewport_width: raw.viewport_width.unwrap_or(DEFAULT_VIEWPORT_WIDTH),
        }
    }
}

impl Default for PageSettings {
    fn default() -> Self {
        Self::from_raw(RawPage::default())
    }
}
