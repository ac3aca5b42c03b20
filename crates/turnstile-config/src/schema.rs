//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    pub publication: RawPublication,

    #[serde(default)]
    pub runtime: RawRuntime,

    #[serde(default)]
    pub page: RawPage,
}

/// Publication the client runs for
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPublication {
    /// Publication id, e.g. "example.com"
    #[serde(default)]
    pub id: String,

    /// Product of the current page, e.g. "example.com:premium".
    /// Defaults to the publication wildcard.
    pub product_id: Option<String>,

    /// Page is hard paygated
    #[serde(default)]
    pub locked: bool,

    /// Publisher provided id forwarded as `ppid`
    pub publisher_provided_id: Option<String>,
}

/// Client runtime settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRuntime {
    /// Base URL of the entitlements service
    pub service_url: Option<String>,

    /// Consume Google metering grants automatically (default: true)
    pub enable_default_metering_handler: Option<bool>,

    /// Ask the service for metered-by-Google grants
    #[serde(default)]
    pub enable_metered_by_google: bool,

    #[serde(default)]
    pub skip_account_creation_screen: bool,

    /// Data directory for storage
    pub data_dir: Option<PathBuf>,
}

/// Page the decision runs for
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPage {
    /// Full page URL including query and fragment
    pub url: Option<String>,

    pub canonical_url: Option<String>,

    /// Viewport width in CSS pixels (default: 1024)
    pub viewport_width: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
            config_version = 1

            [publication]
            id = "example.com"
            product_id = "example.com:premium"
            locked = true

            [runtime]
            service_url = "https://news.example.org"
            enable_metered_by_google = true

            [page]
            url = "https://example.com/a?gaa_n=n#swg.deventitlement=x"
            viewport_width = 400
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.publication.id, "example.com");
        assert!(config.publication.locked);
        assert!(config.runtime.enable_metered_by_google);
        assert_eq!(config.runtime.enable_default_metering_handler, None);
        assert_eq!(config.page.viewport_width, Some(400));
    }

    #[test]
    fn sections_other_than_publication_are_optional() {
        let toml_str = r#"
            config_version = 1

            [publication]
            id = "example.com"
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert!(config.runtime.service_url.is_none());
        assert!(config.page.url.is_none());
        assert!(!config.publication.locked);
    }
}
