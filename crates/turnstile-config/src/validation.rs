//! Configuration validation

use crate::schema::{RawConfig, RawPage, RawPublication, RawRuntime};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("publication.id must not be empty")]
    MissingPublicationId,

    #[error("Invalid product id '{value}': {message}")]
    InvalidProductId { value: String, message: String },

    #[error("Invalid URL for {field} '{value}': {message}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        message: String,
    },

    #[error("page.viewport_width must be greater than zero")]
    ZeroViewportWidth,
}

/// Validate a raw configuration, collecting every problem
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    errors.extend(validate_publication(&config.publication));
    errors.extend(validate_runtime(&config.runtime));
    errors.extend(validate_page(&config.page));

    errors
}

fn validate_publication(publication: &RawPublication) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if publication.id.trim().is_empty() {
        errors.push(ValidationError::MissingPublicationId);
    }

    if let Some(product) = &publication.product_id
        && let Err(message) = parse_product_id(product)
    {
        errors.push(ValidationError::InvalidProductId {
            value: product.clone(),
            message,
        });
    }

    errors
}

fn validate_runtime(runtime: &RawRuntime) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(url) = &runtime.service_url
        && let Err(message) = check_http_url(url)
    {
        errors.push(ValidationError::InvalidUrl {
            field: "runtime.service_url",
            value: url.clone(),
            message,
        });
    }

    errors
}

fn validate_page(page: &RawPage) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (field, value) in [("page.url", &page.url), ("page.canonical_url", &page.canonical_url)] {
        if let Some(url) = value
            && let Err(message) = check_http_url(url)
        {
            errors.push(ValidationError::InvalidUrl {
                field,
                value: url.clone(),
                message,
            });
        }
    }

    if page.viewport_width == Some(0) {
        errors.push(ValidationError::ZeroViewportWidth);
    }

    errors
}

/// Parse `prefix:label` into its parts
pub fn parse_product_id(s: &str) -> Result<(&str, &str), String> {
    let (prefix, label) = s
        .split_once(':')
        .ok_or_else(|| "Expected prefix:label format".to_string())?;

    if prefix.is_empty() {
        return Err("Prefix cannot be empty".into());
    }
    if label.is_empty() {
        return Err("Label cannot be empty".into());
    }

    Ok((prefix, label))
}

fn check_http_url(s: &str) -> Result<(), String> {
    let rest = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
        .ok_or_else(|| "Expected an http or https URL".to_string())?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err("Missing host".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str) -> RawConfig {
        RawConfig {
            config_version: 1,
            publication: RawPublication {
                id: id.into(),
                ..Default::default()
            },
            runtime: Default::default(),
            page: Default::default(),
        }
    }

    #[test]
    fn test_parse_product_id() {
        assert_eq!(parse_product_id("pub:premium").unwrap(), ("pub", "premium"));
        assert_eq!(parse_product_id("pub:*").unwrap(), ("pub", "*"));

        assert!(parse_product_id("premium").is_err());
        assert!(parse_product_id(":premium").is_err());
        assert!(parse_product_id("pub:").is_err());
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&raw("example.com")).is_empty());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = raw(" ");
        config.publication.product_id = Some("premium".into());
        config.runtime.service_url = Some("ftp://service".into());
        config.page.url = Some("https:///path".into());
        config.page.viewport_width = Some(0);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::MissingPublicationId));
        assert!(errors.contains(&ValidationError::ZeroViewportWidth));
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::InvalidProductId { .. }))
        );
    }

    #[test]
    fn test_product_of_other_publication_is_allowed() {
        let mut config = raw("example.com");
        config.publication.product_id = Some("other.com:basic".into());
        assert!(validate_config(&config).is_empty());
    }
}
