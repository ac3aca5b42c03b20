//! Strongly-typed identifiers for turnstile

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Publication identifier, e.g. `example.com`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicationId(String);

impl PublicationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PublicationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PublicationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Product identifier of the form `publication:label`.
///
/// A label of `*` addresses every product of the publication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(String);

impl ProductId {
    pub const WILDCARD_LABEL: &'static str = "*";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Wildcard product for a publication, `publication:*`
    pub fn wildcard(publication: &str) -> Self {
        Self(format!("{}:{}", publication, Self::WILDCARD_LABEL))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split at the first `:` into prefix and label
    pub fn split(&self) -> Option<(&str, &str)> {
        self.0.split_once(':')
    }

    pub fn prefix(&self) -> Option<&str> {
        self.split().map(|(prefix, _)| prefix)
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.split(), Some((_, Self::WILDCARD_LABEL)))
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for a single page view (one resolution/decision cycle)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageViewId(Uuid);

impl PageViewId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PageViewId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_id_split() {
        let product = ProductId::new("example.com:premium");
        assert_eq!(product.split(), Some(("example.com", "premium")));
        assert_eq!(product.prefix(), Some("example.com"));
        assert!(!product.is_wildcard());

        assert_eq!(ProductId::new("no-colon").split(), None);
    }

    #[test]
    fn product_id_wildcard() {
        let product = ProductId::wildcard("example.com");
        assert_eq!(product.as_str(), "example.com:*");
        assert!(product.is_wildcard());
    }

    #[test]
    fn page_view_id_uniqueness() {
        let a = PageViewId::new();
        let b = PageViewId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_serialize_deserialize() {
        let publication = PublicationId::new("example.com");
        let json = serde_json::to_string(&publication).unwrap();
        assert_eq!(json, "\"example.com\"");
        let parsed: PublicationId = serde_json::from_str(&json).unwrap();
        assert_eq!(publication, parsed);
    }
}
