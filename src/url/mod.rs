//! URL handling module
//!
//! Canonicalization (the dedup key of the frontier) and politeness domain
//! extraction.

mod domain;
mod normalize;

use crate::UrlError;
use std::fmt;
use url::Url;

pub use domain::domain_of;
pub use normalize::normalize_url;

/// A URL in canonical form together with its politeness domain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl {
    url: Url,
    domain: String,
}

impl CanonicalUrl {
    /// Normalizes `raw` and extracts its domain
    ///
    /// Fails with a `UrlError` for malformed input, non-HTTP schemes and
    /// URLs without a host. Such URLs never enter the frontier.
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let url = normalize_url(raw)?;
        let domain = domain_of(&url).ok_or(UrlError::MissingHost)?;
        Ok(Self { url, domain })
    }

    /// The canonical string form (the dedup key)
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_url_parse() {
        let canonical = CanonicalUrl::parse("https://WWW.Example.com:8443/a/#x").unwrap();
        assert_eq!(canonical.as_str(), "https://www.example.com:8443/a");
        assert_eq!(canonical.domain(), "www.example.com:8443");
    }

    #[test]
    fn test_canonical_url_rejects_non_http() {
        assert!(matches!(
            CanonicalUrl::parse("javascript:void(0)"),
            Err(UrlError::InvalidScheme(_))
        ));
    }

    #[test]
    fn test_display_matches_as_str() {
        let canonical = CanonicalUrl::parse("https://example.com/page").unwrap();
        assert_eq!(canonical.to_string(), canonical.as_str());
    }
}
