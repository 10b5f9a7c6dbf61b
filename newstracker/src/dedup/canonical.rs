//! URL and text canonicalization.
//!
//! Both functions are pure: the same input yields the same output across runs, which matters
//! because normalized URLs are persisted and compared against later runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{form_urlencoded, Url};

/// Query parameters that only carry tracking or referral information.
pub const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "ref",
    "source",
    "from",
    "_t",
    "share",
];

/// A URL that cannot take part in URL-based comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid URL `{url}`: {reason}")]
pub struct InvalidUrl {
    pub url: String,
    pub reason: String,
}

/// Canonical form of an article URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a value that was normalized earlier (e.g. read back from storage).
    pub fn from_stored(value: impl Into<String>) -> Self {
        NormalizedUrl(value.into())
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&name.as_str())
}

/// Normalize a URL for equality checks.
///
/// Lowercases scheme and host, drops tracking parameters, sorts the remaining parameters,
/// strips trailing slashes from the path and removes the fragment. User info is dropped and
/// default ports are omitted.
pub fn normalize_url(raw: &str) -> Result<NormalizedUrl, InvalidUrl> {
    let invalid = |reason: String| InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let parsed = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if parsed.cannot_be_a_base() {
        return Err(invalid("not a hierarchical URL".to_string()));
    }
    let host = match parsed.host_str() {
        Some(h) if !h.is_empty() => h.to_lowercase(),
        _ => return Err(invalid("missing host".to_string())),
    };

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let mut out = format!("{}://{}", parsed.scheme().to_lowercase(), host);
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(parsed.path().trim_end_matches('/'));
    if !pairs.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter())
            .finish();
        out.push('?');
        out.push_str(&query);
    }

    Ok(NormalizedUrl(out))
}

/// Collapse whitespace runs to a single space, trim and case-fold.
pub fn normalize_content(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(url: &str) -> String {
        normalize_url(url).expect("valid url").as_str().to_string()
    }

    #[test]
    fn strips_tracking_params() {
        assert_eq!(
            norm("https://example.com/article?utm_source=social&utm_medium=email&id=123"),
            "https://example.com/article?id=123"
        );
        assert_eq!(norm("https://x.com/a?utm_source=x&id=5"), norm("https://x.com/a?id=5"));
    }

    #[test]
    fn every_tracking_param_is_removed() {
        let query: Vec<String> = TRACKING_PARAMS.iter().map(|p| format!("{}=1", p)).collect();
        let url = format!("https://example.com/a?{}", query.join("&"));
        assert_eq!(norm(&url), "https://example.com/a");
    }

    #[test]
    fn tracking_names_match_case_insensitively() {
        assert_eq!(norm("https://example.com/a?UTM_Source=x&FBCLID=y"), "https://example.com/a");
    }

    #[test]
    fn parameter_order_does_not_matter() {
        assert_eq!(
            norm("https://example.com/list?b=2&a=1&c=3"),
            norm("https://example.com/list?c=3&a=1&b=2")
        );
        assert_eq!(norm("https://example.com/list?b=2&a=1"), "https://example.com/list?a=1&b=2");
    }

    #[test]
    fn lowercases_scheme_and_host_but_not_path() {
        assert_eq!(norm("HTTPS://Example.COM/News/Item"), "https://example.com/News/Item");
    }

    #[test]
    fn strips_trailing_slash_and_fragment() {
        assert_eq!(norm("https://example.com/a/b/#comments"), "https://example.com/a/b");
        assert_eq!(norm("https://example.com/"), "https://example.com");
        assert_eq!(norm("https://example.com"), "https://example.com");
    }

    #[test]
    fn keeps_non_default_port_only() {
        assert_eq!(norm("https://example.com:443/a"), "https://example.com/a");
        assert_eq!(norm("http://example.com:8080/a"), "http://example.com:8080/a");
    }

    #[test]
    fn malformed_urls_are_rejected() {
        assert!(normalize_url("not a url").is_err());
        assert!(normalize_url("").is_err());
        assert!(normalize_url("mailto:someone@example.com").is_err());
        assert!(normalize_url("http://").is_err());
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = norm("https://Example.com/a/?z=1&utm_term=x&a=2#top");
        assert_eq!(norm(&once), once);
    }

    #[test]
    fn content_normalization() {
        assert_eq!(normalize_content("  Hello \n\t World  "), "hello world");
        assert_eq!(
            normalize_content("广东省  2025年   公务员"),
            normalize_content("广东省 2025年 公务员")
        );
        assert_eq!(normalize_content("   "), "");
    }
}
