use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::canonical::{normalize_url, NormalizedUrl};
use super::fingerprint::{content_fingerprint, ContentFingerprint};
use crate::models::Article;

/// Oldest timestamp inside a lookback of `days` days from `now`. Windows reaching past the
/// representable range start at the earliest representable instant.
pub fn lookback_cutoff(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// History could not be consulted. The deduplicator falls back to batch-only mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("existing-record provider unavailable: {0}")]
    Unavailable(String),
}

/// A previously persisted article, as seen by the deduplicator.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingRecord {
    pub url: String,
    /// None when the stored URL could not be normalized
    pub normalized_url: Option<NormalizedUrl>,
    pub content_fingerprint: ContentFingerprint,
    pub content: String,
    pub published_at: DateTime<Utc>,
}

impl ExistingRecord {
    pub fn from_article(article: &Article) -> Self {
        Self {
            url: article.url.clone(),
            normalized_url: normalize_url(&article.url).ok(),
            content_fingerprint: content_fingerprint(&article.content),
            content: article.content.clone(),
            published_at: article.published_at.unwrap_or(article.created_at),
        }
    }
}

/// Result of a URL lookup against history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMatch {
    /// Raw URL of the stored record
    pub url: String,
    /// True when the raw URLs are identical, false when only the normalized forms agree
    pub exact: bool,
}

/// Lookup interface over historical articles.
#[async_trait]
pub trait ExistingRecordProvider: Send + Sync {
    /// Find a stored record whose raw URL equals `raw_url` or whose normalized URL equals
    /// `normalized_url`. Exact raw matches take precedence.
    async fn lookup_url(
        &self,
        raw_url: &str,
        normalized_url: &NormalizedUrl,
    ) -> Result<Option<HistoryMatch>, ProviderError>;

    async fn exists_by_url(
        &self,
        raw_url: &str,
        normalized_url: &NormalizedUrl,
    ) -> Result<bool, ProviderError> {
        Ok(self.lookup_url(raw_url, normalized_url).await?.is_some())
    }

    /// Records published within the last `since_days` days, in no particular order.
    async fn recent_records(&self, since_days: i64) -> Result<Vec<ExistingRecord>, ProviderError>;
}

/// Stand-in used when persistence is disabled: every call reports unavailability.
#[derive(Debug, Clone)]
pub struct UnavailableProvider {
    reason: String,
}

impl UnavailableProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl ExistingRecordProvider for UnavailableProvider {
    async fn lookup_url(
        &self,
        _raw_url: &str,
        _normalized_url: &NormalizedUrl,
    ) -> Result<Option<HistoryMatch>, ProviderError> {
        Err(ProviderError::Unavailable(self.reason.clone()))
    }

    async fn recent_records(&self, _since_days: i64) -> Result<Vec<ExistingRecord>, ProviderError> {
        Err(ProviderError::Unavailable(self.reason.clone()))
    }
}

/// Provider over a fixed set of records held in memory (fixtures, replays of exported history).
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordProvider {
    records: Vec<ExistingRecord>,
}

impl MemoryRecordProvider {
    pub fn new(records: Vec<ExistingRecord>) -> Self {
        Self { records }
    }

    pub fn from_articles<'a>(articles: impl IntoIterator<Item = &'a Article>) -> Self {
        Self::new(articles.into_iter().map(ExistingRecord::from_article).collect())
    }

    pub fn push(&mut self, record: ExistingRecord) {
        self.records.push(record);
    }
}

#[async_trait]
impl ExistingRecordProvider for MemoryRecordProvider {
    async fn lookup_url(
        &self,
        raw_url: &str,
        normalized_url: &NormalizedUrl,
    ) -> Result<Option<HistoryMatch>, ProviderError> {
        if let Some(r) = self.records.iter().find(|r| r.url == raw_url) {
            return Ok(Some(HistoryMatch { url: r.url.clone(), exact: true }));
        }
        Ok(self
            .records
            .iter()
            .find(|r| r.normalized_url.as_ref() == Some(normalized_url) || r.url == normalized_url.as_str())
            .map(|r| HistoryMatch { url: r.url.clone(), exact: false }))
    }

    async fn recent_records(&self, since_days: i64) -> Result<Vec<ExistingRecord>, ProviderError> {
        let cutoff = lookback_cutoff(Utc::now(), since_days);
        Ok(self
            .records
            .iter()
            .filter(|r| r.published_at >= cutoff)
            .cloned()
            .collect())
    }
}
