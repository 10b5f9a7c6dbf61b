//! Article deduplication against the current batch and recent history.
//!
//! Each article of a batch is classified in order:
//! 1. raw / normalized URL match (history lookup, then earlier accepted items)
//! 2. content fingerprint match
//! 3. normalized-URL similarity at or above `url_similarity_threshold`
//! 4. content similarity at or above `content_similarity_threshold`
//!
//! Anything left is unique and becomes comparable for the rest of the batch. Within a batch
//! only earlier accepted items are consulted, so the outcome depends on batch order and on
//! nothing else.

pub mod canonical;
pub mod fingerprint;
pub mod provider;
pub mod similarity;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use common::{ConfigError, DeduplicationConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::Article;
pub use canonical::{normalize_content, normalize_url, InvalidUrl, NormalizedUrl};
pub use fingerprint::{content_fingerprint, fingerprint, ContentFingerprint};
pub use provider::{
    lookback_cutoff, ExistingRecord, ExistingRecordProvider, HistoryMatch, MemoryRecordProvider, ProviderError,
    UnavailableProvider,
};
pub use similarity::similarity;

use similarity::score_at_least;

/// Why an article was kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicateReason {
    ExactUrl,
    NormalizedUrl,
    ExactContent,
    SimilarUrl,
    SimilarContent,
    Unique,
}

impl DuplicateReason {
    pub fn is_duplicate(self) -> bool {
        self != DuplicateReason::Unique
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DuplicateReason::ExactUrl => "EXACT_URL",
            DuplicateReason::NormalizedUrl => "NORMALIZED_URL",
            DuplicateReason::ExactContent => "EXACT_CONTENT",
            DuplicateReason::SimilarUrl => "SIMILAR_URL",
            DuplicateReason::SimilarContent => "SIMILAR_CONTENT",
            DuplicateReason::Unique => "UNIQUE",
        }
    }
}

/// The article a duplicate collided with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum MatchedAgainst {
    /// A persisted record from an earlier run
    History { url: String },
    /// An earlier accepted article of the same batch
    Batch { index: usize, article_id: String, url: String },
}

/// Classification of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeduplicationDecision {
    /// Position in the input batch
    pub index: usize,
    pub article_id: String,
    pub url: String,
    pub is_duplicate: bool,
    pub reason: DuplicateReason,
    pub matched_against: Option<MatchedAgainst>,
    /// Similarity score for SIMILAR_* reasons
    pub score: Option<f64>,
}

/// Survivors plus the per-article decisions of one run.
#[derive(Debug, Clone, Default)]
pub struct DeduplicationReport {
    pub survivors: Vec<Article>,
    pub decisions: Vec<DeduplicationDecision>,
    /// True when history could not be consulted and only the batch itself was checked
    pub degraded: bool,
}

impl DeduplicationReport {
    pub fn duplicate_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_duplicate).count()
    }

    pub fn reason_counts(&self) -> BTreeMap<DuplicateReason, usize> {
        let mut counts = BTreeMap::new();
        for d in &self.decisions {
            *counts.entry(d.reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Comparable view of a history record or an accepted batch item.
struct Candidate {
    raw_url: String,
    normalized_url: Option<NormalizedUrl>,
    url_len: usize,
    fingerprint: Option<ContentFingerprint>,
    content: String,
    content_len: usize,
    origin: MatchedAgainst,
}

impl Candidate {
    fn from_record(record: ExistingRecord) -> Self {
        let content = normalize_content(&record.content);
        let fingerprint = if content.is_empty() {
            None
        } else {
            Some(record.content_fingerprint)
        };
        Self {
            url_len: record.normalized_url.as_ref().map_or(0, |u| u.as_str().chars().count()),
            normalized_url: record.normalized_url,
            raw_url: record.url.clone(),
            fingerprint,
            content_len: content.chars().count(),
            content,
            origin: MatchedAgainst::History { url: record.url },
        }
    }
}

struct Verdict {
    reason: DuplicateReason,
    matched_against: Option<MatchedAgainst>,
    score: Option<f64>,
}

impl Verdict {
    fn unique() -> Self {
        Verdict { reason: DuplicateReason::Unique, matched_against: None, score: None }
    }

    fn duplicate(reason: DuplicateReason, matched: &MatchedAgainst, score: Option<f64>) -> Self {
        Verdict { reason, matched_against: Some(matched.clone()), score }
    }
}

/// Service for detecting and filtering duplicate articles.
///
/// Holds only configuration and the injected provider; every call re-queries history, so one
/// instance can serve any number of sequential runs.
pub struct Deduplicator {
    config: DeduplicationConfig,
    provider: Arc<dyn ExistingRecordProvider>,
}

impl Deduplicator {
    pub fn new(
        config: DeduplicationConfig,
        provider: Arc<dyn ExistingRecordProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, provider })
    }

    /// Deduplicator with no history at all (persistence disabled).
    pub fn batch_only(config: DeduplicationConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(UnavailableProvider::new("persistence disabled")))
    }

    pub fn config(&self) -> &DeduplicationConfig {
        &self.config
    }

    /// Survivors of `batch`, in their original relative order.
    pub async fn deduplicate(&self, batch: Vec<Article>) -> Vec<Article> {
        self.deduplicate_with_report(batch).await.survivors
    }

    pub async fn deduplicate_with_report(&self, batch: Vec<Article>) -> DeduplicationReport {
        if !self.config.enabled {
            debug!("Deduplication disabled, keeping all {} articles", batch.len());
            let decisions = batch
                .iter()
                .enumerate()
                .map(|(index, a)| DeduplicationDecision {
                    index,
                    article_id: a.id.clone(),
                    url: a.url.clone(),
                    is_duplicate: false,
                    reason: DuplicateReason::Unique,
                    matched_against: None,
                    score: None,
                })
                .collect();
            return DeduplicationReport { survivors: batch, decisions, degraded: false };
        }

        info!("Starting deduplication of {} articles...", batch.len());

        let mut degraded = false;
        let mut history = match self.load_history().await {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "history unavailable, deduplicating within the batch only");
                degraded = true;
                Vec::new()
            }
        };

        let mut accepted: Vec<Candidate> = Vec::new();
        let mut survivors = Vec::new();
        let mut decisions = Vec::with_capacity(batch.len());

        for (index, article) in batch.into_iter().enumerate() {
            let normalized_url = match normalize_url(&article.url) {
                Ok(u) => Some(u),
                Err(e) => {
                    warn!(error = %e, "excluding article from URL comparisons");
                    None
                }
            };
            let content = normalize_content(&article.content);
            let content_fp = (!content.is_empty()).then(|| fingerprint(&content));

            let mut verdict = None;
            if let (Some(normalized), false) = (&normalized_url, degraded) {
                match self.provider.lookup_url(&article.url, normalized).await {
                    Ok(Some(hit)) => {
                        let reason = if hit.exact {
                            DuplicateReason::ExactUrl
                        } else {
                            DuplicateReason::NormalizedUrl
                        };
                        verdict = Some(Verdict::duplicate(
                            reason,
                            &MatchedAgainst::History { url: hit.url },
                            None,
                        ));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "URL lookup failed, deduplicating within the batch only");
                        degraded = true;
                        // history is no longer trusted for the rest of the run
                        history.clear();
                    }
                }
            }

            let candidate = Candidate {
                raw_url: article.url.clone(),
                url_len: normalized_url.as_ref().map_or(0, |u| u.as_str().chars().count()),
                normalized_url,
                fingerprint: content_fp,
                content_len: content.chars().count(),
                content,
                origin: MatchedAgainst::Batch {
                    index,
                    article_id: article.id.clone(),
                    url: article.url.clone(),
                },
            };

            let verdict = match verdict {
                Some(v) => v,
                None => self.classify(&candidate, &history, &accepted),
            };

            if verdict.reason.is_duplicate() {
                info!(
                    reason = verdict.reason.as_str(),
                    score = ?verdict.score,
                    matched = ?verdict.matched_against,
                    "Skipping duplicate article: {}",
                    article.short_title(50)
                );
            } else {
                debug!("Added unique article: {}", article.short_title(50));
            }

            decisions.push(DeduplicationDecision {
                index,
                article_id: article.id.clone(),
                url: article.url.clone(),
                is_duplicate: verdict.reason.is_duplicate(),
                reason: verdict.reason,
                matched_against: verdict.matched_against,
                score: verdict.score,
            });

            if !verdict.reason.is_duplicate() {
                accepted.push(candidate);
                survivors.push(article);
            }
        }

        let report = DeduplicationReport { survivors, decisions, degraded };
        info!(
            degraded = report.degraded,
            "Deduplication complete: {} unique articles, {} duplicates removed",
            report.survivors.len(),
            report.duplicate_count()
        );
        report
    }

    /// Recent history within the lookback window, in a stable order.
    async fn load_history(&self) -> Result<Vec<Candidate>, ProviderError> {
        let days = self.config.load_existing_days;
        let cutoff = lookback_cutoff(Utc::now(), days);
        let mut records: Vec<ExistingRecord> = self
            .provider
            .recent_records(days)
            .await?
            .into_iter()
            .filter(|r| r.published_at >= cutoff)
            .collect();
        // providers return sets; sort so `matched_against` is reproducible
        records.sort_by(|a, b| b.published_at.cmp(&a.published_at).then_with(|| a.url.cmp(&b.url)));
        debug!("Loaded {} history records from the last {} days", records.len(), days);
        Ok(records.into_iter().map(Candidate::from_record).collect())
    }

    /// Steps 1 (batch part) to 4 for one article. History URL lookups happen before this.
    fn classify(&self, item: &Candidate, history: &[Candidate], accepted: &[Candidate]) -> Verdict {
        if let Some(normalized) = &item.normalized_url {
            for prev in accepted {
                if prev.raw_url == item.raw_url {
                    return Verdict::duplicate(DuplicateReason::ExactUrl, &prev.origin, None);
                }
            }
            for prev in accepted {
                if prev.normalized_url.as_ref() == Some(normalized) {
                    return Verdict::duplicate(DuplicateReason::NormalizedUrl, &prev.origin, None);
                }
            }
        }

        let pool = || history.iter().chain(accepted.iter());

        if let Some(fp) = &item.fingerprint {
            if let Some(prev) = pool().find(|c| c.fingerprint.as_ref() == Some(fp)) {
                return Verdict::duplicate(DuplicateReason::ExactContent, &prev.origin, None);
            }
        }

        if let Some(normalized) = &item.normalized_url {
            let threshold = self.config.url_similarity_threshold;
            for prev in pool() {
                let Some(other) = &prev.normalized_url else { continue };
                if let Some(score) =
                    score_at_least(normalized.as_str(), item.url_len, other.as_str(), prev.url_len, threshold)
                {
                    return Verdict::duplicate(DuplicateReason::SimilarUrl, &prev.origin, Some(score));
                }
            }
        }

        if item.fingerprint.is_some() {
            let threshold = self.config.content_similarity_threshold;
            for prev in pool() {
                if prev.fingerprint.is_none() {
                    continue;
                }
                if let Some(score) =
                    score_at_least(&item.content, item.content_len, &prev.content, prev.content_len, threshold)
                {
                    return Verdict::duplicate(DuplicateReason::SimilarContent, &prev.origin, Some(score));
                }
            }
        }

        Verdict::unique()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dedup(config: DeduplicationConfig) -> Deduplicator {
        Deduplicator::batch_only(config).expect("valid config")
    }

    fn article(url: &str, content: &str) -> Article {
        Article::new("title", url, content, "test")
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = DeduplicationConfig::default();
        config.content_similarity_threshold = -0.1;
        assert!(Deduplicator::batch_only(config).is_err());
    }

    #[tokio::test]
    async fn identical_urls_in_batch() {
        let d = dedup(DeduplicationConfig::default());
        let report = d
            .deduplicate_with_report(vec![
                article("https://example.com/a", "first body"),
                article("https://example.com/a", "completely different text"),
            ])
            .await;
        assert_eq!(report.survivors.len(), 1);
        assert_eq!(report.decisions[1].reason, DuplicateReason::ExactUrl);
        assert!(matches!(
            report.decisions[1].matched_against,
            Some(MatchedAgainst::Batch { index: 0, .. })
        ));
        assert!(report.degraded);
    }

    #[tokio::test]
    async fn tracking_params_make_normalized_url_duplicates() {
        let d = dedup(DeduplicationConfig::default());
        let report = d
            .deduplicate_with_report(vec![
                article("https://example.com/article1.html", "alpha"),
                article("https://example.com/article1.html?utm_source=social", "omega"),
            ])
            .await;
        assert_eq!(report.decisions[1].reason, DuplicateReason::NormalizedUrl);
    }

    #[tokio::test]
    async fn whitespace_variants_are_exact_content_duplicates() {
        let d = dedup(DeduplicationConfig::default());
        let report = d
            .deduplicate_with_report(vec![
                article("https://one.example.org/x", "广东省 2025年 公务员 考试 公告"),
                article("https://two.example.net/y", "广东省  2025年   公务员  考试  公告"),
            ])
            .await;
        assert_eq!(report.decisions[1].reason, DuplicateReason::ExactContent);
        assert_eq!(report.decisions[1].score, None);
    }

    #[tokio::test]
    async fn empty_content_is_never_a_content_match() {
        let d = dedup(DeduplicationConfig::default());
        let survivors = d
            .deduplicate(vec![
                article("https://one.example.org/x", ""),
                article("https://two.example.net/story", "   "),
            ])
            .await;
        assert_eq!(survivors.len(), 2);
    }

    #[tokio::test]
    async fn disabled_keeps_everything() {
        let config = DeduplicationConfig { enabled: false, ..DeduplicationConfig::default() };
        let d = dedup(config);
        let batch = vec![
            article("https://example.com/a", "same"),
            article("https://example.com/a", "same"),
        ];
        let report = d.deduplicate_with_report(batch.clone()).await;
        assert_eq!(report.survivors, batch);
        assert_eq!(report.duplicate_count(), 0);
        assert!(!report.degraded);
    }

    #[tokio::test]
    async fn reason_counts_cover_every_decision() {
        let d = dedup(DeduplicationConfig::default());
        let report = d
            .deduplicate_with_report(vec![
                article("https://example.com/a", "one"),
                article("https://example.com/a", "two"),
                article("https://other.example.org/z", "one"),
            ])
            .await;
        let counts = report.reason_counts();
        assert_eq!(counts.get(&DuplicateReason::Unique), Some(&1));
        assert_eq!(counts.get(&DuplicateReason::ExactUrl), Some(&1));
        assert_eq!(counts.get(&DuplicateReason::ExactContent), Some(&1));
    }

    #[test]
    fn reason_labels() {
        assert_eq!(DuplicateReason::SimilarContent.as_str(), "SIMILAR_CONTENT");
        assert!(!DuplicateReason::Unique.is_duplicate());
        assert_eq!(
            serde_json::to_string(&DuplicateReason::NormalizedUrl).expect("json"),
            "\"NORMALIZED_URL\""
        );
    }
}
