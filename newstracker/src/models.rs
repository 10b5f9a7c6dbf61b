use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A raw article produced by a collector. Never mutated after collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub url: String,
    pub content: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Article {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            url: url.into(),
            content: content.into(),
            source: source.into(),
            published_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    /// Title cut to `max_chars` characters, for log lines.
    pub fn short_title(&self, max_chars: usize) -> String {
        if self.title.chars().count() <= max_chars {
            self.title.clone()
        } else {
            let cut: String = self.title.chars().take(max_chars).collect();
            format!("{}...", cut)
        }
    }
}

/// An article after LLM analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedArticle {
    pub id: String,
    pub original_article: Article,
    pub summary: String,
    pub key_points: Vec<String>,
    /// -1.0 (negative) to 1.0 (positive)
    pub sentiment: Option<f64>,
    pub tags: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

/// A batch of processed articles delivered together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub id: String,
    pub title: String,
    pub articles: Vec<ProcessedArticle>,
    pub overall_summary: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl Digest {
    pub fn new(title: impl Into<String>, articles: Vec<ProcessedArticle>, overall_summary: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            articles,
            overall_summary,
            generated_at: Utc::now(),
        }
    }
}
