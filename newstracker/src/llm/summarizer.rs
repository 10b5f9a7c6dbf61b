// Summarizer module
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{extract_json_from_text, LlmProvider, LlmRequest};
use crate::models::{Article, ProcessedArticle};

/// Per-article content cap inside the batch summary prompt.
const BATCH_CONTENT_CHARS: usize = 1000;

#[derive(Debug, Deserialize)]
struct ArticleAnalysis {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    sentiment: Option<f64>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchSummary {
    summary: String,
}

fn build_article_prompt(article: &Article) -> String {
    format!(
        "Summarize the following article and provide key points, sentiment, and relevant tags.\n\n\
         Title: {}\nContent: {}\n\n\
         Please respond in the following JSON format:\n\
         {{\"summary\": \"...\", \"key_points\": [\"...\"], \"sentiment\": 0.0, \"tags\": [\"...\"]}}",
        article.title, article.content
    )
}

fn build_batch_prompt(articles: &[Article]) -> String {
    let mut prompt = String::from(
        "Summarize the following articles together. Extract the important information \
         and write one comprehensive overview.\n\n",
    );
    for (i, article) in articles.iter().enumerate() {
        let content = if article.content.chars().count() > BATCH_CONTENT_CHARS {
            let cut: String = article.content.chars().take(BATCH_CONTENT_CHARS).collect();
            format!("{}...(truncated)", cut)
        } else {
            article.content.clone()
        };
        prompt.push_str(&format!(
            "Article {}:\nTitle: {}\nContent: {}\n\n",
            i + 1,
            article.title,
            content
        ));
    }
    prompt.push_str(
        "Please respond in the following JSON format:\n\
         {\"summary\": \"overall summary\", \"key_points\": [\"...\"]}",
    );
    prompt
}

fn parse_analysis(text: &str) -> Result<ArticleAnalysis> {
    let json = extract_json_from_text(text).context("LLM response contains no JSON object")?;
    let mut analysis: ArticleAnalysis =
        serde_json::from_str(&json).context("LLM response is not a valid analysis")?;
    // Out-of-range or non-finite sentiment is clamped or dropped
    analysis.sentiment = analysis
        .sentiment
        .filter(|s| s.is_finite())
        .map(|s| s.clamp(-1.0, 1.0));
    if analysis.summary.trim().is_empty() {
        anyhow::bail!("LLM analysis has an empty summary");
    }
    Ok(analysis)
}

/// Analyze one article with the LLM. Falls back to an extractive summary when the call
/// or the response parsing fails, so every article yields a `ProcessedArticle`.
pub async fn process_article<P: LlmProvider + ?Sized>(
    provider: &P,
    article: &Article,
    max_tokens: usize,
) -> ProcessedArticle {
    let mut request = LlmRequest::new(build_article_prompt(article));
    request.max_tokens = Some(max_tokens);

    let analysis = match provider.generate(request).await {
        Ok(response) => match parse_analysis(&response.content) {
            Ok(analysis) => {
                info!(
                    "LLM analysis for '{}': {} key points, {} tokens",
                    article.short_title(50),
                    analysis.key_points.len(),
                    response.usage.total_tokens
                );
                analysis
            }
            Err(e) => {
                warn!("Unusable LLM analysis for '{}': {:#}, falling back to extractive summary", article.short_title(50), e);
                extractive_summary(&article.content)
            }
        },
        Err(e) => {
            warn!("LLM analysis failed for '{}': {:#}, falling back to extractive summary", article.short_title(50), e);
            extractive_summary(&article.content)
        }
    };

    into_processed(article, analysis)
}

/// `ProcessedArticle` built from the article text alone, for runs without an LLM.
pub fn extractive_article(article: &Article) -> ProcessedArticle {
    into_processed(article, extractive_summary(&article.content))
}

fn into_processed(article: &Article, analysis: ArticleAnalysis) -> ProcessedArticle {
    ProcessedArticle {
        id: Uuid::new_v4().to_string(),
        original_article: article.clone(),
        summary: analysis.summary,
        key_points: analysis.key_points,
        sentiment: analysis.sentiment,
        tags: analysis.tags,
        processed_at: Utc::now(),
    }
}

/// Overall summary for a batch. Only produced when there is more than one article.
/// A JSON answer contributes its `summary` field; any other answer is used as-is.
pub async fn summarize_articles<P: LlmProvider + ?Sized>(
    provider: &P,
    articles: &[Article],
) -> Option<String> {
    if articles.len() <= 1 {
        return None;
    }

    match provider.generate(LlmRequest::new(build_batch_prompt(articles))).await {
        Ok(response) => {
            let text = response.content.trim();
            let summary = extract_json_from_text(text)
                .and_then(|json| serde_json::from_str::<BatchSummary>(&json).ok())
                .map(|parsed| parsed.summary)
                .unwrap_or_else(|| text.to_string());
            if summary.trim().is_empty() {
                None
            } else {
                Some(summary)
            }
        }
        Err(e) => {
            error!("Failed to summarize {} articles: {:#}", articles.len(), e);
            None
        }
    }
}

/// Fallback extractive summary when LLM fails
fn extractive_summary(text: &str) -> ArticleAnalysis {
    let sentences: Vec<&str> = text
        .split(['.', '!', '?', '。', '！', '？'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    let summary = sentences
        .first()
        .map(|s| truncate(s, 200))
        .unwrap_or_else(|| "No content".to_string());

    let key_points = sentences
        .iter()
        .skip(1)
        .take(5)
        .map(|s| truncate(s, 200))
        .collect();

    ArticleAnalysis {
        summary,
        key_points,
        sentiment: None,
        tags: Vec::new(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
