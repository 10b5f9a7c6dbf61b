use anyhow::Result;
use chrono::Utc;
use common::Config;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::dedup::Deduplicator;
use crate::ingestion;
use crate::llm::summarizer::{extractive_article, process_article, summarize_articles};
use crate::llm::LlmProvider;
use crate::models::{Article, Digest};
use crate::notifier::Notifier;
use crate::storage;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_TOKENS: usize = 1000;

/// Everything one pipeline run needs. Built once and reused across scheduled runs.
pub struct PipelineContext {
    pub config: Config,
    /// Present only when `[database] enabled = true`
    pub pool: Option<SqlitePool>,
    pub deduplicator: Deduplicator,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

/// Collect from every configured feed, then process what was collected.
pub async fn run_pipeline(ctx: &PipelineContext) -> Result<Option<Digest>> {
    let timeout = ctx
        .config
        .feeds
        .fetch_timeout_seconds
        .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
    info!("Starting pipeline run over {} feeds", ctx.config.feeds.urls.len());

    let articles = ingestion::collect_feeds(&ctx.config.feeds.urls, timeout).await;
    info!("Collected {} articles", articles.len());
    process_articles(ctx, articles).await
}

/// Deduplicate, summarize, persist and deliver one batch.
/// Returns `Ok(None)` when nothing is left to report.
pub async fn process_articles(ctx: &PipelineContext, articles: Vec<Article>) -> Result<Option<Digest>> {
    if articles.is_empty() {
        info!("No articles to process");
        return Ok(None);
    }

    let articles = if ctx.deduplicator.config().enabled {
        let report = ctx.deduplicator.deduplicate_with_report(articles).await;
        info!(
            unique = report.survivors.len(),
            duplicates = report.duplicate_count(),
            degraded = report.degraded,
            "After deduplication"
        );
        report.survivors
    } else {
        articles
    };

    if articles.is_empty() {
        info!("Every collected article was a duplicate; nothing to report");
        return Ok(None);
    }

    let max_tokens = ctx
        .config
        .llm
        .as_ref()
        .and_then(|l| l.max_tokens)
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let mut processed_articles = Vec::with_capacity(articles.len());
    for article in &articles {
        let processed = match &ctx.llm {
            Some(provider) => process_article(provider.as_ref(), article, max_tokens).await,
            None => extractive_article(article),
        };
        if let Some(pool) = &ctx.pool {
            if let Err(e) = storage::save_processed_article(pool, &processed).await {
                error!("Failed to store processed article {}: {:#}", article.id, e);
            }
        }
        processed_articles.push(processed);
    }

    let overall_summary = match &ctx.llm {
        Some(provider) => summarize_articles(provider.as_ref(), &articles).await,
        None => None,
    };

    let title = format!("{} - {}", ctx.config.app.name, Utc::now().format("%Y-%m-%d %H:%M"));
    let digest = Digest::new(title, processed_articles, overall_summary);

    if let Some(pool) = &ctx.pool {
        match storage::save_digest(pool, &digest).await {
            Ok(()) => info!("Saved digest '{}'", digest.title),
            Err(e) => error!("Failed to store digest {}: {:#}", digest.id, e),
        }
    }

    match &ctx.notifier {
        Some(notifier) => {
            if let Err(e) = notifier.send_digest(&digest).await {
                error!("Failed to deliver digest {}: {:#}", digest.id, e);
            }
        }
        None => warn!("No notifier configured; digest '{}' was not delivered", digest.title),
    }

    Ok(Some(digest))
}
