use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::dedup::{
    content_fingerprint, lookback_cutoff, normalize_url, ContentFingerprint, ExistingRecord, ExistingRecordProvider,
    HistoryMatch, NormalizedUrl, ProviderError,
};
use crate::models::{Article, Digest, ProcessedArticle};

/// Create tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    info!("storage: ensuring DB schema");
    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            normalized_url TEXT,
            content TEXT NOT NULL,
            content_fingerprint TEXT NOT NULL,
            source TEXT NOT NULL,
            published_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL
        );
        "#,
        "CREATE INDEX IF NOT EXISTS idx_articles_url ON articles(url);",
        "CREATE INDEX IF NOT EXISTS idx_articles_normalized_url ON articles(normalized_url);",
        "CREATE INDEX IF NOT EXISTS idx_articles_created_at ON articles(created_at);",
        r#"
        CREATE TABLE IF NOT EXISTS processed_articles (
            id TEXT PRIMARY KEY,
            original_article_id TEXT NOT NULL,
            summary TEXT NOT NULL,
            key_points TEXT NOT NULL,
            sentiment REAL,
            tags TEXT NOT NULL,
            processed_at TIMESTAMP NOT NULL,
            FOREIGN KEY(original_article_id) REFERENCES articles(id) ON DELETE CASCADE
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS digests (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            overall_summary TEXT,
            generated_at TIMESTAMP NOT NULL
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS digest_articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            digest_id TEXT NOT NULL,
            processed_article_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            FOREIGN KEY(digest_id) REFERENCES digests(id) ON DELETE CASCADE,
            FOREIGN KEY(processed_article_id) REFERENCES processed_articles(id) ON DELETE CASCADE,
            UNIQUE(digest_id, position)
        );
        "#,
    ];

    for stmt in stmts {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .with_context(|| format!("failed to apply schema statement: {}", stmt.trim()))?;
    }
    Ok(())
}

/// Persist an article. Returns false if an article with the same id is already stored.
pub async fn save_article(pool: &SqlitePool, article: &Article) -> Result<bool> {
    let normalized = normalize_url(&article.url).ok();
    let fingerprint = content_fingerprint(&article.content);

    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO articles
        (id, title, url, normalized_url, content, content_fingerprint, source, published_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&article.id)
    .bind(&article.title)
    .bind(&article.url)
    .bind(normalized.as_ref().map(|u| u.as_str().to_string()))
    .bind(&article.content)
    .bind(fingerprint.as_str())
    .bind(&article.source)
    .bind(article.published_at)
    .bind(article.created_at)
    .execute(pool)
    .await
    .context("failed to insert article")?;

    let inserted = result.rows_affected() > 0;
    if inserted {
        info!("Saved article {}: {}", article.id, article.short_title(50));
    } else {
        debug!("Article {} already stored", article.id);
    }
    Ok(inserted)
}

/// Persist a processed article, storing its original article first.
pub async fn save_processed_article(pool: &SqlitePool, processed: &ProcessedArticle) -> Result<()> {
    save_article(pool, &processed.original_article).await?;

    let key_points = serde_json::to_string(&processed.key_points).context("failed to serialize key points")?;
    let tags = serde_json::to_string(&processed.tags).context("failed to serialize tags")?;

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO processed_articles
        (id, original_article_id, summary, key_points, sentiment, tags, processed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&processed.id)
    .bind(&processed.original_article.id)
    .bind(&processed.summary)
    .bind(&key_points)
    .bind(processed.sentiment)
    .bind(&tags)
    .bind(processed.processed_at)
    .execute(pool)
    .await
    .context("failed to insert processed article")?;

    info!("Stored processed article {}", processed.id);
    Ok(())
}

/// Persist a digest and its ordered article links in one transaction.
pub async fn save_digest(pool: &SqlitePool, digest: &Digest) -> Result<()> {
    for processed in &digest.articles {
        save_processed_article(pool, processed).await?;
    }

    let mut tx = pool.begin().await.context("failed to begin digest transaction")?;
    sqlx::query(
        "INSERT OR IGNORE INTO digests (id, title, overall_summary, generated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&digest.id)
    .bind(&digest.title)
    .bind(&digest.overall_summary)
    .bind(digest.generated_at)
    .execute(&mut tx)
    .await
    .context("failed to insert digest")?;

    for (position, processed) in digest.articles.iter().enumerate() {
        sqlx::query(
            "INSERT OR IGNORE INTO digest_articles (digest_id, processed_article_id, position) VALUES (?, ?, ?)",
        )
        .bind(&digest.id)
        .bind(&processed.id)
        .bind(position as i64)
        .execute(&mut tx)
        .await
        .context("failed to link digest article")?;
    }
    tx.commit().await.context("failed to commit digest")?;

    info!("Stored digest {} with {} articles", digest.id, digest.articles.len());
    Ok(())
}

#[derive(Debug, FromRow)]
struct ArticleRow {
    id: String,
    title: String,
    url: String,
    normalized_url: Option<String>,
    content: String,
    content_fingerprint: String,
    source: String,
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ArticleRow {
    fn into_article(self) -> Article {
        Article {
            id: self.id,
            title: self.title,
            url: self.url,
            content: self.content,
            source: self.source,
            published_at: self.published_at,
            created_at: self.created_at,
        }
    }

    fn into_record(self) -> ExistingRecord {
        let fingerprint = ContentFingerprint::from_hex(&self.content_fingerprint)
            .unwrap_or_else(|| content_fingerprint(&self.content));
        let normalized_url = match self.normalized_url {
            Some(u) => Some(NormalizedUrl::from_stored(u)),
            None => normalize_url(&self.url).ok(),
        };
        ExistingRecord {
            url: self.url,
            normalized_url,
            content_fingerprint: fingerprint,
            content: self.content,
            published_at: self.published_at.unwrap_or(self.created_at),
        }
    }
}

const ARTICLE_COLUMNS: &str =
    "id, title, url, normalized_url, content, content_fingerprint, source, published_at, created_at";

pub async fn get_article_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Article>> {
    let row = sqlx::query_as::<_, ArticleRow>(&format!("SELECT {} FROM articles WHERE id = ?", ARTICLE_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch article")?;
    Ok(row.map(ArticleRow::into_article))
}

/// Articles collected within the last `days` days, newest first.
pub async fn recent_articles(pool: &SqlitePool, days: i64, limit: i64) -> Result<Vec<Article>> {
    let cutoff = lookback_cutoff(Utc::now(), days);
    let rows = sqlx::query_as::<_, ArticleRow>(&format!(
        "SELECT {} FROM articles WHERE created_at >= ? ORDER BY created_at DESC LIMIT ?",
        ARTICLE_COLUMNS
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch recent articles")?;
    Ok(rows.into_iter().map(ArticleRow::into_article).collect())
}

fn unavailable(e: sqlx::Error) -> ProviderError {
    ProviderError::Unavailable(e.to_string())
}

/// `ExistingRecordProvider` over the `articles` table.
#[derive(Debug, Clone)]
pub struct SqliteRecordProvider {
    pool: SqlitePool,
    max_records: i64,
}

impl SqliteRecordProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, max_records: 1000 }
    }

    /// Cap on the number of history records loaded per run
    pub fn with_max_records(mut self, max_records: i64) -> Self {
        self.max_records = max_records;
        self
    }
}

#[async_trait]
impl ExistingRecordProvider for SqliteRecordProvider {
    async fn lookup_url(
        &self,
        raw_url: &str,
        normalized_url: &NormalizedUrl,
    ) -> Result<Option<HistoryMatch>, ProviderError> {
        let exact = sqlx::query_scalar::<_, String>("SELECT url FROM articles WHERE url = ? LIMIT 1")
            .bind(raw_url)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        if let Some(url) = exact {
            return Ok(Some(HistoryMatch { url, exact: true }));
        }

        let normalized = sqlx::query_scalar::<_, String>(
            "SELECT url FROM articles WHERE normalized_url = ? OR url = ? LIMIT 1",
        )
        .bind(normalized_url.as_str())
        .bind(normalized_url.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(normalized.map(|url| HistoryMatch { url, exact: false }))
    }

    async fn recent_records(&self, since_days: i64) -> Result<Vec<ExistingRecord>, ProviderError> {
        let cutoff = lookback_cutoff(Utc::now(), since_days);
        let rows = sqlx::query_as::<_, ArticleRow>(&format!(
            r#"
            SELECT {} FROM articles
            WHERE COALESCE(published_at, created_at) >= ?
            ORDER BY COALESCE(published_at, created_at) DESC
            LIMIT ?
            "#,
            ARTICLE_COLUMNS
        ))
        .bind(cutoff)
        .bind(self.max_records)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(rows.into_iter().map(ArticleRow::into_record).collect())
    }
}
