use anyhow::{Context, Result};
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::models::Article;

/// Fetches a feed from the given URL and parses it.
/// Server errors, rate limiting and network failures are retried with exponential backoff;
/// other client errors fail immediately.
pub async fn fetch_and_parse_feed(url: &str, timeout_secs: u64) -> Result<Feed> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent("NewsTracker/0.1.0")
        .build()
        .context("failed to build reqwest client")?;

    let max_retries = 3;
    let mut last_error = None;

    for attempt in 1..=max_retries {
        if attempt > 1 {
            let backoff = Duration::from_secs(2u64.pow(attempt - 2)); // 1s, 2s, 4s...
            info!("Retrying feed fetch for {} (attempt {}/{}) after {:?}...", url, attempt, max_retries, backoff);
            tokio::time::sleep(backoff).await;
        }

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let bytes = response.bytes().await.context("failed to read response body")?;
                    let feed = parser::parse(bytes.as_ref()).context("failed to parse feed")?;
                    return Ok(feed);
                } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("feed fetch failed with retryable status: {}", status));
                    continue;
                } else {
                    return Err(anyhow::anyhow!("feed fetch failed with status: {}", status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// Feed markup to plain text. Plain text passes through untouched.
fn html_to_text(raw: &str) -> String {
    if !raw.contains('<') {
        return raw.trim().to_string();
    }
    match html2text::from_read(raw.as_bytes(), 200) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!("failed to convert feed HTML to text: {}", e);
            raw.trim().to_string()
        }
    }
}

fn entry_to_article(entry: &Entry, source: &str) -> Option<Article> {
    // Use the first link as the URL
    let url = entry.links.first().map(|l| l.href.trim().to_string()).unwrap_or_default();
    let title = entry.title.as_ref().map(|t| t.content.trim().to_string()).unwrap_or_default();
    if url.is_empty() {
        debug!("Skipping entry without URL: {:?}", title);
        return None;
    }

    let body = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .unwrap_or_default();

    let mut article = Article::new(title, url, html_to_text(&body), source);
    if let Some(published) = entry.published.or(entry.updated) {
        article = article.with_published_at(published);
    }
    Some(article)
}

/// Map feed entries to articles, in feed order. The feed title (or its URL) becomes the source.
pub fn entries_to_articles(feed: &Feed, feed_url: &str) -> Vec<Article> {
    let source = feed
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| feed_url.to_string());

    feed.entries
        .iter()
        .filter_map(|entry| entry_to_article(entry, &source))
        .collect()
}

/// Collect articles from every configured feed, in configuration order.
/// A feed that cannot be fetched is logged and skipped.
pub async fn collect_feeds(urls: &[String], timeout_secs: u64) -> Vec<Article> {
    let mut articles = Vec::new();
    for url in urls {
        match fetch_and_parse_feed(url, timeout_secs).await {
            Ok(feed) => {
                let items = entries_to_articles(&feed, url);
                info!("Fetched feed '{}': {} articles", url, items.len());
                articles.extend(items);
            }
            Err(e) => error!("failed to fetch feed {}: {:#}", url, e),
        }
    }
    articles
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <link>https://example.com</link>
    <description>Test feed</description>
    <item>
      <title>First story</title>
      <link>https://example.com/first?utm_source=rss</link>
      <description>&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
      <pubDate>Mon, 06 Jan 2025 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
      <description>dropped</description>
    </item>
    <item>
      <title>Second story</title>
      <link>https://example.com/second</link>
      <description>Plain text body</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn maps_entries_and_skips_missing_links() {
        let feed = parser::parse(RSS.as_bytes()).expect("parse rss");
        let articles = entries_to_articles(&feed, "https://example.com/rss");

        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "First story");
        assert_eq!(articles[0].url, "https://example.com/first?utm_source=rss");
        assert_eq!(articles[0].source, "Example News");
        assert!(articles[0].content.contains("Hello"));
        assert!(!articles[0].content.contains("<p>"));
        assert!(articles[0].published_at.is_some());
        assert_eq!(articles[1].content, "Plain text body");
        assert!(articles[1].published_at.is_none());
    }

    #[tokio::test]
    async fn collect_feeds_skips_failing_feed() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/rss")
            .with_status(200)
            .with_header("content-type", "application/rss+xml")
            .with_body(RSS)
            .create_async()
            .await;
        let missing = server.mock("GET", "/gone").with_status(404).create_async().await;

        let urls = vec![format!("{}/gone", server.url()), format!("{}/rss", server.url())];
        let articles = collect_feeds(&urls, 5).await;

        assert_eq!(articles.len(), 2);
        ok.assert_async().await;
        missing.assert_async().await;
    }
}
