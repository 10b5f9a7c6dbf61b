use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::Digest;

/// Delivery channel for finished digests.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_digest(&self, digest: &Digest) -> Result<()>;
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn join_escaped(items: &[String]) -> String {
    items
        .iter()
        .map(|s| html_escape(s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a digest as a standalone HTML document.
pub fn render_html(digest: &Digest) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n<h2>{title}</h2>\n",
        title = html_escape(&digest.title)
    );

    match &digest.overall_summary {
        Some(summary) => {
            let _ = write!(
                html,
                "<div style=\"background-color: #f8f9fa; padding: 15px; border-radius: 5px; margin-bottom: 20px;\">\n\
                 <h3>Overview</h3>\n<p>{}</p>\n</div>\n<hr>\n<h3>Articles</h3>\n",
                html_escape(summary)
            );
        }
        None => html.push_str("<p>Latest article summaries:</p>\n"),
    }

    for (i, processed) in digest.articles.iter().enumerate() {
        let article = &processed.original_article;
        let _ = writeln!(html, "<h3>{}. {}</h3>", i + 1, html_escape(&article.title));
        let _ = writeln!(html, "<p><b>Summary:</b> {}</p>", html_escape(&processed.summary));
        if !processed.key_points.is_empty() {
            let _ = writeln!(html, "<p><b>Key points:</b> {}</p>", join_escaped(&processed.key_points));
        }
        if !processed.tags.is_empty() {
            let _ = writeln!(html, "<p><b>Tags:</b> {}</p>", join_escaped(&processed.tags));
        }
        let _ = write!(
            html,
            "<p><a href=\"{}\" style=\"color: #0066cc;\">Read the original ({})</a></p>\n<hr>\n",
            html_escape(&article.url),
            html_escape(&article.source)
        );
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Writes rendered digests as HTML files into a directory.
pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(digest: &Digest) -> String {
        format!("{}-{}.html", digest.generated_at.format("%Y%m%dT%H%M%SZ"), digest.id)
    }
}

#[async_trait::async_trait]
impl Notifier for OutboxNotifier {
    async fn send_digest(&self, digest: &Digest) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create outbox dir {}", self.dir.display()))?;

        let path = self.dir.join(Self::file_name(digest));
        tokio::fs::write(&path, render_html(digest))
            .await
            .with_context(|| format!("failed to write digest to {}", path.display()))?;

        info!(path = %path.display(), articles = digest.articles.len(), "digest written to outbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Article, ProcessedArticle};
    use chrono::Utc;

    fn digest(overall: Option<&str>) -> Digest {
        let article = Article::new(
            "Fish & <Chips>",
            "https://example.com/a?x=1&y=2",
            "body",
            "Example",
        );
        let processed = ProcessedArticle {
            id: "p1".to_string(),
            original_article: article,
            summary: "Prices \"up\"".to_string(),
            key_points: vec!["one".to_string(), "two".to_string()],
            sentiment: Some(0.2),
            tags: vec!["food".to_string()],
            processed_at: Utc::now(),
        };
        Digest::new("Daily news", vec![processed], overall.map(str::to_string))
    }

    #[test]
    fn render_escapes_text() {
        let html = render_html(&digest(Some("a < b")));
        assert!(html.contains("<h2>Daily news</h2>"));
        assert!(html.contains("Fish &amp; &lt;Chips&gt;"));
        assert!(html.contains("Prices &quot;up&quot;"));
        assert!(html.contains("href=\"https://example.com/a?x=1&amp;y=2\""));
        assert!(html.contains("a &lt; b"));
        assert!(html.contains("one, two"));
        assert!(!html.contains("<Chips>"));
    }

    #[test]
    fn render_without_overall_summary() {
        let html = render_html(&digest(None));
        assert!(html.contains("Latest article summaries"));
        assert!(!html.contains("Overview"));
    }

    #[tokio::test]
    async fn outbox_writes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outbox = dir.path().join("outbox");
        let notifier = OutboxNotifier::new(&outbox);
        let digest = digest(None);

        notifier.send_digest(&digest).await.expect("send digest");

        let path = outbox.join(OutboxNotifier::file_name(&digest));
        let written = tokio::fs::read_to_string(&path).await.expect("read back");
        assert_eq!(written, render_html(&digest));
        assert!(OutboxNotifier::file_name(&digest).ends_with(&format!("-{}.html", digest.id)));
    }
}
