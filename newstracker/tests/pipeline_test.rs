use common::{
    AppConfig, Config, DatabaseConfig, DeduplicationConfig, FeedsConfig, ScheduleMode, SchedulerConfig,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

use newstracker::dedup::Deduplicator;
use newstracker::llm::remote::RemoteLlmProvider;
use newstracker::llm::LlmProvider;
use newstracker::notifier::{Notifier, OutboxNotifier};
use newstracker::pipeline::{run_pipeline, PipelineContext};
use newstracker::storage::{self, SqliteRecordProvider};

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Civil Service News</title>
    <link>https://news.example.com</link>
    <description>Announcements</description>
    <item>
      <title>Written exam date announced</title>
      <link>https://news.example.com/exam-date?utm_source=rss</link>
      <description>The provincial written exam will take place on March 8. Candidates should print admission tickets.</description>
    </item>
    <item>
      <title>Registration statistics</title>
      <link>https://news.example.com/registration</link>
      <description>More than two hundred thousand applicants registered this year, a record high.</description>
    </item>
  </channel>
</rss>"#;

const LLM_REPLY: &str = r#"{
    "model": "gpt-4o-mini",
    "choices": [{
        "message": {
            "role": "assistant",
            "content": "{\"summary\": \"Exam news.\", \"key_points\": [\"March 8\"], \"sentiment\": 0.1, \"tags\": [\"exam\"]}"
        },
        "finish_reason": "stop"
    }],
    "usage": { "prompt_tokens": 50, "completion_tokens": 20, "total_tokens": 70 }
}"#;

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory sqlite pool");
    storage::ensure_schema(&pool).await.expect("schema");
    pool
}

fn config(feed_url: String) -> Config {
    Config {
        app: AppConfig { name: "Exam Watch".to_string() },
        database: DatabaseConfig { enabled: true, path: ":memory:".to_string() },
        deduplication: DeduplicationConfig::default(),
        feeds: FeedsConfig { urls: vec![feed_url], fetch_timeout_seconds: Some(5) },
        scheduler: SchedulerConfig {
            mode: ScheduleMode::Interval,
            interval_minutes: Some(30),
            times: vec![],
        },
        llm: None,
        notifier: None,
    }
}

#[tokio::test]
async fn second_run_finds_nothing_new() {
    let mut server = mockito::Server::new_async().await;
    let feed_mock = server
        .mock("GET", "/rss")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(FEED)
        .expect(2)
        .create_async()
        .await;
    // two article analyses plus one overall summary, first run only
    let llm_mock = server
        .mock("POST", "/llm")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(LLM_REPLY)
        .expect(3)
        .create_async()
        .await;

    let pool = memory_pool().await;
    let outbox = tempfile::tempdir().expect("tempdir");
    let config = config(format!("{}/rss", server.url()));
    let deduplicator = Deduplicator::new(
        config.deduplication.clone(),
        Arc::new(SqliteRecordProvider::new(pool.clone())),
    )
    .expect("valid config");
    let llm: Arc<dyn LlmProvider> = Arc::new(RemoteLlmProvider::new(
        format!("{}/llm", server.url()),
        "fake-api-key",
        "gpt-4o-mini",
    ));
    let notifier: Arc<dyn Notifier> = Arc::new(OutboxNotifier::new(outbox.path()));
    let ctx = PipelineContext {
        config,
        pool: Some(pool.clone()),
        deduplicator,
        llm: Some(llm),
        notifier: Some(notifier),
    };

    let digest = run_pipeline(&ctx).await.expect("first run").expect("digest");
    assert_eq!(digest.articles.len(), 2);
    assert!(digest.title.starts_with("Exam Watch - "));
    assert_eq!(digest.overall_summary.as_deref(), Some("Exam news."));
    assert_eq!(digest.articles[0].summary, "Exam news.");
    assert_eq!(digest.articles[0].original_article.source, "Civil Service News");

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_articles")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(stored, 2);
    let digests: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM digests")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(digests, 1);
    assert!(outbox.path().join(OutboxNotifier::file_name(&digest)).exists());

    // Same feed again: every item is already in history
    let second = run_pipeline(&ctx).await.expect("second run");
    assert!(second.is_none());

    feed_mock.assert_async().await;
    llm_mock.assert_async().await;
}
