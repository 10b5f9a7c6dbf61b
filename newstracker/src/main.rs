/*
newstracker - single-binary main.rs
Runs the collect / deduplicate / summarize / deliver pipeline once or on a schedule.
*/

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use common::{init_db_pool, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use newstracker::dedup::Deduplicator;
use newstracker::llm::remote::RemoteLlmProvider;
use newstracker::llm::LlmProvider;
use newstracker::notifier::{Notifier, OutboxNotifier};
use newstracker::pipeline::{run_pipeline, PipelineContext};
use newstracker::scheduler::run_schedule;
use newstracker::storage::{self, SqliteRecordProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Run the pipeline once and exit
    Once,
    /// Run the pipeline per the [scheduler] section until Ctrl-C
    Schedule,
}

#[derive(Parser, Debug)]
#[command(name = "newstracker", about = "News collector with deduplication, LLM summaries and digests")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run once or keep running on the configured schedule
    #[arg(long, value_enum, default_value = "once")]
    mode: RunMode,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(default_path.as_path()) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load configuration: {:#}", e);
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let ctx = build_context(config).await?;

    match args.mode {
        RunMode::Once => {
            match run_pipeline(&ctx).await? {
                Some(digest) => info!("Run finished: digest '{}' with {} articles", digest.title, digest.articles.len()),
                None => info!("Run finished: nothing new to report"),
            }
        }
        RunMode::Schedule => {
            let shutdown_notify = Arc::new(Notify::new());
            let signal_notify = shutdown_notify.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("ctrl-c received, stopping scheduler");
                    signal_notify.notify_one();
                }
            });

            info!(mode = ?ctx.config.scheduler.mode, "Starting scheduler");
            let ctx = &ctx;
            run_schedule(&ctx.config.scheduler, shutdown_notify, move || async move {
                match run_pipeline(ctx).await {
                    Ok(Some(digest)) => info!("Scheduled run produced digest '{}'", digest.title),
                    Ok(None) => info!("Scheduled run: nothing new to report"),
                    Err(e) => error!("Scheduled run failed: {:#}", e),
                }
            })
            .await;
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn build_context(config: Config) -> Result<PipelineContext> {
    let pool = if config.database.enabled {
        // Resolve and log the absolute DB path before connecting
        let db_path_abs = match tokio::fs::canonicalize(&config.database.path).await {
            Ok(p) => p.to_string_lossy().to_string(),
            Err(_) => config.database.path.clone(),
        };
        info!(db_path = %db_path_abs, "resolved DB path");

        let pool = init_db_pool(&db_path_abs)
            .await
            .with_context(|| format!("failed to initialize database pool at {}", db_path_abs))?;
        storage::ensure_schema(&pool).await?;
        Some(pool)
    } else {
        info!("Database disabled; deduplication will only compare within each batch");
        None
    };

    let deduplicator = match &pool {
        Some(pool) => Deduplicator::new(
            config.deduplication.clone(),
            Arc::new(SqliteRecordProvider::new(pool.clone())),
        )?,
        None => Deduplicator::batch_only(config.deduplication.clone())?,
    };

    let llm: Option<Arc<dyn LlmProvider>> = match &config.llm {
        Some(llm_config) => match create_llm_provider(llm_config) {
            Ok(provider) => {
                info!("LLM provider initialized: {}", provider.model());
                Some(provider)
            }
            Err(e) => {
                error!("Failed to initialize LLM provider: {:#}", e);
                None
            }
        },
        None => {
            warn!("No [llm] section; articles get extractive summaries");
            None
        }
    };

    let notifier: Option<Arc<dyn Notifier>> = config
        .notifier
        .as_ref()
        .map(|n| Arc::new(OutboxNotifier::new(&n.outbox_dir)) as Arc<dyn Notifier>);

    Ok(PipelineContext { config, pool, deduplicator, llm, notifier })
}

/// Create the remote LLM provider, reading the API key from the configured env var
fn create_llm_provider(llm_config: &common::LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let api_key_env = llm_config
        .api_key_env
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Missing api_key_env in [llm] config"))?;

    let api_key = std::env::var(api_key_env)
        .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

    let provider = RemoteLlmProvider::from_config(llm_config, api_key);
    Ok(Arc::new(provider))
}
