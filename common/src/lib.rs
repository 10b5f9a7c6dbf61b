/*!
common/src/lib.rs

Shared configuration types and DB helper functions for NewsTracker.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that layers an override file on top of the defaults
- Validation of the static deduplication / scheduling settings
- A helper to open the SQLite connection pool
*/

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Raised when a configuration value is out of range. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid configuration value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Application identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Prefix used in digest titles
    pub name: String,
}

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// When false, nothing is persisted and deduplication only looks at the current batch
    pub enabled: bool,
    /// Path to the sqlite database file (e.g. "data/newstracker.db")
    pub path: String,
}

/// Static deduplication settings. Every field is required; there is no hot reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationConfig {
    pub enabled: bool,
    /// Inclusive threshold on normalized-URL similarity, in [0, 1]
    pub url_similarity_threshold: f64,
    /// Inclusive threshold on normalized-content similarity, in [0, 1]
    pub content_similarity_threshold: f64,
    /// Days of history consulted for content comparisons
    pub load_existing_days: i64,
}

impl DeduplicationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_interval("deduplication.url_similarity_threshold", self.url_similarity_threshold)?;
        check_unit_interval(
            "deduplication.content_similarity_threshold",
            self.content_similarity_threshold,
        )?;
        if self.load_existing_days < 0 {
            return Err(ConfigError::invalid(
                "deduplication.load_existing_days",
                format!("must be >= 0, got {}", self.load_existing_days),
            ));
        }
        Ok(())
    }
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url_similarity_threshold: 0.95,
            content_similarity_threshold: 0.85,
            load_existing_days: 7,
        }
    }
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    // NaN fails the range check too
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("must be within [0, 1], got {}", value),
        ));
    }
    Ok(())
}

/// Feed sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default)]
    pub urls: Vec<String>,
    pub fetch_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Run every `interval_minutes`
    Interval,
    /// Run at each wall-clock time listed in `times` (UTC)
    Daily,
}

/// Scheduler (pipeline cadence) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub mode: ScheduleMode,
    pub interval_minutes: Option<u64>,
    /// List of wall-clock times in "HH:MM" 24h format
    #[serde(default)]
    pub times: Vec<String>,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            ScheduleMode::Interval => match self.interval_minutes {
                Some(m) if m > 0 => Ok(()),
                _ => Err(ConfigError::invalid(
                    "scheduler.interval_minutes",
                    "interval mode needs a positive interval",
                )),
            },
            ScheduleMode::Daily => {
                if self.times.is_empty() {
                    return Err(ConfigError::invalid(
                        "scheduler.times",
                        "daily mode needs at least one time",
                    ));
                }
                for t in &self.times {
                    parse_daily_time(t)?;
                }
                Ok(())
            }
        }
    }

    /// Parsed `times`, sorted. Entries that fail to parse are skipped (validation rejects them
    /// earlier).
    pub fn daily_times(&self) -> Vec<NaiveTime> {
        let mut times: Vec<NaiveTime> = self
            .times
            .iter()
            .filter_map(|t| parse_daily_time(t).ok())
            .collect();
        times.sort();
        times
    }
}

/// Parse a "HH:MM" wall-clock time.
pub fn parse_daily_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| {
        ConfigError::invalid("scheduler.times", format!("`{}` is not HH:MM ({})", value, e))
    })
}

/// Remote LLM config (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// Digest delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Directory receiving one rendered HTML file per digest
    pub outbox_dir: String,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub deduplication: DeduplicationConfig,
    pub feeds: FeedsConfig,
    pub scheduler: SchedulerConfig,
    pub llm: Option<LlmConfig>,
    pub notifier: Option<NotifierConfig>,
}

impl Config {
    /// Load configuration from a single TOML file asynchronously, then validate it.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence). The merged result is
    /// validated before it is returned.
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.deduplication.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and returns a configured `SqlitePool` in WAL mode.
/// Schema creation is left to the caller.
///
/// Example:
///   let pool = init_db_pool("data/newstracker.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [app]
        name = "NewsTracker"

        [database]
        enabled = true
        path = "data/test.db"

        [deduplication]
        enabled = true
        url_similarity_threshold = 0.95
        content_similarity_threshold = 0.85
        load_existing_days = 7

        [feeds]
        urls = ["https://example.com/rss"]

        [scheduler]
        mode = "daily"
        times = ["05:00", "11:30"]
    "#;

    #[test]
    fn parses_and_validates_sample() {
        let cfg: Config = toml::from_str(SAMPLE).expect("parse config");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.scheduler.mode, ScheduleMode::Daily);
        assert_eq!(cfg.scheduler.daily_times().len(), 2);
        assert_eq!(cfg.deduplication, DeduplicationConfig::default());
        assert!(cfg.llm.is_none());
    }

    #[test]
    fn missing_dedup_field_is_a_parse_error() {
        let toml = SAMPLE.replace("load_existing_days = 7", "");
        assert!(toml::from_str::<Config>(&toml).is_err());
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let mut dedup = DeduplicationConfig::default();
        dedup.url_similarity_threshold = 1.2;
        assert!(matches!(
            dedup.validate(),
            Err(ConfigError::Invalid { field: "deduplication.url_similarity_threshold", .. })
        ));

        let mut dedup = DeduplicationConfig::default();
        dedup.content_similarity_threshold = f64::NAN;
        assert!(dedup.validate().is_err());

        let mut dedup = DeduplicationConfig::default();
        dedup.load_existing_days = -1;
        assert!(matches!(
            dedup.validate(),
            Err(ConfigError::Invalid { field: "deduplication.load_existing_days", .. })
        ));
    }

    #[test]
    fn threshold_bounds_are_inclusive() {
        let mut dedup = DeduplicationConfig::default();
        dedup.url_similarity_threshold = 0.0;
        dedup.content_similarity_threshold = 1.0;
        dedup.load_existing_days = 0;
        assert!(dedup.validate().is_ok());
    }

    #[test]
    fn scheduler_validation() {
        let interval = SchedulerConfig {
            mode: ScheduleMode::Interval,
            interval_minutes: Some(0),
            times: vec![],
        };
        assert!(interval.validate().is_err());

        let daily = SchedulerConfig {
            mode: ScheduleMode::Daily,
            interval_minutes: None,
            times: vec!["25:00".into()],
        };
        assert!(daily.validate().is_err());
    }

    #[tokio::test]
    async fn override_file_takes_precedence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");
        tokio::fs::write(&default_path, SAMPLE).await.expect("write default");
        tokio::fs::write(
            &override_path,
            "[deduplication]\ncontent_similarity_threshold = 0.9\n",
        )
        .await
        .expect("write override");

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load");
        assert_eq!(cfg.deduplication.content_similarity_threshold, 0.9);
        // untouched keys of the same table survive the merge
        assert_eq!(cfg.deduplication.url_similarity_threshold, 0.95);
    }

    #[tokio::test]
    async fn invalid_override_is_rejected_at_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");
        tokio::fs::write(&default_path, SAMPLE).await.expect("write default");
        tokio::fs::write(&override_path, "[deduplication]\nload_existing_days = -3\n")
            .await
            .expect("write override");

        let err = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect_err("negative lookback must fail");
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[tokio::test]
    async fn db_pool_in_temp_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("newstracker.db");
        let pool = init_db_pool(&db_path.to_string_lossy()).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
        assert!(db_path.exists());
    }
}
