/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Feedloom.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file with layered defaults
- A helper to initialize an SQLite connection pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/feedloom.db")
    pub path: String,
}

/// Feed fetcher configuration section.
///
/// All intervals are plain integers in the unit named by the key so the
/// TOML stays readable; use the accessor methods to get `Duration`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// How often the scheduler looks for due feeds
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_seconds: u64,
    /// Minimum gap between successful fetches of the same feed
    #[serde(default = "default_success_interval")]
    pub success_interval_seconds: u64,
    /// Concurrent per-feed pipelines
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Maximum feeds picked up per scheduler tick
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Minimum gap between successive requests to one host
    #[serde(default = "default_domain_delay")]
    pub domain_delay_seconds: u64,
    /// Deadline for one feed's rate-limit + fetch + persist pipeline
    #[serde(default = "default_job_timeout")]
    pub job_timeout_seconds: u64,
    /// HTTP client fallback timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Response body cap in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Per-fetch article cap
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
}

fn default_fetch_interval() -> u64 {
    300
}
fn default_success_interval() -> u64 {
    3600
}
fn default_worker_count() -> usize {
    10
}
fn default_batch_size() -> i64 {
    1000
}
fn default_domain_delay() -> u64 {
    3
}
fn default_job_timeout() -> u64 {
    45
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}
fn default_max_articles() -> usize {
    100
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            fetch_interval_seconds: default_fetch_interval(),
            success_interval_seconds: default_success_interval(),
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            domain_delay_seconds: default_domain_delay(),
            job_timeout_seconds: default_job_timeout(),
            request_timeout_seconds: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
            max_articles: default_max_articles(),
        }
    }
}

impl FetcherConfig {
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_seconds)
    }

    pub fn success_interval(&self) -> Duration {
        Duration::from_secs(self.success_interval_seconds)
    }

    pub fn domain_delay(&self) -> Duration {
        Duration::from_secs(self.domain_delay_seconds)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
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
/// Creates the parent directory if necessary, ensures the DB file exists
/// (surfacing filesystem errors early instead of via the connect attempt),
/// and returns a configured `SqlitePool` in WAL mode.
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create DB parent directory: {}", parent.display())
        })?;
    }

    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

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

    #[test]
    fn merge_override_wins() {
        let mut base: toml::Value = toml::from_str(
            r#"
            [database]
            path = "data/default.db"

            [fetcher]
            worker_count = 10
            batch_size = 1000
            "#,
        )
        .unwrap();
        let over: toml::Value = toml::from_str(
            r#"
            [fetcher]
            worker_count = 2
            "#,
        )
        .unwrap();

        merge_toml(&mut base, over);
        let cfg: Config = base.try_into().unwrap();

        assert_eq!(cfg.database.path, "data/default.db");
        assert_eq!(cfg.fetcher.worker_count, 2);
        assert_eq!(cfg.fetcher.batch_size, 1000);
    }

    #[test]
    fn fetcher_defaults_fill_missing_keys() {
        let cfg: Config = toml::from_str(
            r#"
            [database]
            path = "data/feedloom.db"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.fetcher.fetch_interval_seconds, 300);
        assert_eq!(cfg.fetcher.success_interval_seconds, 3600);
        assert_eq!(cfg.fetcher.worker_count, 10);
        assert_eq!(cfg.fetcher.domain_delay(), Duration::from_secs(3));
        assert_eq!(cfg.fetcher.max_body_bytes, 2 * 1024 * 1024);
        assert_eq!(cfg.fetcher.max_articles, 100);
    }

    #[tokio::test]
    async fn init_db_pool_creates_file_and_connects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("feedloom.db");
        let pool = init_db_pool(db_path.to_str().expect("utf8 path"))
            .await
            .expect("init pool");

        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
    }
}
