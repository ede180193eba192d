//! Configuration management for the backfill.
//!
//! Supports loading from environment variables, config files, and CLI arguments.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Chain RPC settings
    pub rpc: RpcConfig,

    /// Document store settings
    pub store: StoreConfig,

    /// Chunking and write batching
    #[serde(default)]
    pub scan: ScanConfig,

    /// Days to backfill
    #[serde(default)]
    pub window: WindowConfig,
}

/// Chain RPC settings.
///
/// The transport is HTTP(S) JSON-RPC only; `ws://` and `wss://` endpoints are
/// rejected by [`IndexerConfig::validate`]. The connection refresh between
/// days rebuilds the HTTP client instead of re-opening a socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// HTTP JSON-RPC endpoint (`RPC_URL_HTTP_ENDPOINT`)
    pub url: String,

    /// Maximum requests per second
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,

    /// Maximum concurrent in-flight requests
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Retry attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (ms)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Pause between disconnect and reconnect when refreshing between days (ms)
    #[serde(default = "default_reconnect_settle_ms")]
    pub reconnect_settle_ms: u64,
}

impl RpcConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            requests_per_second: default_rps(),
            max_in_flight: default_max_in_flight(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
            reconnect_settle_ms: default_reconnect_settle_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// MongoDB connection string
    pub url: String,

    /// Database holding day collections and checkpoints
    pub database: String,

    #[serde(default = "default_checkpoint_collection")]
    pub checkpoint_collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Blocks per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Chunks processed concurrently within a day
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Queued upserts that trigger a flush
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            batch_threshold: default_batch_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// First UTC day to process
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    /// Number of days to process
    #[serde(default = "default_day_count")]
    pub day_count: u32,

    /// Distance between processed days
    #[serde(default = "default_day_step")]
    pub day_step: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            day_count: default_day_count(),
            day_step: default_day_step(),
        }
    }
}

// Default value functions
fn default_rps() -> u32 {
    25
}

fn default_max_in_flight() -> usize {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_reconnect_settle_ms() -> u64 {
    5000
}

fn default_checkpoint_collection() -> String {
    crate::schemas::CHECKPOINT_COLLECTION.to_string()
}

fn default_chunk_size() -> u64 {
    100
}

fn default_concurrency() -> usize {
    1
}

fn default_batch_threshold() -> usize {
    300
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 3, 25).unwrap_or_default()
}

fn default_day_count() -> u32 {
    1
}

fn default_day_step() -> i64 {
    1
}

fn env_var(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{} environment variable not set", name))
}

impl IndexerConfig {
    /// Load configuration from environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            rpc: RpcConfig::with_url(env_var("RPC_URL_HTTP_ENDPOINT")?),
            store: StoreConfig {
                url: env_var("MONGO_URL")?,
                database: env_var("MONGO_DB_NAME")?,
                checkpoint_collection: default_checkpoint_collection(),
            },
            scan: ScanConfig::default(),
            window: WindowConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML config file with environment overrides
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = ::toml::from_str(&contents)?;

        // Environment variables override file settings
        if let Ok(url) = std::env::var("RPC_URL_HTTP_ENDPOINT") {
            config.rpc.url = url;
        }
        if let Ok(url) = std::env::var("MONGO_URL") {
            config.store.url = url;
        }
        if let Ok(database) = std::env::var("MONGO_DB_NAME") {
            config.store.database = database;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc.url.is_empty() {
            anyhow::bail!("rpc.url must be set");
        }
        if !(self.rpc.url.starts_with("http://") || self.rpc.url.starts_with("https://")) {
            anyhow::bail!("rpc.url must be an http(s) endpoint, got {}", self.rpc.url);
        }
        if self.store.url.is_empty() || self.store.database.is_empty() {
            anyhow::bail!("store.url and store.database must be set");
        }
        if self.scan.chunk_size == 0 {
            anyhow::bail!("scan.chunk_size must be > 0");
        }
        if self.scan.concurrency == 0 {
            anyhow::bail!("scan.concurrency must be > 0");
        }
        if self.scan.batch_threshold == 0 {
            anyhow::bail!("scan.batch_threshold must be > 0");
        }
        if self.window.day_step == 0 {
            anyhow::bail!("window.day_step must not be 0");
        }
        Ok(())
    }
}
