use bitcoin::Amount;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub collector: CollectorConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub api_base: String,
    /// How many of the most recent blocks each cycle scans.
    pub recent_blocks: usize,
    pub timeout_secs: u64,
    pub proxy: Option<String>,
    /// Needed behind TLS-intercepting corporate proxies.
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectorConfig {
    pub whale_threshold_btc: f64,
    pub interval_minutes: u64,
    /// 0 inspects every transaction in a block.
    pub max_tx_per_block: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub whale_data: PathBuf,
    pub daily_metrics: PathBuf,
    pub exchanges: PathBuf,
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite handoff target; disabled when unset.
    pub path: Option<PathBuf>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base: "https://mempool.space/api".into(),
            recent_blocks: 10,
            timeout_secs: 30,
            proxy: None,
            accept_invalid_certs: false,
            user_agent: concat!("whaleradar/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            whale_threshold_btc: 200.0,
            interval_minutes: 10,
            max_tx_per_block: 0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            whale_data: "data/whale_data.json".into(),
            daily_metrics: "data/daily_metrics.json".into(),
            exchanges: "data/exchange_wallet_addresses.json".into(),
            capacity: crate::store::DEFAULT_CAPACITY,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.whale_threshold()?;
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.storage.capacity == 0 {
            return Err(Error::Config("storage.capacity must be at least 1".into()));
        }
        if self.upstream.recent_blocks == 0 {
            return Err(Error::Config("upstream.recent_blocks must be at least 1".into()));
        }
        if self.collector.interval_minutes == 0 {
            return Err(Error::Config("collector.interval_minutes must be at least 1".into()));
        }
        Ok(())
    }

    /// Whale threshold as an amount; must be positive.
    pub fn whale_threshold(&self) -> Result<Amount> {
        let btc = self.collector.whale_threshold_btc;
        if !btc.is_finite() || btc <= 0.0 {
            return Err(Error::Config(format!(
                "collector.whale_threshold_btc must be positive, got {btc}"
            )));
        }
        Amount::from_btc(btc).map_err(|e| Error::Config(format!("whale threshold {btc}: {e}")))
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collector.interval_minutes * 60)
    }
}
