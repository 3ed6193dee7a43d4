//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Bitcoin whale transfer collector and exchange-flow aggregator
#[derive(Parser, Debug)]
#[command(name = "whaleradar")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, env = "WHALERADAR_CONFIG", default_value = "config.toml", global = true)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "WHALERADAR_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Override collector.whale_threshold_btc
    #[arg(long, global = true)]
    pub threshold: Option<f64>,

    /// Override collector.interval_minutes
    #[arg(long, global = true)]
    pub interval: Option<u64>,

    /// Override collector.max_tx_per_block (0 = all)
    #[arg(long, global = true)]
    pub max_tx_per_block: Option<usize>,

    /// Override upstream.proxy
    #[arg(long, env = "WHALERADAR_PROXY", global = true)]
    pub proxy: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan recent blocks for whale transfers
    Collect {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Roll stored whale events up into daily metrics
    Aggregate,

    /// Re-run exchange classification over stored events
    Reclassify,

    /// Fetch missing input/output address lists for stored events
    Backfill {
        /// Re-download even when address lists are present
        #[arg(long)]
        force: bool,

        /// Max number of transactions to fetch (0 = all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(threshold) = self.threshold {
            config.collector.whale_threshold_btc = threshold;
        }
        if let Some(interval) = self.interval {
            config.collector.interval_minutes = interval;
        }
        if let Some(max) = self.max_tx_per_block {
            config.collector.max_tx_per_block = max;
        }
        if let Some(proxy) = &self.proxy {
            config.upstream.proxy = Some(proxy.clone());
        }
    }
}
