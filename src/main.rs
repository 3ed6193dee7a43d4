mod aggregate;
mod cli;
mod config;
mod core;
mod db;
mod error;
mod store;
mod tags;
mod upstream;

use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::aggregate::DailyMetricsReport;
use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::core::pipeline::{CycleSettings, backfill_legs, reclassify_all, run_cycle};
use crate::db::Database;
use crate::error::Result;
use crate::store::WhaleEventStore;
use crate::store::persist::{CollectionMetadata, WhaleDataFile};
use crate::tags::ExchangeRegistry;
use crate::upstream::MempoolClient;
use crate::upstream::retry::RetryPolicy;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    info!("WhaleRadar starting...");

    let mut config = Config::load(&cli.config);
    cli.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Config: {:?}", config);

    let result = match cli.command {
        Command::Collect { once } => run_collect(&config, once).await,
        Command::Aggregate => run_aggregate(&config),
        Command::Reclassify => run_reclassify(&config),
        Command::Backfill { force, limit } => run_backfill(&config, force, limit).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins when set; otherwise only this crate at `level`.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("whaleradar={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Long-lived state of the `collect` command.
struct Collector<'a> {
    config: &'a Config,
    client: MempoolClient,
    registry: ExchangeRegistry,
    store: WhaleEventStore,
    metadata: CollectionMetadata,
    settings: CycleSettings,
    db: Option<Database>,
}

impl<'a> Collector<'a> {
    fn open(config: &'a Config) -> Result<Self> {
        let registry = ExchangeRegistry::load(&config.storage.exchanges)?;
        let history_exists = config.storage.whale_data.exists();
        let (mut store, metadata) =
            WhaleDataFile::load(&config.storage.whale_data)?.into_store(config.storage.capacity);
        info!(
            "Loaded {} stored whale events from {} ({} previous collections)",
            store.len(),
            config.storage.whale_data.display(),
            metadata.total_collections
        );

        let client = MempoolClient::new(&config.upstream, RetryPolicy::new(&config.retry))?;
        info!("Upstream: {}", config.upstream.api_base);

        let db = config.database.path.as_deref().map(Database::open).transpose()?;
        if let (Some(db), Some(path)) = (&db, &config.database.path) {
            info!(
                "SQLite handoff enabled at {} ({} events stored)",
                path.display(),
                db.event_count()?
            );
            // Without a history file, rebuild the window from the database copy
            if !history_exists {
                let seeded = db.recent_events(config.storage.capacity)?;
                if !seeded.is_empty() {
                    info!("Seeding store with {} events from SQLite", seeded.len());
                    store = WhaleEventStore::load(config.storage.capacity, seeded);
                }
            }
        }

        Ok(Self {
            config,
            client,
            registry,
            store,
            metadata,
            settings: CycleSettings::from_config(config)?,
            db,
        })
    }

    /// One cycle plus persistence. On error nothing is written.
    async fn cycle(&mut self) -> Result<()> {
        let now = Utc::now();
        let report = run_cycle(&self.client, &self.registry, &mut self.store, &self.settings, now).await?;

        self.metadata.record_cycle(now, report.inserted);
        WhaleDataFile::from_store(&self.store, self.metadata.clone()).save(&self.config.storage.whale_data)?;

        if let Some(db) = &self.db {
            let pushed = db.upsert_events(&self.store.snapshot())?;
            debug!("Pushed {pushed} events to SQLite");
        }

        info!(
            "Cycle #{}: {} blocks, {} txs, {} whales ({} new, {} duplicate, {} evicted, {} malformed skipped); store {}/{} events, {:.2} BTC",
            self.metadata.total_collections,
            report.blocks_scanned,
            report.txs_scanned,
            report.whales_found,
            report.inserted,
            report.duplicates,
            report.evicted,
            report.malformed,
            self.store.len(),
            self.store.capacity(),
            self.store.total_volume_btc()
        );
        Ok(())
    }
}

async fn run_collect(config: &Config, once: bool) -> Result<()> {
    let mut collector = Collector::open(config)?;

    if once {
        return collector.cycle().await;
    }

    info!(
        "Collecting every {} minutes, Ctrl-C to stop",
        config.collector.interval_minutes
    );
    let mut ticker = tokio::time::interval(config.collection_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Cycles are awaited in place, so they never overlap
                if let Err(e) = collector.cycle().await {
                    error!("Collection cycle failed, state left unchanged: {e}");
                }
            }
            _ = &mut shutdown => {
                info!(
                    "Shutting down after {} collections ({} duplicates rejected, {} evicted this session)",
                    collector.metadata.total_collections,
                    collector.store.duplicates_rejected(),
                    collector.store.evicted()
                );
                return Ok(());
            }
        }
    }
}

fn run_aggregate(config: &Config) -> Result<()> {
    let data = WhaleDataFile::load(&config.storage.whale_data)?;
    info!("Aggregating {} whale events", data.whale_transactions.len());

    let report = DailyMetricsReport::build(&data.whale_transactions, Utc::now());
    report.save(&config.storage.daily_metrics)?;
    info!(
        "Wrote {} days of metrics to {}",
        report.total_days,
        config.storage.daily_metrics.display()
    );

    if let Some(path) = &config.database.path {
        let pushed = Database::open(path)?.upsert_daily_metrics(&report.daily_metrics)?;
        info!("Pushed {pushed} daily rows to SQLite");
    }

    for day in report.daily_metrics.iter().take(5) {
        info!(
            "{}: {} whale txs, {:.2} BTC, inflow {:.2}, outflow {:.2}, netflow {:+.2}, ratio {}",
            day.date,
            day.whale_tx_count,
            day.whale_tx_volume_btc,
            day.exchange_inflow_btc,
            day.exchange_outflow_btc,
            day.exchange_netflow_btc,
            day.exchange_flow_ratio
                .map(|r| format!("{r:.3}"))
                .unwrap_or_else(|| "n/a".into())
        );
    }
    Ok(())
}

fn run_reclassify(config: &Config) -> Result<()> {
    let registry = ExchangeRegistry::load(&config.storage.exchanges)?;
    let (mut store, metadata) =
        WhaleDataFile::load(&config.storage.whale_data)?.into_store(config.storage.capacity);
    if store.is_empty() {
        info!("No stored whale events to reclassify");
        return Ok(());
    }

    if registry.is_empty() {
        warn!("Exchange registry is empty, every event will reclassify as unknown");
    }

    let counts = reclassify_all(&mut store, &registry);
    info!(
        "Reclassified {} events: {} inflow, {} outflow, {} mixed, {} unknown",
        store.len() - counts.skipped,
        counts.inflow,
        counts.outflow,
        counts.mixed,
        counts.unknown
    );
    if counts.skipped > 0 {
        warn!(
            "{} events have no address lists and kept their label; run `backfill` first",
            counts.skipped
        );
    }

    WhaleDataFile::from_store(&store, metadata).save(&config.storage.whale_data)?;
    if let Some(path) = &config.database.path {
        Database::open(path)?.upsert_events(&store.snapshot())?;
    }
    Ok(())
}

async fn run_backfill(config: &Config, force: bool, limit: usize) -> Result<()> {
    let (mut store, metadata) =
        WhaleDataFile::load(&config.storage.whale_data)?.into_store(config.storage.capacity);
    let client = MempoolClient::new(&config.upstream, RetryPolicy::new(&config.retry))?;

    let report = backfill_legs(&client, &mut store, force, limit).await;
    if report.candidates == 0 {
        info!("Nothing to backfill, every stored event has address lists");
        return Ok(());
    }
    info!(
        "Backfilled {} of {} events ({} not found, {} failed)",
        report.updated, report.candidates, report.not_found, report.failed
    );

    if report.updated > 0 {
        WhaleDataFile::from_store(&store, metadata).save(&config.storage.whale_data)?;
        if let Some(path) = &config.database.path {
            Database::open(path)?.upsert_events(&store.snapshot())?;
        }
    }
    Ok(())
}
