use std::collections::HashMap;

use bitcoin::Amount;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::classify::classify;
use super::netflow::{compute_net_transfer, is_whale};
use super::{AddressValue, Classification, RawTransaction, WhaleEvent};
use crate::config::Config;
use crate::error::Result;
use crate::store::WhaleEventStore;
use crate::tags::ExchangeRegistry;
use crate::upstream::{BlockSummary, ChainSource, EsploraTx};

/// Knobs for one collection cycle.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub threshold: Amount,
    pub recent_blocks: usize,
    /// 0 means every transaction in the block.
    pub max_tx_per_block: usize,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            threshold: config.whale_threshold()?,
            recent_blocks: config.upstream.recent_blocks,
            max_tx_per_block: config.collector.max_tx_per_block,
        })
    }
}

/// What a cycle saw and changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub blocks_scanned: usize,
    pub txs_scanned: usize,
    pub malformed: usize,
    pub whales_found: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub evicted: u64,
}

/// Per-class tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub outflow: usize,
    pub inflow: usize,
    pub mixed: usize,
    pub unknown: usize,
    /// Events left as they were because their address lists are missing.
    pub skipped: usize,
}

/// Outcome of a backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub candidates: usize,
    pub updated: usize,
    pub not_found: usize,
    pub failed: usize,
}

impl ClassCounts {
    pub fn record(&mut self, class: Classification) {
        match class {
            Classification::Outflow => self.outflow += 1,
            Classification::Inflow => self.inflow += 1,
            Classification::Mixed => self.mixed += 1,
            Classification::Unknown => self.unknown += 1,
        }
    }
}

/// Turn one transaction into a whale event if its net transfer clears the
/// threshold. `now` stands in for the timestamp of unconfirmed transactions.
pub fn analyze_transaction(
    tx: &RawTransaction,
    threshold: Amount,
    registry: &ExchangeRegistry,
    now: DateTime<Utc>,
) -> Option<WhaleEvent> {
    let net = compute_net_transfer(&tx.inputs, &tx.outputs);
    if !is_whale(net.net_value, threshold) {
        return None;
    }
    debug!(
        txid = %tx.txid,
        external_outputs = net.external_outputs.len(),
        change_outputs = tx.outputs.len() - net.external_outputs.len(),
        "Net transfer above threshold"
    );

    let (classification, exchange_details) = classify(
        tx.inputs.iter().map(|i| i.address.as_str()),
        tx.outputs.iter().map(|o| o.address.as_str()),
        registry,
    );

    Some(WhaleEvent {
        txid: tx.txid.clone(),
        value_btc: net.net_value.to_btc(),
        fee_btc: tx.fee.to_btc(),
        timestamp: tx.block_time.unwrap_or(now),
        classification,
        exchange_details,
        vin_addresses: tx.inputs.iter().map(AddressValue::from).collect(),
        vout_addresses: tx.outputs.iter().map(AddressValue::from).collect(),
    })
}

/// Run one collection cycle against `source`.
///
/// Every block is fetched before the store is touched, so a fetch failure
/// returns the error with the store unchanged.
pub async fn run_cycle<S: ChainSource>(
    source: &S,
    registry: &ExchangeRegistry,
    store: &mut WhaleEventStore,
    settings: &CycleSettings,
    now: DateTime<Utc>,
) -> Result<CycleReport> {
    let blocks = source.recent_blocks(settings.recent_blocks).await?;
    info!(
        "Analyzing {} blocks ({})",
        blocks.len(),
        match settings.max_tx_per_block {
            0 => "all txs".to_string(),
            n => format!("first {n} txs each"),
        }
    );

    let mut fetched: Vec<(BlockSummary, Vec<EsploraTx>)> = Vec::with_capacity(blocks.len());
    for block in blocks {
        let txs = source.block_transactions(&block, settings.max_tx_per_block).await?;
        fetched.push((block, txs));
    }

    let mut report = CycleReport {
        blocks_scanned: fetched.len(),
        ..CycleReport::default()
    };
    let mut candidates = Vec::new();

    for (block, txs) in fetched {
        let block_time = block.time();
        for esplora_tx in txs {
            report.txs_scanned += 1;
            let txid_hint = esplora_tx.txid.clone().unwrap_or_default();
            let tx = match esplora_tx.into_raw(block_time) {
                Ok(tx) => tx,
                Err(e) => {
                    report.malformed += 1;
                    warn!(
                        block = block.id_short(),
                        txid = %txid_hint,
                        "Skipping malformed transaction: {e}"
                    );
                    continue;
                }
            };
            if let Some(event) = analyze_transaction(&tx, settings.threshold, registry, now) {
                // Recent blocks overlap between cycles; only announce new ones
                if store.contains(&event.txid) {
                    debug!("Known whale seen again: {}", event.txid_short());
                } else {
                    info!(
                        "Whale found: {} BTC (tx {}...) [{}]",
                        event.value_btc,
                        event.txid_short(),
                        event.classification.as_str()
                    );
                }
                candidates.push(event);
            }
        }
    }

    report.whales_found = candidates.len();
    let evicted_before = store.evicted();
    for event in candidates {
        if store.try_insert(event) {
            report.inserted += 1;
        } else {
            report.duplicates += 1;
        }
    }
    report.evicted = store.evicted() - evicted_before;

    if report.duplicates > 0 {
        info!("{} duplicate whale txs skipped", report.duplicates);
    }
    debug!(?report, "Cycle finished");
    Ok(report)
}

/// Events from older history files carry no address lists; they cannot be
/// classified until backfilled.
pub fn needs_backfill(event: &WhaleEvent) -> bool {
    event.vin_addresses.is_empty() || event.vout_addresses.is_empty()
}

/// Re-run classification for every stored event against `registry`.
/// Events without address lists keep their current label.
pub fn reclassify_all(store: &mut WhaleEventStore, registry: &ExchangeRegistry) -> ClassCounts {
    let mut counts = ClassCounts::default();
    store.update_each(|event| {
        if needs_backfill(event) {
            counts.skipped += 1;
            return;
        }
        let (classification, details) = classify(
            event.vin_addresses.iter().map(|a| a.address.as_str()),
            event.vout_addresses.iter().map(|a| a.address.as_str()),
            registry,
        );
        event.classification = classification;
        event.exchange_details = details;
        counts.record(classification);
    });
    counts
}

/// Fill in missing address lists (all of them with `force`) from
/// `source.transaction`. At most `limit` events are fetched, 0 means no
/// limit. A transaction that cannot be fetched or decoded is skipped; the
/// store is only updated after every fetch has been attempted.
pub async fn backfill_legs<S: ChainSource>(
    source: &S,
    store: &mut WhaleEventStore,
    force: bool,
    limit: usize,
) -> BackfillReport {
    let wanted: Vec<String> = store
        .iter()
        .filter(|event| force || needs_backfill(event))
        .take(if limit == 0 { usize::MAX } else { limit })
        .map(|event| event.txid.clone())
        .collect();

    let mut report = BackfillReport {
        candidates: wanted.len(),
        ..BackfillReport::default()
    };
    if wanted.is_empty() {
        return report;
    }
    info!("Backfilling address lists for {} whale txs", wanted.len());

    let mut fetched: HashMap<String, RawTransaction> = HashMap::with_capacity(wanted.len());
    for txid in wanted {
        match source.transaction(&txid).await {
            Ok(Some(esplora_tx)) => match esplora_tx.into_raw(None) {
                Ok(tx) => {
                    fetched.insert(txid, tx);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(txid = %txid, "Skipping malformed transaction: {e}");
                }
            },
            Ok(None) => {
                report.not_found += 1;
                warn!("Whale tx {txid} not found upstream");
            }
            Err(e) => {
                report.failed += 1;
                error!("Fetching whale tx {txid} failed: {e}");
            }
        }
    }

    store.update_each(|event| {
        if let Some(tx) = fetched.remove(&event.txid) {
            event.vin_addresses = tx.inputs.iter().map(AddressValue::from).collect();
            event.vout_addresses = tx.outputs.iter().map(AddressValue::from).collect();
            if event.fee_btc == 0.0 {
                event.fee_btc = tx.fee.to_btc();
            }
            report.updated += 1;
        }
    });
    report
}
