use std::collections::BTreeMap;
use std::path::Path;

use bitcoin::{Amount, SignedAmount};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Classification, WhaleEvent, btc_to_sat, timestamp};
use crate::error::Result;
use crate::store::persist::write_json_atomic;

/// Whale activity for one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub whale_tx_count: usize,
    pub whale_tx_volume_btc: f64,
    pub avg_whale_fee_btc: f64,
    pub max_whale_tx_btc: f64,
    pub exchange_inflow_btc: f64,
    pub exchange_outflow_btc: f64,
    /// Outflow minus inflow.
    pub exchange_netflow_btc: f64,
    /// Inflow share of exchange flow; `None` when there was no flow.
    pub exchange_flow_ratio: Option<f64>,
    pub exchange_whale_tx_count: usize,
}

/// Output document of an aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricsReport {
    #[serde(with = "timestamp")]
    pub generated_at: DateTime<Utc>,
    pub total_days: usize,
    pub daily_metrics: Vec<DailyMetrics>,
}

impl DailyMetricsReport {
    pub fn build<'a, I>(events: I, generated_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a WhaleEvent>,
    {
        let daily_metrics = aggregate(events);
        Self {
            generated_at,
            total_days: daily_metrics.len(),
            daily_metrics,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json_atomic(path, self)
    }
}

/// Running sums for one day, all in satoshis.
#[derive(Debug, Default)]
struct DayTotals {
    count: usize,
    volume: u64,
    fees: u64,
    max_value: u64,
    inflow: u64,
    outflow: u64,
    exchange_count: usize,
}

impl DayTotals {
    fn add(&mut self, event: &WhaleEvent) {
        let value = btc_to_sat(event.value_btc);
        self.count += 1;
        self.volume = self.volume.saturating_add(value);
        self.fees = self.fees.saturating_add(btc_to_sat(event.fee_btc));
        self.max_value = self.max_value.max(value);

        match event.classification {
            Classification::Inflow => self.inflow = self.inflow.saturating_add(value),
            Classification::Outflow => self.outflow = self.outflow.saturating_add(value),
            Classification::Mixed | Classification::Unknown => {}
        }
        if event.classification.involves_exchange() {
            self.exchange_count += 1;
        }
    }

    fn finish(self, date: NaiveDate) -> DailyMetrics {
        let flow = self.inflow.saturating_add(self.outflow);
        let exchange_flow_ratio = (flow > 0).then(|| self.inflow as f64 / flow as f64);
        let netflow = self.outflow as i64 - self.inflow as i64;

        DailyMetrics {
            date,
            whale_tx_count: self.count,
            whale_tx_volume_btc: sat_to_btc(self.volume),
            avg_whale_fee_btc: round_btc(self.fees as f64 / self.count as f64 / 100_000_000.0),
            max_whale_tx_btc: sat_to_btc(self.max_value),
            exchange_inflow_btc: sat_to_btc(self.inflow),
            exchange_outflow_btc: sat_to_btc(self.outflow),
            exchange_netflow_btc: SignedAmount::from_sat(netflow).to_btc(),
            exchange_flow_ratio,
            exchange_whale_tx_count: self.exchange_count,
        }
    }
}

fn sat_to_btc(sats: u64) -> f64 {
    Amount::from_sat(sats).to_btc()
}

/// Round to satoshi precision.
fn round_btc(btc: f64) -> f64 {
    (btc * 100_000_000.0).round() / 100_000_000.0
}

/// Roll events into one record per UTC calendar day, newest day first.
///
/// Recomputed from scratch each time; the same events always give the same
/// output regardless of their order.
pub fn aggregate<'a, I>(events: I) -> Vec<DailyMetrics>
where
    I: IntoIterator<Item = &'a WhaleEvent>,
{
    let mut days: BTreeMap<NaiveDate, DayTotals> = BTreeMap::new();
    for event in events {
        days.entry(event.timestamp.date_naive()).or_default().add(event);
    }

    days.into_iter()
        .rev()
        .map(|(date, totals)| totals.finish(date))
        .collect()
}
