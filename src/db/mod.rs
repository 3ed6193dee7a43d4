pub mod schema;

use chrono::Utc;
use rusqlite::Connection;
use rusqlite::types::Type;
use std::path::Path;

use crate::aggregate::DailyMetrics;
use crate::core::{Classification, ExchangeDetails, WhaleEvent, timestamp};
use crate::error::Result;

/// Downstream SQLite copy of whale events and daily metrics.
pub struct Database {
    conn: Connection,
}

const EVENT_COLUMNS: &str = "txid, value_btc, fee_btc, timestamp, classification, exchange_address, exchange_name, vin_addresses, vout_addresses";

const METRIC_COLUMNS: &str = "date, whale_tx_count, whale_tx_volume_btc, avg_whale_fee_btc, max_whale_tx_btc, exchange_inflow_btc, exchange_outflow_btc, exchange_netflow_btc, exchange_flow_ratio, exchange_whale_tx_count";

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Upsert events keyed by txid in a single transaction.
    pub fn upsert_events(&self, events: &[WhaleEvent]) -> Result<usize> {
        let updated_at = timestamp::format(&Utc::now());
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR REPLACE INTO whale_events ({EVENT_COLUMNS}, timestamp_us, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ))?;
            for e in events {
                let details = e.exchange_details.as_ref();
                stmt.execute(rusqlite::params![
                    e.txid,
                    e.value_btc,
                    e.fee_btc,
                    timestamp::format(&e.timestamp),
                    e.classification.as_str(),
                    details.map(|d| d.exchange_address.as_str()),
                    details.map(|d| d.exchange_name.as_str()),
                    serde_json::to_string(&e.vin_addresses)?,
                    serde_json::to_string(&e.vout_addresses)?,
                    e.timestamp.timestamp_micros(),
                    updated_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Upsert daily rows keyed by date in a single transaction.
    pub fn upsert_daily_metrics(&self, metrics: &[DailyMetrics]) -> Result<usize> {
        let updated_at = timestamp::format(&Utc::now());
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR REPLACE INTO daily_metrics ({METRIC_COLUMNS}, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ))?;
            for m in metrics {
                stmt.execute(rusqlite::params![
                    m.date.to_string(),
                    m.whale_tx_count as i64,
                    m.whale_tx_volume_btc,
                    m.avg_whale_fee_btc,
                    m.max_whale_tx_btc,
                    m.exchange_inflow_btc,
                    m.exchange_outflow_btc,
                    m.exchange_netflow_btc,
                    m.exchange_flow_ratio,
                    m.exchange_whale_tx_count as i64,
                    updated_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(metrics.len())
    }

    pub fn event_count(&self) -> Result<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM whale_events", [], |row| row.get::<_, i64>(0))?;
        Ok(count as usize)
    }

    /// Most recent events by timestamp. Sorted on the integer column, since
    /// RFC 3339 text with optional fractions does not sort chronologically.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<WhaleEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM whale_events ORDER BY timestamp_us DESC, txid LIMIT ?1"
        ))?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(std::io::Error::other(message)))
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<WhaleEvent> {
    let raw_ts: String = row.get(3)?;
    let timestamp =
        timestamp::parse(&raw_ts).ok_or_else(|| conversion_error(3, format!("bad timestamp {raw_ts}")))?;
    let classification: String = row.get(4)?;
    let exchange_address: Option<String> = row.get(5)?;
    let exchange_name: Option<String> = row.get(6)?;
    let vin: String = row.get(7)?;
    let vout: String = row.get(8)?;

    Ok(WhaleEvent {
        txid: row.get(0)?,
        value_btc: row.get(1)?,
        fee_btc: row.get(2)?,
        timestamp,
        classification: Classification::parse(&classification),
        exchange_details: exchange_address.zip(exchange_name).map(|(exchange_address, exchange_name)| {
            ExchangeDetails {
                exchange_address,
                exchange_name,
            }
        }),
        vin_addresses: serde_json::from_str(&vin).map_err(|e| conversion_error(7, e.to_string()))?,
        vout_addresses: serde_json::from_str(&vout).map_err(|e| conversion_error(8, e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::core::AddressValue;
    use crate::store::tests::make_event;
    use chrono::NaiveDate;
    use rusqlite::OptionalExtension;

    fn daily_metric(db: &Database, date: NaiveDate) -> Option<DailyMetrics> {
        db.conn
            .query_row(
                &format!("SELECT {METRIC_COLUMNS} FROM daily_metrics WHERE date = ?1"),
                rusqlite::params![date.to_string()],
                row_to_metrics,
            )
            .optional()
            .unwrap()
    }

    fn row_to_metrics(row: &rusqlite::Row) -> rusqlite::Result<DailyMetrics> {
        let raw_date: String = row.get(0)?;
        Ok(DailyMetrics {
            date: raw_date
                .parse()
                .map_err(|e| conversion_error(0, format!("bad date {raw_date}: {e}")))?,
            whale_tx_count: row.get::<_, i64>(1)? as usize,
            whale_tx_volume_btc: row.get(2)?,
            avg_whale_fee_btc: row.get(3)?,
            max_whale_tx_btc: row.get(4)?,
            exchange_inflow_btc: row.get(5)?,
            exchange_outflow_btc: row.get(6)?,
            exchange_netflow_btc: row.get(7)?,
            exchange_flow_ratio: row.get(8)?,
            exchange_whale_tx_count: row.get::<_, i64>(9)? as usize,
        })
    }

    fn open_temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("whales.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn event_upsert_roundtrip() {
        let (_dir, db) = open_temp_db();
        let mut event = make_event("abc123", 5, 512.25);
        event.classification = Classification::Inflow;
        event.exchange_details = Some(ExchangeDetails {
            exchange_address: "bc1qexchange".into(),
            exchange_name: "Kraken".into(),
        });
        event.vin_addresses = vec![AddressValue {
            address: "bc1qwhale".into(),
            value: 513.0,
        }];

        assert_eq!(db.upsert_events(std::slice::from_ref(&event)).unwrap(), 1);
        let stored = db.recent_events(10).unwrap();
        assert_eq!(stored, vec![event]);
    }

    #[test]
    fn upsert_replaces_by_txid() {
        let (_dir, db) = open_temp_db();
        let mut event = make_event("dup", 0, 300.0);
        db.upsert_events(std::slice::from_ref(&event)).unwrap();
        event.classification = Classification::Outflow;
        db.upsert_events(std::slice::from_ref(&event)).unwrap();

        assert_eq!(db.event_count().unwrap(), 1);
        let stored = db.recent_events(10).unwrap();
        assert_eq!(stored[0].classification, Classification::Outflow);
    }

    #[test]
    fn batch_insert_and_recent_order() {
        let (_dir, db) = open_temp_db();
        let events: Vec<_> = (0..5).map(|i| make_event(&format!("tx{i}"), i, 250.0)).collect();
        db.upsert_events(&events).unwrap();

        assert_eq!(db.event_count().unwrap(), 5);
        let recent = db.recent_events(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].txid, "tx4");
        assert_eq!(recent[1].txid, "tx3");
    }

    #[test]
    fn recent_order_respects_fractional_seconds() {
        let (_dir, db) = open_temp_db();
        let whole = make_event("whole", 0, 250.0);
        let mut half = make_event("half", 0, 250.0);
        half.timestamp += chrono::Duration::milliseconds(500);
        let earlier = make_event("earlier", -1, 250.0);
        db.upsert_events(&[earlier, whole, half]).unwrap();

        let recent = db.recent_events(2).unwrap();
        let txids: Vec<_> = recent.iter().map(|e| e.txid.as_str()).collect();
        assert_eq!(txids, vec!["half", "whole"]);
    }

    #[test]
    fn daily_metrics_upsert_and_lookup() {
        let (_dir, db) = open_temp_db();
        let mut inflow = make_event("in", 10, 50.0);
        inflow.classification = Classification::Inflow;
        let unknown = make_event("plain", 20, 400.0);
        let metrics = aggregate([&inflow, &unknown]);

        assert_eq!(db.upsert_daily_metrics(&metrics).unwrap(), 1);
        let row = daily_metric(&db, metrics[0].date).unwrap();
        assert_eq!(row, metrics[0]);

        // Re-aggregation overwrites the same date
        db.upsert_daily_metrics(&metrics).unwrap();
        let other_day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(daily_metric(&db, other_day).is_none());
    }

    #[test]
    fn null_flow_ratio_survives() {
        let (_dir, db) = open_temp_db();
        let metrics = aggregate([&make_event("plain", 0, 400.0)]);
        assert!(metrics[0].exchange_flow_ratio.is_none());
        db.upsert_daily_metrics(&metrics).unwrap();
        let row = daily_metric(&db, metrics[0].date).unwrap();
        assert!(row.exchange_flow_ratio.is_none());
    }
}
