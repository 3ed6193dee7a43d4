use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS whale_events (
            txid             TEXT PRIMARY KEY,
            value_btc        REAL NOT NULL,
            fee_btc          REAL NOT NULL,
            timestamp        TEXT NOT NULL,
            timestamp_us     INTEGER NOT NULL, -- sort key, unix microseconds
            classification   TEXT NOT NULL,
            exchange_address TEXT,
            exchange_name    TEXT,
            vin_addresses    TEXT NOT NULL, -- JSON
            vout_addresses   TEXT NOT NULL, -- JSON
            updated_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS daily_metrics (
            date                    TEXT PRIMARY KEY,
            whale_tx_count          INTEGER NOT NULL,
            whale_tx_volume_btc     REAL NOT NULL,
            avg_whale_fee_btc       REAL NOT NULL,
            max_whale_tx_btc        REAL NOT NULL,
            exchange_inflow_btc     REAL NOT NULL,
            exchange_outflow_btc    REAL NOT NULL,
            exchange_netflow_btc    REAL NOT NULL,
            exchange_flow_ratio     REAL,
            exchange_whale_tx_count INTEGER NOT NULL,
            updated_at              TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_whale_events_timestamp ON whale_events(timestamp_us DESC);
        CREATE INDEX IF NOT EXISTS idx_whale_events_class ON whale_events(classification);
        ",
    )?;
    Ok(())
}
