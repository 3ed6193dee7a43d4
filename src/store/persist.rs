use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::WhaleEventStore;
use crate::core::{WhaleEvent, timestamp};
use crate::error::Result;

/// Bookkeeping about collection runs, kept next to the events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    #[serde(default, with = "timestamp::option")]
    pub last_collection: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_collections: u64,
    #[serde(default)]
    pub last_collection_found_new: usize,
}

impl CollectionMetadata {
    /// Record a successful cycle.
    pub fn record_cycle(&mut self, at: DateTime<Utc>, found_new: usize) {
        self.last_collection = Some(at);
        self.total_collections += 1;
        self.last_collection_found_new = found_new;
    }
}

/// On-disk shape of the whale history file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhaleDataFile {
    #[serde(default)]
    pub whale_transactions: Vec<WhaleEvent>,
    #[serde(default)]
    pub metadata: CollectionMetadata,
}

impl WhaleDataFile {
    /// Load the history file; a missing file is an empty history.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn from_store(store: &WhaleEventStore, metadata: CollectionMetadata) -> Self {
        Self {
            whale_transactions: store.snapshot(),
            metadata,
        }
    }

    /// Split into a store (capped, deduplicated) and its metadata.
    pub fn into_store(self, capacity: usize) -> (WhaleEventStore, CollectionMetadata) {
        (
            WhaleEventStore::load(capacity, self.whale_transactions),
            self.metadata,
        )
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json_atomic(path, self)
    }
}

/// Read a JSON file, `None` if it does not exist.
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<T>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Replace `path` with the pretty JSON form of `value` in one rename.
/// Readers see either the old file or the new one, never a partial write.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    tracing::debug!("Wrote {} ({} bytes)", path.display(), body.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AddressValue, Classification, ExchangeDetails};
    use crate::store::tests::make_event;
    use crate::store::DEFAULT_CAPACITY;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = WhaleDataFile::load(dir.path().join("whale_data.json")).unwrap();
        assert!(file.whale_transactions.is_empty());
        assert_eq!(file.metadata, CollectionMetadata::default());
    }

    #[test]
    fn save_then_load_round_trips_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("whale_data.json");

        let mut store = WhaleEventStore::default();
        let mut inflow = make_event("inflow-tx", 5, 321.12345678);
        inflow.classification = Classification::Inflow;
        inflow.exchange_details = Some(ExchangeDetails {
            exchange_address: "bc1qexchange".into(),
            exchange_name: "Binance".into(),
        });
        inflow.vin_addresses = vec![AddressValue { address: "bc1qwhale".into(), value: 400.0 }];
        inflow.vout_addresses = vec![AddressValue { address: "bc1qexchange".into(), value: 321.12345678 }];
        store.try_insert(inflow);
        store.try_insert(make_event("plain-tx", 1, 250.0));

        let mut metadata = CollectionMetadata::default();
        metadata.record_cycle(Utc::now(), 2);
        WhaleDataFile::from_store(&store, metadata.clone()).save(&path).unwrap();

        let (reloaded, reloaded_meta) = WhaleDataFile::load(&path).unwrap().into_store(DEFAULT_CAPACITY);
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert_eq!(reloaded_meta, metadata);
    }

    #[test]
    fn file_uses_expected_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whale_data.json");

        let mut store = WhaleEventStore::default();
        store.try_insert(make_event("a", 0, 250.0));
        WhaleDataFile::from_store(&store, CollectionMetadata::default()).save(&path).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let first = &raw["whale_transactions"][0];
        assert_eq!(first["txid"], "a");
        assert_eq!(first["classification"], "unknown");
        assert!(first.get("exchange_details").is_none());
        assert!(raw["metadata"]["last_collection"].is_null());
    }

    #[test]
    fn legacy_file_without_metadata_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whale_data.json");
        std::fs::write(
            &path,
            r#"{"whale_transactions": [
                {"txid": "t1", "value_btc": 201.0, "fee_btc": 0.0002, "timestamp": "2025-12-02T15:52:25.685738"}
            ]}"#,
        )
        .unwrap();

        let file = WhaleDataFile::load(&path).unwrap();
        assert_eq!(file.whale_transactions.len(), 1);
        assert_eq!(file.metadata.total_collections, 0);
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        std::fs::write(&path, "old contents").unwrap();

        write_json_atomic(&path, &serde_json::json!({"k": 1})).unwrap();
        let value: serde_json::Value = read_json(&path).unwrap().unwrap();
        assert_eq!(value["k"], 1);

        // No stray temp files left behind
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn metadata_counts_cycles() {
        let mut metadata = CollectionMetadata::default();
        metadata.record_cycle(Utc::now(), 3);
        metadata.record_cycle(Utc::now(), 0);
        assert_eq!(metadata.total_collections, 2);
        assert_eq!(metadata.last_collection_found_new, 0);
        assert!(metadata.last_collection.is_some());
    }
}
