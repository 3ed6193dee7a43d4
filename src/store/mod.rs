pub mod persist;

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::WhaleEvent;

/// Default retention for the recent whale history.
pub const DEFAULT_CAPACITY: usize = 500;

/// Position of an event: newest timestamp first, then insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    newest_first: Reverse<DateTime<Utc>>,
    seq: u64,
}

/// Bounded, deduplicated whale history ordered newest first.
///
/// `index` always holds exactly the txids present in `ordered`.
#[derive(Debug)]
pub struct WhaleEventStore {
    capacity: usize,
    next_seq: u64,
    ordered: BTreeMap<OrderKey, WhaleEvent>,
    index: HashMap<String, OrderKey>,
    duplicates_rejected: u64,
    evicted: u64,
}

impl Default for WhaleEventStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl WhaleEventStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_seq: 0,
            ordered: BTreeMap::new(),
            index: HashMap::new(),
            duplicates_rejected: 0,
            evicted: 0,
        }
    }

    /// Rebuild from a persisted snapshot. Later duplicates of a txid are
    /// dropped and anything beyond capacity is evicted oldest first.
    pub fn load(capacity: usize, snapshot: Vec<WhaleEvent>) -> Self {
        let mut store = Self::new(capacity);
        for event in snapshot {
            store.try_insert(event);
        }
        // Load-time cleanup is not observability-worthy
        store.duplicates_rejected = 0;
        store.evicted = 0;
        store
    }

    /// Insert unless the txid is already present. Returns `false` without
    /// touching the store for duplicates.
    pub fn try_insert(&mut self, event: WhaleEvent) -> bool {
        if self.index.contains_key(&event.txid) {
            self.duplicates_rejected += 1;
            debug!("Duplicate whale tx rejected: {}", event.txid_short());
            return false;
        }

        let key = OrderKey {
            newest_first: Reverse(event.timestamp),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.index.insert(event.txid.clone(), key);
        self.ordered.insert(key, event);

        while self.ordered.len() > self.capacity {
            if let Some((_, oldest)) = self.ordered.pop_last() {
                self.index.remove(&oldest.txid);
                self.evicted += 1;
                debug!(
                    "Evicted whale tx {} from {} (capacity {})",
                    oldest.txid_short(),
                    oldest.timestamp,
                    self.capacity
                );
            }
        }
        true
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.index.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events newest first.
    pub fn iter(&self) -> impl Iterator<Item = &WhaleEvent> {
        self.ordered.values()
    }

    /// Owned copy of the current contents, newest first.
    pub fn snapshot(&self) -> Vec<WhaleEvent> {
        self.ordered.values().cloned().collect()
    }

    /// Apply `f` to every stored event in place. Ordering fields
    /// (`txid`, `timestamp`) must not be changed by `f`.
    pub fn update_each<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut WhaleEvent),
    {
        for event in self.ordered.values_mut() {
            f(event);
        }
    }

    pub fn duplicates_rejected(&self) -> u64 {
        self.duplicates_rejected
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Total BTC volume held, summed in satoshis.
    pub fn total_volume_btc(&self) -> f64 {
        let sats = self
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(crate::core::btc_to_sat(e.value_btc)));
        bitcoin::Amount::from_sat(sats).to_btc()
    }
}
