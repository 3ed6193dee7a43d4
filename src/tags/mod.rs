use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One labelled address in the registry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeAddress {
    pub address: String,
    pub label: String,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    addresses: Vec<ExchangeAddress>,
}

/// Direction of exchange flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    ToExchange,
    FromExchange,
}

/// A transaction address that belongs to a known exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMatch<'a> {
    pub address: &'a str,
    pub exchange: &'a str,
    pub direction: FlowDirection,
}

/// Immutable address -> exchange name lookup.
#[derive(Debug, Clone, Default)]
pub struct ExchangeRegistry {
    map: HashMap<String, String>,
}

impl ExchangeRegistry {
    /// Load the registry JSON. A missing file gives an empty registry.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(
                "Exchange registry {} not found, every whale will classify as unknown",
                path.display()
            );
            return Ok(Self::empty());
        }
        let contents = std::fs::read_to_string(path)?;
        let file: RegistryFile = serde_json::from_str(&contents)?;
        let registry = Self::from_entries(file.addresses);
        tracing::info!(
            "Exchange registry loaded {} addresses from {} exchanges",
            registry.len(),
            registry.exchange_count()
        );
        Ok(registry)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from entries; later duplicates win, empty addresses are dropped.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = ExchangeAddress>,
    {
        let mut map = HashMap::new();
        for entry in entries {
            let address = entry.address.trim();
            if address.is_empty() {
                continue;
            }
            map.insert(address.to_string(), entry.label);
        }
        Self { map }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of distinct exchange labels.
    pub fn exchange_count(&self) -> usize {
        self.map.values().collect::<HashSet<_>>().len()
    }

    /// Every registry hit among `addresses`, in the order given.
    pub fn check_addresses<'q, I>(&self, addresses: I, direction: FlowDirection) -> Vec<ExchangeMatch<'_>>
    where
        I: IntoIterator<Item = &'q str>,
    {
        addresses
            .into_iter()
            .filter_map(|address| {
                self.map.get_key_value(address).map(|(address, exchange)| ExchangeMatch {
                    address: address.as_str(),
                    exchange: exchange.as_str(),
                    direction,
                })
            })
            .collect()
    }
}
