//! Wire format of the Esplora REST API as served by mempool.space.

use bitcoin::Amount;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::{RawTransaction, TxLeg, UNKNOWN_ADDRESS};
use crate::error::MalformedTx;

/// Entry of `GET /blocks`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockSummary {
    pub id: String,
    pub height: u64,
    /// Block header time, unix seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub tx_count: usize,
}

impl BlockSummary {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn id_short(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsploraTx {
    pub txid: Option<String>,
    #[serde(default)]
    pub vin: Vec<EsploraVin>,
    #[serde(default)]
    pub vout: Vec<EsploraVout>,
    /// Satoshis.
    pub fee: Option<u64>,
    pub status: Option<EsploraStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsploraVin {
    pub prevout: Option<EsploraOutput>,
    #[serde(default)]
    pub is_coinbase: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsploraOutput {
    pub scriptpubkey_address: Option<String>,
    /// Satoshis.
    pub value: Option<u64>,
}

pub type EsploraVout = EsploraOutput;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EsploraStatus {
    /// Absent while the tx sits in the mempool.
    pub block_time: Option<i64>,
}

impl EsploraTx {
    /// Convert into the engine's transaction form.
    ///
    /// Coinbase inputs carry no prevout and are skipped. Outputs and
    /// prevouts without a decodable address use [`UNKNOWN_ADDRESS`].
    /// The tx's own block time wins over `block_time`.
    pub fn into_raw(self, block_time: Option<DateTime<Utc>>) -> Result<RawTransaction, MalformedTx> {
        let txid = self.txid.filter(|t| !t.is_empty()).ok_or(MalformedTx::MissingTxid)?;

        let mut inputs = Vec::with_capacity(self.vin.len());
        for (index, vin) in self.vin.into_iter().enumerate() {
            if vin.is_coinbase {
                continue;
            }
            let prevout = vin.prevout.ok_or(MalformedTx::MissingPrevout { index })?;
            let value = prevout.value.ok_or(MalformedTx::MissingInputValue { index })?;
            inputs.push(leg(prevout.scriptpubkey_address, value));
        }

        let mut outputs = Vec::with_capacity(self.vout.len());
        for (index, vout) in self.vout.into_iter().enumerate() {
            let value = vout.value.ok_or(MalformedTx::MissingOutputValue { index })?;
            outputs.push(leg(vout.scriptpubkey_address, value));
        }

        let confirmed_at = self
            .status
            .and_then(|s| s.block_time)
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Ok(RawTransaction {
            txid,
            inputs,
            outputs,
            fee: Amount::from_sat(self.fee.unwrap_or(0)),
            block_time: confirmed_at.or(block_time),
        })
    }
}

fn leg(address: Option<String>, value: u64) -> TxLeg {
    TxLeg::new(
        address.unwrap_or_else(|| UNKNOWN_ADDRESS.to_string()),
        Amount::from_sat(value),
    )
}
