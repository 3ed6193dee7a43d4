pub mod classify;
pub mod netflow;
pub mod pipeline;

use bitcoin::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder used when upstream data carries no decodable address
/// (OP_RETURN outputs, non-standard scripts).
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// One input or output of a transaction as received from upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxLeg {
    pub address: String,
    pub value: Amount,
}

impl TxLeg {
    pub fn new(address: impl Into<String>, value: Amount) -> Self {
        Self {
            address: address.into(),
            value,
        }
    }
}

/// A transaction handed to the engine by the chain-data collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub txid: String,
    pub inputs: Vec<TxLeg>,
    pub outputs: Vec<TxLeg>,
    pub fee: Amount,
    /// Absent for unconfirmed mempool entries.
    pub block_time: Option<DateTime<Utc>>,
}

/// Address and BTC value pair as persisted on a [`WhaleEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressValue {
    pub address: String,
    pub value: f64,
}

impl From<&TxLeg> for AddressValue {
    fn from(leg: &TxLeg) -> Self {
        Self {
            address: leg.address.clone(),
            value: leg.value.to_btc(),
        }
    }
}

/// Exchange relationship of a whale transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Exchange to whale.
    Outflow,
    /// Whale to exchange.
    Inflow,
    /// Exchange addresses on both sides.
    Mixed,
    Unknown,
}

impl Classification {
    /// Whether a known exchange is involved at all.
    pub fn involves_exchange(self) -> bool {
        !matches!(self, Classification::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Outflow => "outflow",
            Classification::Inflow => "inflow",
            Classification::Mixed => "mixed",
            Classification::Unknown => "unknown",
        }
    }

    /// Inverse of [`Classification::as_str`]; anything else reads as unknown.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "outflow" => Classification::Outflow,
            "inflow" => Classification::Inflow,
            "mixed" => Classification::Mixed,
            _ => Classification::Unknown,
        }
    }
}

/// The registry entry that decided a classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDetails {
    pub exchange_address: String,
    pub exchange_name: String,
}

/// A qualifying whale transfer, as stored and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhaleEvent {
    pub txid: String,
    /// Net value moved to addresses outside the input set, in BTC.
    pub value_btc: f64,
    #[serde(default)]
    pub fee_btc: f64,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "unknown_classification")]
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_details: Option<ExchangeDetails>,
    #[serde(default)]
    pub vin_addresses: Vec<AddressValue>,
    #[serde(default)]
    pub vout_addresses: Vec<AddressValue>,
}

fn unknown_classification() -> Classification {
    Classification::Unknown
}

impl WhaleEvent {
    /// First 16 characters of the txid, for log lines.
    pub fn txid_short(&self) -> &str {
        self.txid.get(..16).unwrap_or(&self.txid)
    }
}

/// Convert a BTC decimal back to satoshis, rounding to the nearest sat.
/// Negative and non-finite values clamp to zero.
pub fn btc_to_sat(btc: f64) -> u64 {
    if !btc.is_finite() || btc <= 0.0 {
        return 0;
    }
    (btc * 100_000_000.0).round() as u64
}

/// RFC 3339 on write. On read, naive ISO-8601 timestamps (as written by
/// older collectors) are accepted and taken as UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
    }

    /// Same as the parent module, for `Option<DateTime<Utc>>` fields.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_some(&super::format(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn classification_serializes_lowercase() {
        let json = serde_json::to_string(&Classification::Inflow).unwrap();
        assert_eq!(json, "\"inflow\"");
        let parsed: Classification = serde_json::from_str("\"mixed\"").unwrap();
        assert_eq!(parsed, Classification::Mixed);
    }

    #[test]
    fn only_unknown_has_no_exchange() {
        assert!(Classification::Outflow.involves_exchange());
        assert!(Classification::Inflow.involves_exchange());
        assert!(Classification::Mixed.involves_exchange());
        assert!(!Classification::Unknown.involves_exchange());
    }

    #[test]
    fn naive_timestamp_read_as_utc() {
        let ts = timestamp::parse("2025-12-02T15:52:25.685738").unwrap();
        assert_eq!(
            ts.timestamp(),
            Utc.with_ymd_and_hms(2025, 12, 2, 15, 52, 25).unwrap().timestamp()
        );
    }

    #[test]
    fn offset_timestamp_normalized_to_utc() {
        let ts = timestamp::parse("2025-12-02T01:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 12, 1, 23, 0, 0).unwrap());
    }

    #[test]
    fn garbage_timestamp_rejected() {
        assert!(timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn legacy_event_without_classification_loads() {
        let json = r#"{
            "txid": "abc",
            "value_btc": 250.5,
            "fee_btc": 0.0001,
            "timestamp": "2025-12-02T15:52:25"
        }"#;
        let event: WhaleEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.classification, Classification::Unknown);
        assert!(event.exchange_details.is_none());
        assert!(event.vin_addresses.is_empty());
    }

    #[test]
    fn btc_to_sat_rounds() {
        assert_eq!(btc_to_sat(0.0094), 940_000);
        assert_eq!(btc_to_sat(2103.9906), 210_399_060_000);
        assert_eq!(btc_to_sat(-1.0), 0);
        assert_eq!(btc_to_sat(f64::NAN), 0);
    }

    #[test]
    fn txid_short_handles_short_ids() {
        let event = WhaleEvent {
            txid: "abc".into(),
            value_btc: 1.0,
            fee_btc: 0.0,
            timestamp: Utc::now(),
            classification: Classification::Unknown,
            exchange_details: None,
            vin_addresses: vec![],
            vout_addresses: vec![],
        };
        assert_eq!(event.txid_short(), "abc");
    }

    #[test]
    fn txid_short_on_multibyte_boundary() {
        let mut event: WhaleEvent = serde_json::from_str(
            r#"{"txid": "0123456789abcdeéxyzw", "value_btc": 1.0, "timestamp": "2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(event.txid_short(), "0123456789abcdeéxyzw");
        event.txid = "0123456789abcdef0123".into();
        assert_eq!(event.txid_short(), "0123456789abcdef");
    }
}
