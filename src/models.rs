use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

/// Store key holding the transaction cache blob.
pub const TRANSACTIONS_CACHE_KEY: &str = "dog:transactions";

/// The JSON document kept under [`TRANSACTIONS_CACHE_KEY`].
///
/// Only the fields this service reads or writes are typed; everything else
/// round-trips through `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionCache {
    #[serde(default)]
    pub transactions: Vec<TransactionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransactionCache {
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_update = Some(Value::String(now.to_rfc3339()));
    }
}

/// One cached transaction. Produced by the ingestion side; this service only
/// fills in `fee_sats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<RecordTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_sats: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransactionRecord {
    pub fn new(txid: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            txid: txid.into(),
            timestamp: Some(RecordTimestamp::Text(timestamp.to_rfc3339())),
            fee_sats: None,
            extra: Map::new(),
        }
    }

    /// Zero is how the ingestion side writes "not yet known".
    pub fn needs_fee(&self) -> bool {
        matches!(self.fee_sats, None | Some(0))
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().and_then(RecordTimestamp::to_utc)
    }
}

/// Timestamps arrive as ISO strings or unix numbers depending on the writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordTimestamp {
    Text(String),
    Unix(Number),
}

impl RecordTimestamp {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            RecordTimestamp::Text(s) => parse_text_timestamp(s),
            RecordTimestamp::Unix(n) => {
                let raw = n.as_f64()?;
                // Millisecond timestamps are >= 1e12 for any date after 2001
                let millis = if raw >= 1e12 { raw } else { raw * 1000.0 };
                Utc.timestamp_millis_opt(millis as i64).single()
            }
        }
    }
}

fn parse_text_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    s.parse::<i64>()
        .ok()
        .and_then(|n| RecordTimestamp::Unix(Number::from(n)).to_utc())
}

/// Direction of a rune transfer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Send,
    Receive,
    #[serde(other)]
    Other,
}

/// One rune balance movement as reported by the indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransferEvent {
    pub txid: String,
    #[serde(default)]
    pub address: String,
    /// Smallest rune unit.
    #[serde(deserialize_with = "de_amount")]
    pub amount: u64,
    pub event: TransferDirection,
    #[serde(default)]
    pub rune_id: String,
    #[serde(default)]
    pub block_height: Option<u64>,
    /// Passed through as the indexer sent it.
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// Indexers send amounts as decimal strings to avoid JS precision loss.
fn de_amount<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::String(s) => s.trim().parse::<u64>().map_err(serde::de::Error::custom),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid amount {n}"))),
        other => Err(serde::de::Error::custom(format!("invalid amount {other}"))),
    }
}
