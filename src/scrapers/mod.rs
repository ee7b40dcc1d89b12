//! Upstream fetchers.
//!
//! Every external endpoint gets one adapter implementing [`Upstream`]. An
//! adapter reports failures as [`FetchError`]; the caller turns that into a
//! value with [`with_default`], so a fan-out over N sources always yields N
//! payloads.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

pub mod bitflow;
pub mod bitget;
pub mod coingecko;
pub mod dogswap;
pub mod gateio;
pub mod kraken;
pub mod magiceden;
pub mod mempool;
pub mod pionex;
pub mod unisat;

/// Default per-request timeout for upstream HTTP calls.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// DOG/USD used by every quote source when nothing better is known.
pub const DEFAULT_DOG_PRICE_USD: f64 = 0.00163;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(StatusCode),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        FetchError::Malformed(msg.into())
    }
}

/// Outcome of one upstream call once the default has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResult<T> {
    Ok(T),
    Fallback(T),
}

impl<T> SourceResult<T> {
    pub fn value(&self) -> &T {
        match self {
            SourceResult::Ok(v) | SourceResult::Fallback(v) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            SourceResult::Ok(v) | SourceResult::Fallback(v) => v,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, SourceResult::Fallback(_))
    }
}

/// Collapse a fetch result into a value, logging and substituting the
/// static default on failure.
pub fn with_default<T>(
    source: &str,
    result: Result<T, FetchError>,
    default: impl FnOnce() -> T,
) -> SourceResult<T> {
    match result {
        Ok(value) => SourceResult::Ok(value),
        Err(err) => {
            warn!(source = source, error = %err, "⚠️ Upstream fetch failed, serving default");
            SourceResult::Fallback(default())
        }
    }
}

/// One external data source.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    type Payload: Clone + Send + Sync + 'static;

    /// Key under which the payload appears in merged snapshots.
    fn name(&self) -> &'static str;

    fn timeout(&self) -> Duration {
        DEFAULT_UPSTREAM_TIMEOUT
    }

    async fn fetch(&self, http: &Client) -> Result<Self::Payload, FetchError>;

    /// Static payload served when `fetch` fails.
    fn fallback(&self) -> Self::Payload;
}

/// Run `source.fetch` under its deadline and apply the default on failure.
pub async fn fetch_or_default<U>(source: &U, http: &Client) -> SourceResult<U::Payload>
where
    U: Upstream + ?Sized,
{
    let deadline = source.timeout();
    let result = match tokio::time::timeout(deadline, source.fetch(http)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(deadline)),
    };
    with_default(source.name(), result, || source.fallback())
}

/// Normalized DOG quote shared by every exchange adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    /// USD per DOG.
    pub price: f64,
    /// Percent change over 24h.
    #[serde(rename = "change24h")]
    pub change_24h: f64,
    /// Quote-currency volume over 24h.
    #[serde(rename = "volume24h")]
    pub volume_24h: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_sats: Option<f64>,
}

impl PriceQuote {
    pub fn new(price: f64, change_24h: f64, volume_24h: f64) -> Self {
        Self {
            price,
            change_24h,
            volume_24h,
            price_sats: None,
        }
    }

    pub fn with_sats(mut self, sats: f64) -> Self {
        self.price_sats = Some(sats);
        self
    }

    /// Quote used when a source has never answered.
    pub fn default_dog() -> Self {
        Self::new(DEFAULT_DOG_PRICE_USD, 0.0, 0.0)
    }

    pub(crate) fn ensure_positive(self, source: &str) -> Result<Self, FetchError> {
        if self.price.is_finite() && self.price > 0.0 {
            Ok(self)
        } else {
            Err(FetchError::malformed(format!(
                "{source} returned non-positive price {}",
                self.price
            )))
        }
    }
}

/// GET `url` and decode the JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(http: &Client, url: &str) -> Result<T, FetchError> {
    let response = http.get(url).header(ACCEPT, "application/json").send().await?;
    decode_json(response).await
}

pub(crate) async fn decode_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| FetchError::malformed(e.to_string()))
}

/// Percent change from `open` to `last`, 0 when `open` is not positive.
pub(crate) fn percent_change(open: f64, last: f64) -> f64 {
    if open > 0.0 {
        (last - open) / open * 100.0
    } else {
        0.0
    }
}

/// Exchanges disagree on whether numbers are JSON numbers or strings.
pub(crate) fn de_string_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        _ => Ok(None),
    }
}
