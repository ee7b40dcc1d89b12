//! Bitget spot ticker for DOGUSDT.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{de_string_f64_opt, get_json, FetchError, PriceQuote, Upstream};

const BITGET_TICKER_URL: &str = "https://api.bitget.com/api/v2/spot/market/tickers?symbol=DOGUSDT";

#[derive(Debug, Deserialize)]
struct BitgetResponse {
    #[serde(default)]
    data: Vec<BitgetTicker>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BitgetTicker {
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    last_pr: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    change_utc24h: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    change24h: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    quote_volume: Option<f64>,
}

/// Bitget reports changes as ratios (`0.0123` is 1.23%).
pub fn parse_ticker(body: &Value) -> Result<PriceQuote, FetchError> {
    let parsed: BitgetResponse =
        serde_json::from_value(body.clone()).map_err(|e| FetchError::malformed(e.to_string()))?;
    let ticker = parsed
        .data
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::malformed("no data from Bitget"))?;
    let change_ratio = ticker.change_utc24h.or(ticker.change24h).unwrap_or(0.0);
    PriceQuote::new(
        ticker.last_pr.unwrap_or(0.0),
        change_ratio * 100.0,
        ticker.quote_volume.unwrap_or(0.0),
    )
    .ensure_positive("bitget")
}

pub struct BitgetSource {
    timeout: Duration,
}

impl BitgetSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Upstream for BitgetSource {
    type Payload = PriceQuote;

    fn name(&self) -> &'static str {
        "bitget"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<PriceQuote, FetchError> {
        let body: Value = get_json(http, BITGET_TICKER_URL).await?;
        parse_ticker(&body)
    }

    fn fallback(&self) -> PriceQuote {
        PriceQuote::default_dog()
    }
}
