//! Gate.io spot ticker for DOG_USDT.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{de_string_f64_opt, get_json, FetchError, PriceQuote, Upstream};

const GATE_TICKER_URL: &str = "https://api.gateio.ws/api/v4/spot/tickers?currency_pair=DOG_USDT";

#[derive(Debug, Deserialize)]
struct GateTicker {
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    last: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    change_percentage: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    quote_volume: Option<f64>,
}

pub fn parse_ticker(body: &Value) -> Result<PriceQuote, FetchError> {
    let tickers: Vec<GateTicker> =
        serde_json::from_value(body.clone()).map_err(|e| FetchError::malformed(e.to_string()))?;
    let ticker = tickers
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::malformed("no data from Gate.io"))?;
    PriceQuote::new(
        ticker.last.unwrap_or(0.0),
        ticker.change_percentage.unwrap_or(0.0),
        ticker.quote_volume.unwrap_or(0.0),
    )
    .ensure_positive("gateio")
}

pub struct GateIoSource {
    timeout: Duration,
}

impl GateIoSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Upstream for GateIoSource {
    type Payload = PriceQuote;

    fn name(&self) -> &'static str {
        "gateio"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<PriceQuote, FetchError> {
        let body: Value = get_json(http, GATE_TICKER_URL).await?;
        parse_ticker(&body)
    }

    fn fallback(&self) -> PriceQuote {
        PriceQuote::default_dog()
    }
}
