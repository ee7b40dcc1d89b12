//! Kraken public ticker for DOG/USD.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{coingecko, get_json, percent_change, FetchError, PriceQuote, Upstream};

const KRAKEN_TICKER_URL: &str = "https://api.kraken.com/0/public/Ticker?pair=DOGUSD";

#[derive(Debug, Deserialize)]
struct KrakenResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, KrakenTicker>,
}

#[derive(Debug, Deserialize)]
struct KrakenTicker {
    /// Last trade `[price, lot volume]`.
    c: Vec<String>,
    /// Today's opening price.
    o: String,
    /// Volume `[today, last 24h]`.
    #[serde(default)]
    v: Vec<String>,
}

pub fn parse_ticker(body: &Value) -> Result<PriceQuote, FetchError> {
    let parsed: KrakenResponse =
        serde_json::from_value(body.clone()).map_err(|e| FetchError::malformed(e.to_string()))?;
    if !parsed.error.is_empty() {
        return Err(FetchError::malformed(format!("kraken error: {}", parsed.error.join(", "))));
    }
    let ticker = parsed
        .result
        .get("DOGUSD")
        .ok_or_else(|| FetchError::malformed("no DOGUSD data from Kraken"))?;

    let last = ticker
        .c
        .first()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| FetchError::malformed("unparsable last price"))?;
    let open = ticker.o.parse::<f64>().unwrap_or(0.0);
    let base_volume = ticker
        .v
        .get(1)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    PriceQuote::new(last, percent_change(open, last), base_volume * last).ensure_positive("kraken")
}

pub struct KrakenSource {
    timeout: Duration,
}

impl KrakenSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn fetch_direct(&self, http: &Client) -> Result<PriceQuote, FetchError> {
        let body: Value = get_json(http, KRAKEN_TICKER_URL).await?;
        parse_ticker(&body)
    }
}

#[async_trait]
impl Upstream for KrakenSource {
    type Payload = PriceQuote;

    fn name(&self) -> &'static str {
        "kraken"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Falls back to CoinGecko's Kraken/USD listing before giving up.
    async fn fetch(&self, http: &Client) -> Result<PriceQuote, FetchError> {
        match self.fetch_direct(http).await {
            Ok(quote) => Ok(quote),
            Err(err) => {
                warn!(source = "kraken", error = %err, "Kraken ticker failed, trying CoinGecko listing");
                let tickers = coingecko::fetch_dog_tickers_raw(http).await?;
                let quote = coingecko::kraken_usd_from_tickers(&tickers)
                    .ok_or_else(|| FetchError::malformed("no Kraken USD listing on CoinGecko"))?;
                debug!(price = quote.price, "Kraken price recovered from CoinGecko");
                Ok(quote)
            }
        }
    }

    fn fallback(&self) -> PriceQuote {
        PriceQuote::default_dog()
    }
}
