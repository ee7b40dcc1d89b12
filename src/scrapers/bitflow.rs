//! Bitflow DEX pBTC/DOG pool.
//!
//! The pool quotes DOG per BTC, so USD prices need a BTC spot price.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::coingecko::{self, MarketTicker};
use super::{de_string_f64_opt, get_json, FetchError, PriceQuote, Upstream};

const BITFLOW_TICKER_URL: &str = "https://bitflow-sdk-api-gateway-7owjsmt8.uc.gateway.dev/ticker";
const BITFLOW_TRADE_URL: &str = "https://btflw.link/brl";
const BITFLOW_SPREAD: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct BitflowTicker {
    #[serde(default)]
    ticker_id: String,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    last_price: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    target_volume: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    low: Option<f64>,
}

/// Bitflow pool reduced to USD terms.
#[derive(Debug, Clone, PartialEq)]
pub struct BitflowQuote {
    pub quote: PriceQuote,
    pub volume_dog: f64,
}

pub fn parse_tickers(body: &Value, btc_usd: f64) -> Result<BitflowQuote, FetchError> {
    let tickers: Vec<BitflowTicker> =
        serde_json::from_value(body.clone()).map_err(|e| FetchError::malformed(e.to_string()))?;
    let ticker = tickers
        .into_iter()
        .find(|t| {
            let id = t.ticker_id.to_uppercase();
            id.contains("PBTC") && id.contains("DOG")
        })
        .ok_or_else(|| FetchError::malformed("DOG/pBTC ticker not found on Bitflow"))?;

    let rate = ticker
        .last_price
        .filter(|r| *r > 0.0)
        .ok_or_else(|| FetchError::malformed("invalid BTC/DOG rate"))?;
    let price = btc_usd / rate;

    // Rates are DOG per BTC: the high rate is the low USD price.
    let change = match (ticker.high, ticker.low) {
        (Some(high), Some(low)) if high > 0.0 && low > 0.0 => {
            let mid = (btc_usd / high + btc_usd / low) / 2.0;
            (price - mid) / mid * 100.0
        }
        _ => 0.0,
    };
    let volume_dog = ticker.target_volume.unwrap_or(0.0);

    let quote = PriceQuote::new(price, change, volume_dog * price).ensure_positive("bitflow")?;
    Ok(BitflowQuote { quote, volume_dog })
}

async fn fetch_bitflow(http: &Client) -> Result<BitflowQuote, FetchError> {
    let btc_usd = coingecko::fetch_btc_usd(http).await?;
    let body: Value = get_json(http, BITFLOW_TICKER_URL).await?;
    parse_tickers(&body, btc_usd)
}

fn ticker_row(quote: &BitflowQuote) -> MarketTicker {
    MarketTicker {
        market: "Bitflow".to_string(),
        pair: "DOG/pBTC".to_string(),
        price: quote.quote.price,
        volume_usd: quote.quote.volume_24h,
        volume: quote.volume_dog,
        spread: BITFLOW_SPREAD,
        trust_score: "green".to_string(),
        trade_url: BITFLOW_TRADE_URL.to_string(),
    }
}

fn default_quote() -> BitflowQuote {
    BitflowQuote {
        quote: PriceQuote::new(0.00176, 0.0, 50.0),
        volume_dog: 28_000.0,
    }
}

/// Bitflow as a DOG price source.
pub struct BitflowSource {
    timeout: Duration,
}

impl BitflowSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Upstream for BitflowSource {
    type Payload = PriceQuote;

    fn name(&self) -> &'static str {
        "bitflow"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<PriceQuote, FetchError> {
        Ok(fetch_bitflow(http).await?.quote)
    }

    fn fallback(&self) -> PriceQuote {
        PriceQuote::default_dog()
    }
}

/// Bitflow as a row of the markets listing.
pub struct BitflowTickerSource {
    timeout: Duration,
}

impl BitflowTickerSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Upstream for BitflowTickerSource {
    type Payload = Value;

    fn name(&self) -> &'static str {
        "bitflow"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<Value, FetchError> {
        let quote = fetch_bitflow(http).await?;
        serde_json::to_value(ticker_row(&quote)).map_err(|e| FetchError::malformed(e.to_string()))
    }

    fn fallback(&self) -> Value {
        serde_json::to_value(ticker_row(&default_quote())).unwrap_or(Value::Null)
    }
}
