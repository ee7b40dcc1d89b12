//! Pionex ticker list, symbol DOG_USDT.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{de_string_f64_opt, get_json, percent_change, FetchError, PriceQuote, Upstream};

const PIONEX_TICKERS_URL: &str = "https://api.pionex.com/api/v1/market/tickers";
const PIONEX_SYMBOL: &str = "DOG_USDT";

#[derive(Debug, Deserialize)]
struct PionexResponse {
    data: Option<PionexData>,
}

#[derive(Debug, Deserialize)]
struct PionexData {
    #[serde(default)]
    tickers: Vec<PionexTicker>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PionexTicker {
    symbol: String,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    close: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    amount: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    quote_volume: Option<f64>,
}

pub fn parse_tickers(body: &Value) -> Result<PriceQuote, FetchError> {
    let parsed: PionexResponse =
        serde_json::from_value(body.clone()).map_err(|e| FetchError::malformed(e.to_string()))?;
    let ticker = parsed
        .data
        .ok_or_else(|| FetchError::malformed("no data from Pionex"))?
        .tickers
        .into_iter()
        .find(|t| t.symbol == PIONEX_SYMBOL)
        .ok_or_else(|| FetchError::malformed("DOG_USDT not listed on Pionex"))?;

    let close = ticker.close.unwrap_or(0.0);
    let open = ticker.open.unwrap_or(0.0);
    let volume = ticker.amount.or(ticker.quote_volume).unwrap_or(0.0);
    PriceQuote::new(close, percent_change(open, close), volume).ensure_positive("pionex")
}

pub struct PionexSource {
    timeout: Duration,
}

impl PionexSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Upstream for PionexSource {
    type Payload = PriceQuote;

    fn name(&self) -> &'static str {
        "pionex"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<PriceQuote, FetchError> {
        let body: Value = get_json(http, PIONEX_TICKERS_URL).await?;
        parse_tickers(&body)
    }

    fn fallback(&self) -> PriceQuote {
        PriceQuote::default_dog()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tickers_finds_symbol() {
        let body = json!({
            "result": true,
            "data": {
                "tickers": [
                    { "symbol": "BTC_USDT", "open": "100000", "close": "101000", "amount": "1" },
                    { "symbol": "DOG_USDT", "open": "0.00200", "close": "0.00180", "amount": "495000" }
                ]
            }
        });
        let quote = parse_tickers(&body).unwrap();
        assert_eq!(quote.price, 0.0018);
        assert!((quote.change_24h + 10.0).abs() < 1e-9);
        assert_eq!(quote.volume_24h, 495000.0);
    }

    #[test]
    fn test_parse_tickers_missing_symbol() {
        let body = json!({ "data": { "tickers": [{ "symbol": "BTC_USDT", "close": "1" }] } });
        assert!(parse_tickers(&body).is_err());
        assert!(parse_tickers(&json!({ "data": null })).is_err());
    }
}
