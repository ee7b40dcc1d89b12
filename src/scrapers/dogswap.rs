//! Dogswap tick price (POST endpoint).

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{decode_json, FetchError, PriceQuote, Upstream};

pub const DEFAULT_DOGSWAP_URL: &str = "https://api.dotswap.app/brc20swap/stat/tick_price";
pub const DEFAULT_DOGSWAP_TICK: &str = "DOG•GO•TO•THE•MOON";
pub const DEFAULT_DOGSWAP_COIN_TYPE: &str = "runes";

const SATS_PER_BTC: f64 = 100_000_000.0;

fn number(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts the payload either wrapped in `data` or bare.
pub fn parse_tick_price(body: &Value) -> Result<PriceQuote, FetchError> {
    let data = body.get("data").filter(|d| d.is_object()).unwrap_or(body);
    let usd = number(data.get("usd_price"))
        .or_else(|| number(data.get("price")))
        .unwrap_or(0.0);
    let btc = number(data.get("btc_price"))
        .or_else(|| number(data.get("btcPrice")))
        .unwrap_or(0.0);
    let change = number(data.get("change24h")).unwrap_or(0.0);

    let mut quote = PriceQuote::new(usd, change, 0.0);
    if btc > 0.0 {
        quote = quote.with_sats(btc * SATS_PER_BTC);
    }
    quote.ensure_positive("dogswap")
}

pub struct DogswapSource {
    url: String,
    tick: String,
    coin_type: String,
    timeout: Duration,
}

impl DogswapSource {
    pub fn new(url: String, tick: String, coin_type: String, timeout: Duration) -> Self {
        Self { url, tick, coin_type, timeout }
    }
}

#[async_trait]
impl Upstream for DogswapSource {
    type Payload = PriceQuote;

    fn name(&self) -> &'static str {
        "dogswap"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<PriceQuote, FetchError> {
        let response = http
            .post(&self.url)
            .header(ACCEPT, "application/json")
            .json(&json!({ "tick": self.tick, "coin_type": self.coin_type }))
            .send()
            .await?;
        let body: Value = decode_json(response).await?;
        parse_tick_price(&body)
    }

    fn fallback(&self) -> PriceQuote {
        PriceQuote::default_dog()
    }
}
