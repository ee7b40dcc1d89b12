//! Magic Eden rune market floor for DOG, priced in sats.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::{coingecko, de_string_f64_opt, get_json, FetchError, PriceQuote, Upstream};

const MAGICEDEN_INFO_URL: &str =
    "https://api-mainnet.magiceden.dev/v2/ord/btc/runes/market/DOGGOTOTHEMOON/info";
const SATS_PER_BTC: f64 = 100_000_000.0;
const DEFAULT_FLOOR_SATS: f64 = 1.81;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuneMarketInfo {
    floor_unit_price: Option<FloorUnitPrice>,
    #[serde(default)]
    delta_floor: HashMap<String, Value>,
    #[serde(default)]
    volume: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FloorUnitPrice {
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    formatted: Option<f64>,
}

fn window_value(map: &HashMap<String, Value>, window: &str) -> Option<f64> {
    match map.get(window)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Floor in sats converted to USD at `btc_usd`. `deltaFloor.1d` is a ratio
/// (0.9726 means -2.74%). Volume is reported in sats.
pub fn parse_market_info(body: &Value, btc_usd: f64) -> Result<PriceQuote, FetchError> {
    let info: RuneMarketInfo =
        serde_json::from_value(body.clone()).map_err(|e| FetchError::malformed(e.to_string()))?;
    let floor_sats = info
        .floor_unit_price
        .and_then(|f| f.formatted)
        .filter(|sats| *sats > 0.0)
        .ok_or_else(|| FetchError::malformed("missing floorUnitPrice"))?;
    let delta = window_value(&info.delta_floor, "1d").unwrap_or(1.0);
    let volume_sats = window_value(&info.volume, "1d").unwrap_or(0.0);

    let sats_to_usd = |sats: f64| sats / SATS_PER_BTC * btc_usd;
    PriceQuote::new(sats_to_usd(floor_sats), (delta - 1.0) * 100.0, sats_to_usd(volume_sats))
        .with_sats(floor_sats)
        .ensure_positive("magiceden")
}

pub struct MagicEdenSource {
    timeout: Duration,
}

impl MagicEdenSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Upstream for MagicEdenSource {
    type Payload = PriceQuote;

    fn name(&self) -> &'static str {
        "magiceden"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<PriceQuote, FetchError> {
        let body: Value = get_json(http, MAGICEDEN_INFO_URL).await?;
        let btc_usd = coingecko::fetch_btc_usd(http).await?;
        parse_market_info(&body, btc_usd)
    }

    fn fallback(&self) -> PriceQuote {
        PriceQuote::default_dog().with_sats(DEFAULT_FLOOR_SATS)
    }
}
