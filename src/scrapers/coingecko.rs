//! CoinGecko: BTC spot, DOG tickers across exchanges, DOG market data.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::{get_json, FetchError, PriceQuote, Upstream, DEFAULT_DOG_PRICE_USD};

pub const COINGECKO_API: &str = "https://api.coingecko.com/api/v3";
const DOG_COIN_ID: &str = "dog-go-to-the-moon-rune";

/// Quote currencies we list.
const TICKER_TARGETS: [&str; 4] = ["USDT", "USD", "EUR", "BRL"];
const TICKER_MIN_PRICE: f64 = 0.00001;
const TICKER_MAX_PRICE: f64 = 0.01;
const TICKER_LIMIT: usize = 20;

pub const DEFAULT_BTC_USD: f64 = 108_000.0;
const DEFAULT_BTC_CHANGE_24H: f64 = -2.5;

#[derive(Debug, Deserialize)]
struct SimplePrice {
    bitcoin: Option<SimplePriceEntry>,
}

#[derive(Debug, Deserialize)]
struct SimplePriceEntry {
    usd: Option<f64>,
    #[serde(default)]
    usd_24h_change: Option<f64>,
}

/// Current BTC/USD. Zero or missing prices are treated as malformed.
pub async fn fetch_btc_usd(http: &Client) -> Result<f64, FetchError> {
    let url = format!("{COINGECKO_API}/simple/price?ids=bitcoin&vs_currencies=usd");
    let body: SimplePrice = get_json(http, &url).await?;
    body.bitcoin
        .and_then(|b| b.usd)
        .filter(|usd| *usd > 0.0)
        .ok_or_else(|| FetchError::malformed("BTC price not available"))
}

/// `price` entry of the Bitcoin network snapshot.
pub struct BtcPriceSource {
    timeout: Duration,
}

impl BtcPriceSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Upstream for BtcPriceSource {
    type Payload = Value;

    fn name(&self) -> &'static str {
        "price"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<Value, FetchError> {
        let url = format!(
            "{COINGECKO_API}/simple/price?ids=bitcoin&vs_currencies=usd&include_24hr_change=true"
        );
        let body: SimplePrice = get_json(http, &url).await?;
        let entry = body
            .bitcoin
            .ok_or_else(|| FetchError::malformed("missing bitcoin entry"))?;
        let usd = entry
            .usd
            .filter(|usd| *usd > 0.0)
            .ok_or_else(|| FetchError::malformed("missing bitcoin.usd"))?;
        Ok(json!({
            "bitcoin": {
                "usd": usd,
                "usd_24h_change": entry.usd_24h_change.unwrap_or(0.0),
            }
        }))
    }

    fn fallback(&self) -> Value {
        json!({
            "bitcoin": {
                "usd": DEFAULT_BTC_USD,
                "usd_24h_change": DEFAULT_BTC_CHANGE_24H,
            }
        })
    }
}

// ===== DOG tickers =====

#[derive(Debug, Deserialize)]
struct TickersResponse {
    #[serde(default)]
    tickers: Vec<RawTicker>,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    market: RawMarket,
    #[serde(default)]
    base: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    last: f64,
    #[serde(default)]
    volume: f64,
    #[serde(default)]
    bid_ask_spread_percentage: Option<f64>,
    #[serde(default)]
    trust_score: Option<String>,
    #[serde(default)]
    trade_url: Option<String>,
    #[serde(default)]
    converted_volume: ConvertedVolume,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ConvertedVolume {
    #[serde(default)]
    usd: f64,
}

/// One exchange listing in the markets view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketTicker {
    pub market: String,
    pub pair: String,
    pub price: f64,
    pub volume_usd: f64,
    pub volume: f64,
    pub spread: f64,
    pub trust_score: String,
    pub trade_url: String,
}

impl MarketTicker {
    fn fixed(market: &str, pair: &str, price: f64, volume_usd: f64, volume: f64, spread: f64, trade_url: &str) -> Self {
        Self {
            market: market.to_string(),
            pair: pair.to_string(),
            price,
            volume_usd,
            volume,
            spread,
            trust_score: "green".to_string(),
            trade_url: trade_url.to_string(),
        }
    }
}

fn is_listed(t: &RawTicker) -> bool {
    let valid_pair = TICKER_TARGETS.contains(&t.target.as_str());
    let reasonable = t.last > TICKER_MIN_PRICE && t.last < TICKER_MAX_PRICE;
    let trusted = matches!(t.trust_score.as_deref(), Some("green") | Some("yellow"));
    valid_pair && reasonable && trusted
}

/// Filter, normalize and rank CoinGecko tickers by USD volume.
pub fn parse_tickers(body: &Value) -> Result<Vec<MarketTicker>, FetchError> {
    let parsed: TickersResponse =
        serde_json::from_value(body.clone()).map_err(|e| FetchError::malformed(e.to_string()))?;
    let mut rows: Vec<MarketTicker> = parsed
        .tickers
        .into_iter()
        .filter(is_listed)
        .map(|t| MarketTicker {
            market: t.market.name,
            pair: format!("{}/{}", t.base, t.target),
            price: t.last,
            volume_usd: t.converted_volume.usd,
            volume: t.volume,
            spread: t.bid_ask_spread_percentage.unwrap_or(0.0),
            trust_score: t.trust_score.unwrap_or_default(),
            trade_url: t.trade_url.unwrap_or_default(),
        })
        .collect();
    rows.sort_by(|a, b| b.volume_usd.total_cmp(&a.volume_usd));
    rows.truncate(TICKER_LIMIT);
    Ok(rows)
}

/// Kraken DOG/USD as reported by CoinGecko's ticker list.
pub fn kraken_usd_from_tickers(body: &Value) -> Option<PriceQuote> {
    let parsed: TickersResponse = serde_json::from_value(body.clone()).ok()?;
    parsed
        .tickers
        .into_iter()
        .find(|t| t.market.name.eq_ignore_ascii_case("kraken") && t.target == "USD")
        .filter(|t| t.last > 0.0)
        .map(|t| PriceQuote::new(t.last, 0.0, t.converted_volume.usd))
}

pub async fn fetch_dog_tickers_raw(http: &Client) -> Result<Value, FetchError> {
    get_json(http, &format!("{COINGECKO_API}/coins/{DOG_COIN_ID}/tickers")).await
}

/// Listings shown when CoinGecko has never answered.
pub fn default_tickers() -> Vec<MarketTicker> {
    vec![
        MarketTicker::fixed("Gate", "DOG/USDT", 0.00163, 538_000.0, 329_700_000.0, 0.13, "https://www.gate.com/trade/DOG_USDT"),
        MarketTicker::fixed("Pionex", "DOG/USDT", 0.00162, 495_000.0, 305_000_000.0, 0.25, "https://www.pionex.com/en/trade/DOG_USDT/Bot"),
        MarketTicker::fixed("MEXC", "DOG/USDT", 0.00163, 443_000.0, 271_000_000.0, 0.55, "https://www.mexc.com/exchange/DOG_USDT"),
        MarketTicker::fixed("Bitget", "DOG/USDT", 0.00163, 401_000.0, 245_000_000.0, 0.24, "https://www.bitget.com/spot/DOGUSDT"),
        MarketTicker::fixed("Kraken", "DOG/USD", 0.00164, 214_000.0, 130_000_000.0, 0.61, "https://pro.kraken.com/app/trade/DOG-USD"),
        MarketTicker::fixed("Kraken", "DOG/EUR", 0.00135, 45_000.0, 29_000_000.0, 0.74, "https://pro.kraken.com/app/trade/DOG-EUR"),
    ]
}

/// `tickers` entry of the markets snapshot.
pub struct DogTickersSource {
    timeout: Duration,
}

impl DogTickersSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Upstream for DogTickersSource {
    type Payload = Value;

    fn name(&self) -> &'static str {
        "tickers"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<Value, FetchError> {
        let raw = fetch_dog_tickers_raw(http).await?;
        let rows = parse_tickers(&raw)?;
        serde_json::to_value(rows).map_err(|e| FetchError::malformed(e.to_string()))
    }

    fn fallback(&self) -> Value {
        serde_json::to_value(default_tickers()).unwrap_or(Value::Array(Vec::new()))
    }
}

// ===== DOG market data =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub price: f64,
    pub total_volume: f64,
    pub market_cap: f64,
    pub price_change_24h: f64,
}

impl Default for MarketData {
    fn default() -> Self {
        Self {
            price: DEFAULT_DOG_PRICE_USD,
            total_volume: 3_890_000.0,
            market_cap: 162_360_000.0,
            price_change_24h: 0.0,
        }
    }
}

pub fn parse_market_data(body: &Value) -> Result<MarketData, FetchError> {
    let md = body
        .get("market_data")
        .ok_or_else(|| FetchError::malformed("missing market_data"))?;
    let usd = |field: &str| md.get(field).and_then(|v| v.get("usd")).and_then(Value::as_f64);
    let price = usd("current_price").ok_or_else(|| FetchError::malformed("missing current_price.usd"))?;
    Ok(MarketData {
        price,
        total_volume: usd("total_volume").unwrap_or(0.0),
        market_cap: usd("market_cap").unwrap_or(0.0),
        price_change_24h: md
            .get("price_change_percentage_24h")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
    })
}

/// `marketData` entry of the markets snapshot.
pub struct DogMarketDataSource {
    timeout: Duration,
}

impl DogMarketDataSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Upstream for DogMarketDataSource {
    type Payload = Value;

    fn name(&self) -> &'static str {
        "marketData"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<Value, FetchError> {
        let raw: Value = get_json(http, &format!("{COINGECKO_API}/coins/{DOG_COIN_ID}")).await?;
        let data = parse_market_data(&raw)?;
        serde_json::to_value(data).map_err(|e| FetchError::malformed(e.to_string()))
    }

    fn fallback(&self) -> Value {
        serde_json::to_value(MarketData::default()).unwrap_or(Value::Null)
    }
}
