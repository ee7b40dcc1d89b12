//! The concrete aggregators served over HTTP and their derived views.

use reqwest::Client;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::aggregator::{Aggregator, SharedUpstream, SourceMap};
use crate::config::Config;
use crate::scrapers::{
    bitflow::{BitflowSource, BitflowTickerSource},
    bitget::BitgetSource,
    coingecko::{BtcPriceSource, DogMarketDataSource, DogTickersSource},
    dogswap::DogswapSource,
    gateio::GateIoSource,
    kraken::KrakenSource,
    magiceden::MagicEdenSource,
    mempool::MempoolSource,
    pionex::PionexSource,
    unisat::RuneEventCountSource,
    PriceQuote, SourceResult,
};

pub struct Feeds {
    pub bitcoin: Aggregator<Value>,
    pub markets: Aggregator<Value>,
    /// Total DOG rune event count, published under `total`.
    pub events_count: Aggregator<Value>,
    pub price: Aggregator<PriceQuote>,
    /// One single-source aggregator (and cache cell) per quote source.
    pub price_sources: BTreeMap<&'static str, Aggregator<PriceQuote>>,
}

impl Feeds {
    pub fn from_config(http: Client, config: &Config) -> Self {
        let timeout = config.upstream_timeout;

        let mut bitcoin_sources: Vec<SharedUpstream<Value>> = MempoolSource::all(timeout)
            .into_iter()
            .map(|s| Arc::new(s) as SharedUpstream<Value>)
            .collect();
        bitcoin_sources.push(Arc::new(BtcPriceSource::new(timeout)));

        let market_sources: Vec<SharedUpstream<Value>> = vec![
            Arc::new(DogTickersSource::new(timeout)),
            Arc::new(DogMarketDataSource::new(timeout)),
            Arc::new(BitflowTickerSource::new(timeout)),
        ];

        let quote_sources: Vec<SharedUpstream<PriceQuote>> = vec![
            Arc::new(KrakenSource::new(timeout)),
            Arc::new(GateIoSource::new(timeout)),
            Arc::new(BitgetSource::new(timeout)),
            Arc::new(PionexSource::new(timeout)),
            Arc::new(MagicEdenSource::new(timeout)),
            Arc::new(BitflowSource::new(timeout)),
            Arc::new(DogswapSource::new(
                config.dogswap_api_url.clone(),
                config.dogswap_tick.clone(),
                config.dogswap_coin_type.clone(),
                timeout,
            )),
        ];

        let events_count: SharedUpstream<Value> = Arc::new(RuneEventCountSource::new(
            config.unisat_api_url.clone(),
            config.unisat_api_token.clone(),
            timeout,
        ));

        Self::new(
            Aggregator::new("bitcoin", http.clone(), config.bitcoin_cache_ttl, bitcoin_sources)
                .with_derived("summary", bitcoin_summary),
            Aggregator::new("markets", http.clone(), config.markets_cache_ttl, market_sources)
                .with_derived("summary", markets_summary),
            Aggregator::new("events-count", http.clone(), config.events_count_cache_ttl, vec![events_count]),
            http,
            config.price_cache_ttl,
            quote_sources,
        )
    }

    /// Builds the combined price aggregator and the per-source ones from the
    /// same upstream list.
    pub fn new(
        bitcoin: Aggregator<Value>,
        markets: Aggregator<Value>,
        events_count: Aggregator<Value>,
        http: Client,
        price_ttl: std::time::Duration,
        quote_sources: Vec<SharedUpstream<PriceQuote>>,
    ) -> Self {
        let price_sources = quote_sources
            .iter()
            .map(|source| {
                let name = source.name();
                let single = Aggregator::new(name, http.clone(), price_ttl, vec![Arc::clone(source)]);
                (name, single)
            })
            .collect();
        let price = Aggregator::new("price", http, price_ttl, quote_sources).with_derived("unified", unified_price);
        Self {
            bitcoin,
            markets,
            events_count,
            price,
            price_sources,
        }
    }

    pub fn price_source(&self, name: &str) -> Option<&Aggregator<PriceQuote>> {
        self.price_sources.get(name)
    }
}

fn value_of<'a>(sources: &'a SourceMap<Value>, name: &str) -> Option<&'a Value> {
    sources.get(name).map(SourceResult::value)
}

/// BTC price, fee schedule, mempool size and tip height in one object.
pub fn bitcoin_summary(sources: &SourceMap<Value>) -> Value {
    let btc = value_of(sources, "price").and_then(|v| v.get("bitcoin"));
    let fees = value_of(sources, "fees");
    let fee = |field: &str| fees.and_then(|f| f.get(field)).cloned().unwrap_or(Value::Null);
    let tip_height = value_of(sources, "blocks")
        .and_then(Value::as_array)
        .and_then(|blocks| blocks.first())
        .and_then(|block| block.get("height"))
        .cloned()
        .unwrap_or(Value::Null);
    let defaulted: Vec<&str> = sources
        .iter()
        .filter(|(_, r)| r.is_fallback())
        .map(|(name, _)| *name)
        .collect();

    json!({
        "btcPrice": btc.and_then(|b| b.get("usd")).cloned().unwrap_or(Value::Null),
        "btcChange24h": btc.and_then(|b| b.get("usd_24h_change")).cloned().unwrap_or(Value::Null),
        "fees": {
            "fastest": fee("fastestFee"),
            "halfHour": fee("halfHourFee"),
            "hour": fee("hourFee"),
            "economy": fee("economyFee"),
            "minimum": fee("minimumFee"),
        },
        "mempoolCount": value_of(sources, "mempool").and_then(|m| m.get("count")).cloned().unwrap_or(Value::Null),
        "tipHeight": tip_height,
        "defaultedSources": defaulted,
    })
}

/// Merged exchange listing with live Bitflow on top, plus headline numbers.
pub fn markets_summary(sources: &SourceMap<Value>) -> Value {
    let mut tickers: Vec<Value> = value_of(sources, "tickers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if let Some(SourceResult::Ok(row)) = sources.get("bitflow") {
        tickers.insert(0, row.clone());
    }
    let exchanges: BTreeSet<&str> = tickers
        .iter()
        .filter_map(|t| t.get("market").and_then(Value::as_str))
        .collect();
    let data = value_of(sources, "marketData");
    let field = |name: &str| data.and_then(|d| d.get(name)).cloned().unwrap_or(Value::Null);

    json!({
        "exchangeCount": exchanges.len(),
        "tickers": tickers,
        "price": field("price"),
        "volume24h": field("totalVolume"),
        "marketCap": field("marketCap"),
        "change24h": field("priceChange24h"),
    })
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Median price and mean change over live quotes; over all quotes when none
/// are live.
pub fn unified_price(sources: &SourceMap<PriceQuote>) -> Value {
    let live: Vec<(&str, &PriceQuote)> = sources
        .iter()
        .filter(|(_, r)| !r.is_fallback())
        .map(|(name, r)| (*name, r.value()))
        .collect();
    let pool: Vec<(&str, &PriceQuote)> = if live.is_empty() {
        sources.iter().map(|(name, r)| (*name, r.value())).collect()
    } else {
        live.clone()
    };

    let mut prices: Vec<f64> = pool.iter().map(|(_, q)| q.price).collect();
    let change = if pool.is_empty() {
        0.0
    } else {
        pool.iter().map(|(_, q)| q.change_24h).sum::<f64>() / pool.len() as f64
    };
    let volume: f64 = pool.iter().map(|(_, q)| q.volume_24h).sum();

    json!({
        "price": median(&mut prices),
        "change24h": change,
        "volume24h": volume,
        "sources": pool.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
        "liveSources": live.len(),
    })
}
