use std::path::Path;
use std::time::Duration;

use crate::fees::BackfillConfig;
use crate::models::TRANSACTIONS_CACHE_KEY;
use crate::rpc::RpcConfig;
use crate::scrapers::dogswap::{DEFAULT_DOGSWAP_COIN_TYPE, DEFAULT_DOGSWAP_TICK, DEFAULT_DOGSWAP_URL};
use crate::scrapers::unisat::DEFAULT_UNISAT_API;

/// Load `.env` from the working directory and from next to the manifest.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];
    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// A whole number of hours; absurdly large values saturate.
fn env_hours(key: &str, default_hours: u64) -> Duration {
    Duration::from_secs(env_or(key, default_hours).saturating_mul(3600))
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_addr: String,
    /// SQLite file for the key-value store; `None` keeps everything in memory.
    pub store_path: Option<String>,
    pub transactions_cache_key: String,
    pub rpc: RpcConfig,
    pub update_secret: Option<String>,
    pub unisat_api_token: Option<String>,
    pub unisat_api_url: String,
    pub dogswap_api_url: String,
    pub dogswap_tick: String,
    pub dogswap_coin_type: String,
    pub upstream_timeout: Duration,
    pub bitcoin_cache_ttl: Duration,
    pub markets_cache_ttl: Duration,
    pub price_cache_ttl: Duration,
    pub events_count_cache_ttl: Duration,
    pub fee_backfill_max: usize,
    pub fee_backfill_window: Duration,
    pub fee_backfill_pacing: Duration,
    pub fee_backfill_interval: Option<Duration>,
    pub events_heartbeat: Duration,
    pub search_rate_limit_per_min: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let rpc = RpcConfig {
            url: env_string("BITCOIN_RPC_URL", "http://127.0.0.1:8332"),
            user: std::env::var("BITCOIN_RPC_USER").unwrap_or_default(),
            password: std::env::var("BITCOIN_RPC_PASSWORD").unwrap_or_default(),
            timeout: Duration::from_secs(env_or("BITCOIN_RPC_TIMEOUT_SECS", 30)),
        };

        let fee_backfill_interval = env_opt("FEE_BACKFILL_INTERVAL_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);

        Self {
            port: env_or("PORT", 3000),
            bind_addr: env_string("BIND_ADDR", "0.0.0.0"),
            store_path: env_opt("STORE_PATH"),
            transactions_cache_key: env_string("TRANSACTIONS_CACHE_KEY", TRANSACTIONS_CACHE_KEY),
            rpc,
            update_secret: env_opt("UPDATE_SECRET"),
            unisat_api_token: env_opt("UNISAT_API_TOKEN"),
            unisat_api_url: env_string("UNISAT_API_URL", DEFAULT_UNISAT_API),
            dogswap_api_url: env_string("DOGSWAP_API_URL", DEFAULT_DOGSWAP_URL),
            dogswap_tick: env_string("DOGSWAP_TICK", DEFAULT_DOGSWAP_TICK),
            dogswap_coin_type: env_string("DOGSWAP_COIN_TYPE", DEFAULT_DOGSWAP_COIN_TYPE),
            upstream_timeout: Duration::from_secs(env_or("UPSTREAM_TIMEOUT_SECS", 10)),
            bitcoin_cache_ttl: Duration::from_secs(env_or("BITCOIN_CACHE_TTL_SECS", 30)),
            markets_cache_ttl: Duration::from_secs(env_or("MARKETS_CACHE_TTL_SECS", 60)),
            price_cache_ttl: Duration::from_secs(env_or("PRICE_CACHE_TTL_SECS", 30)),
            events_count_cache_ttl: Duration::from_secs(env_or("EVENTS_COUNT_CACHE_TTL_SECS", 300)),
            fee_backfill_max: env_or("FEE_BACKFILL_MAX", 50),
            fee_backfill_window: env_hours("FEE_BACKFILL_WINDOW_HOURS", 24),
            fee_backfill_pacing: Duration::from_millis(env_or("FEE_BACKFILL_PACING_MS", 100)),
            fee_backfill_interval,
            events_heartbeat: Duration::from_secs(env_or::<u64>("EVENTS_HEARTBEAT_SECS", 30).max(1)),
            search_rate_limit_per_min: env_or("SEARCH_RATE_LIMIT_PER_MIN", 30),
        }
    }

    pub fn backfill(&self) -> BackfillConfig {
        BackfillConfig {
            max_count: self.fee_backfill_max,
            recency_window: self.fee_backfill_window,
            pacing: self.fee_backfill_pacing,
            cache_key: self.transactions_cache_key.clone(),
        }
    }
}

impl Default for Config {
    /// Same values `from_env` yields with an empty environment.
    fn default() -> Self {
        Self {
            port: 3000,
            bind_addr: "0.0.0.0".to_string(),
            store_path: None,
            transactions_cache_key: TRANSACTIONS_CACHE_KEY.to_string(),
            rpc: RpcConfig {
                url: "http://127.0.0.1:8332".to_string(),
                user: String::new(),
                password: String::new(),
                timeout: Duration::from_secs(30),
            },
            update_secret: None,
            unisat_api_token: None,
            unisat_api_url: DEFAULT_UNISAT_API.to_string(),
            dogswap_api_url: DEFAULT_DOGSWAP_URL.to_string(),
            dogswap_tick: DEFAULT_DOGSWAP_TICK.to_string(),
            dogswap_coin_type: DEFAULT_DOGSWAP_COIN_TYPE.to_string(),
            upstream_timeout: Duration::from_secs(10),
            bitcoin_cache_ttl: Duration::from_secs(30),
            markets_cache_ttl: Duration::from_secs(60),
            price_cache_ttl: Duration::from_secs(30),
            events_count_cache_ttl: Duration::from_secs(300),
            fee_backfill_max: 50,
            fee_backfill_window: Duration::from_secs(24 * 3600),
            fee_backfill_pacing: Duration::from_millis(100),
            fee_backfill_interval: None,
            events_heartbeat: Duration::from_secs(30),
            search_rate_limit_per_min: 30,
        }
    }
}
