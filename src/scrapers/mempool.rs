//! mempool.space network statistics.
//!
//! Six endpoints share one adapter; each has its own path, shape check and
//! static default.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{get_json, FetchError, Upstream};

pub const MEMPOOL_API: &str = "https://mempool.space/api";

/// Reference height for synthetic block listings.
const DEFAULT_TIP_HEIGHT: u64 = 920_000;
/// Reference unix time for synthetic timestamps.
const DEFAULT_EPOCH: u64 = 1_760_000_000;
const DAY_SECS: u64 = 24 * 60 * 60;
const BLOCK_SUBSIDY_SATS: u64 = 312_500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MempoolEndpoint {
    DifficultyAdjustment,
    Hashrate,
    Mempool,
    Fees,
    Blocks,
    Pools,
}

impl MempoolEndpoint {
    pub const ALL: [MempoolEndpoint; 6] = [
        MempoolEndpoint::DifficultyAdjustment,
        MempoolEndpoint::Hashrate,
        MempoolEndpoint::Mempool,
        MempoolEndpoint::Fees,
        MempoolEndpoint::Blocks,
        MempoolEndpoint::Pools,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MempoolEndpoint::DifficultyAdjustment => "difficultyAdjustment",
            MempoolEndpoint::Hashrate => "hashrate",
            MempoolEndpoint::Mempool => "mempool",
            MempoolEndpoint::Fees => "fees",
            MempoolEndpoint::Blocks => "blocks",
            MempoolEndpoint::Pools => "pools",
        }
    }

    fn path(self) -> &'static str {
        match self {
            MempoolEndpoint::DifficultyAdjustment => "/v1/difficulty-adjustment",
            MempoolEndpoint::Hashrate => "/v1/mining/hashrate/1w",
            MempoolEndpoint::Mempool => "/mempool",
            MempoolEndpoint::Fees => "/v1/fees/recommended",
            MempoolEndpoint::Blocks => "/v1/blocks",
            MempoolEndpoint::Pools => "/v1/mining/pools/1w",
        }
    }

    /// Minimal shape check so an HTML error page or `{}` is not cached as data.
    pub fn validate(self, body: &Value) -> Result<(), FetchError> {
        let ok = match self {
            MempoolEndpoint::DifficultyAdjustment => body.get("progressPercent").is_some_and(Value::is_number),
            MempoolEndpoint::Hashrate => body.get("hashrates").is_some_and(Value::is_array),
            MempoolEndpoint::Mempool => body.get("count").is_some_and(Value::is_number),
            MempoolEndpoint::Fees => body.get("fastestFee").is_some_and(Value::is_number),
            MempoolEndpoint::Blocks => body.as_array().is_some_and(|blocks| !blocks.is_empty()),
            MempoolEndpoint::Pools => body.get("pools").is_some_and(Value::is_array),
        };
        if ok {
            Ok(())
        } else {
            Err(FetchError::malformed(format!("unexpected {} payload", self.name())))
        }
    }

    pub fn default_payload(self) -> Value {
        match self {
            MempoolEndpoint::DifficultyAdjustment => json!({
                "progressPercent": 50,
                "difficultyChange": 2.5,
                "estimatedRetargetDate": (DEFAULT_EPOCH + 7 * DAY_SECS) * 1000,
                "remainingBlocks": 1000,
                "remainingTime": 7 * DAY_SECS * 1000,
                "nextRetargetHeight": 921_000
            }),
            MempoolEndpoint::Hashrate => {
                let hashrates: Vec<Value> = (0..7u64)
                    .map(|i| {
                        json!({
                            "timestamp": DEFAULT_EPOCH - (6 - i) * DAY_SECS,
                            "avgHashrate": 1.1e21
                        })
                    })
                    .collect();
                json!({ "hashrates": hashrates })
            }
            MempoolEndpoint::Mempool => json!({
                "count": 50_000,
                "vsize": 20_000_000,
                "total_fee": 5_000_000,
                "fee_histogram": [
                    [5.0, 500], [4.0, 800], [3.0, 1200], [2.5, 2000], [2.0, 3500], [1.5, 5000],
                    [1.0, 8000], [0.8, 12000], [0.5, 15000], [0.3, 20000], [0.1, 25000]
                ]
            }),
            MempoolEndpoint::Fees => json!({
                "fastestFee": 3,
                "halfHourFee": 2,
                "hourFee": 1,
                "economyFee": 1,
                "minimumFee": 1
            }),
            MempoolEndpoint::Blocks => {
                let blocks: Vec<Value> = (0..10u64)
                    .map(|i| {
                        json!({
                            "id": format!("block_{i}"),
                            "height": DEFAULT_TIP_HEIGHT - i,
                            "timestamp": DEFAULT_EPOCH - i * 600,
                            "tx_count": 2000,
                            "size": 1_400_000,
                            "weight": 4_000_000,
                            "difficulty": 146_716_052_770_107.5,
                            "extras": { "reward": BLOCK_SUBSIDY_SATS }
                        })
                    })
                    .collect();
                Value::Array(blocks)
            }
            MempoolEndpoint::Pools => json!({
                "pools": [
                    { "poolId": 1, "name": "Foundry USA", "blockCount": 300, "rank": 1, "emptyBlocks": 0, "avgMatchRate": 100, "avgFeeDelta": "-0.02", "link": "https://foundrydigital.com" },
                    { "poolId": 2, "name": "AntPool", "blockCount": 200, "rank": 2, "emptyBlocks": 0, "avgMatchRate": 100, "avgFeeDelta": "-0.03", "link": "https://www.antpool.com" },
                    { "poolId": 3, "name": "ViaBTC", "blockCount": 150, "rank": 3, "emptyBlocks": 0, "avgMatchRate": 100, "avgFeeDelta": "-0.04", "link": "https://viabtc.com" }
                ]
            }),
        }
    }
}

pub struct MempoolSource {
    endpoint: MempoolEndpoint,
    base_url: String,
    timeout: Duration,
}

impl MempoolSource {
    pub fn new(endpoint: MempoolEndpoint, timeout: Duration) -> Self {
        Self {
            endpoint,
            base_url: MEMPOOL_API.to_string(),
            timeout,
        }
    }

    /// One source per endpoint, in snapshot order.
    pub fn all(timeout: Duration) -> Vec<MempoolSource> {
        MempoolEndpoint::ALL
            .into_iter()
            .map(|endpoint| MempoolSource::new(endpoint, timeout))
            .collect()
    }
}

#[async_trait]
impl Upstream for MempoolSource {
    type Payload = Value;

    fn name(&self) -> &'static str {
        self.endpoint.name()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, http: &Client) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, self.endpoint.path());
        let body: Value = get_json(http, &url).await?;
        self.endpoint.validate(&body)?;
        Ok(body)
    }

    fn fallback(&self) -> Value {
        self.endpoint.default_payload()
    }
}
