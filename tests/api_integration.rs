//! Router-level tests with fake upstreams, event source and node.

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use dogdata_backend::{
    aggregator::{Aggregator, SharedUpstream},
    api::{create_router, AppState},
    feeds::{bitcoin_summary, Feeds},
    fees::{BackfillConfig, BackfillJob, FeeResolver, TransactionSource},
    middleware::RateLimitConfig,
    models::{RawTransferEvent, TransactionCache, TransactionRecord, TRANSACTIONS_CACHE_KEY},
    rpc::{RawTransaction, RpcError, TxInput, TxOutput},
    scrapers::{
        unisat::{RuneEventSource, DEFAULT_DOG_EVENT_COUNT},
        FetchError, PriceQuote, Upstream,
    },
    store::{KvStore, MemoryStore},
    stream::Notifier,
};

const SECRET: &str = "let-me-in";

// ===== Fakes =====

struct FakeQuote {
    name: &'static str,
    price: f64,
    up: AtomicBool,
    calls: AtomicUsize,
}

impl FakeQuote {
    fn new(name: &'static str, price: f64, up: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            price,
            up: AtomicBool::new(up),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Upstream for FakeQuote {
    type Payload = PriceQuote;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, _http: &Client) -> Result<PriceQuote, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            Ok(PriceQuote::new(self.price, 1.0, 100.0))
        } else {
            Err(FetchError::malformed("down"))
        }
    }

    fn fallback(&self) -> PriceQuote {
        PriceQuote::default_dog()
    }
}

struct FakeJson {
    name: &'static str,
    value: Option<Value>,
    fallback: Value,
}

#[async_trait]
impl Upstream for FakeJson {
    type Payload = Value;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, _http: &Client) -> Result<Value, FetchError> {
        self.value.clone().ok_or_else(|| FetchError::malformed("down"))
    }

    fn fallback(&self) -> Value {
        self.fallback.clone()
    }
}

/// Rune event counter that can be switched off mid-test.
struct FakeCount {
    total: u64,
    up: AtomicBool,
}

#[async_trait]
impl Upstream for FakeCount {
    type Payload = Value;

    fn name(&self) -> &'static str {
        "total"
    }

    async fn fetch(&self, _http: &Client) -> Result<Value, FetchError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(json!(self.total))
        } else {
            Err(FetchError::malformed("unisat code -2003"))
        }
    }

    fn fallback(&self) -> Value {
        json!(DEFAULT_DOG_EVENT_COUNT)
    }
}

#[derive(Default)]
struct FakeEvents {
    configured: bool,
    failing: bool,
    events: Vec<RawTransferEvent>,
}

#[async_trait]
impl RuneEventSource for FakeEvents {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn rune_events(&self) -> Result<Vec<RawTransferEvent>, FetchError> {
        if self.failing {
            Err(FetchError::malformed("unisat code 1"))
        } else {
            Ok(self.events.clone())
        }
    }
}

#[derive(Default)]
struct FakeNode {
    available: bool,
    txs: HashMap<String, RawTransaction>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl TransactionSource for FakeNode {
    async fn raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
        self.calls.lock().push(txid.to_string());
        self.txs.get(txid).cloned().ok_or(RpcError::Remote {
            code: -5,
            message: "No such mempool or blockchain transaction".to_string(),
        })
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

fn raw_tx(txid: &str, inputs: &[(&str, u32)], outputs_btc: &[f64]) -> RawTransaction {
    RawTransaction {
        txid: txid.to_string(),
        vin: inputs
            .iter()
            .map(|(prev, vout)| TxInput {
                txid: Some(prev.to_string()),
                vout: Some(*vout),
                coinbase: None,
            })
            .collect(),
        vout: outputs_btc
            .iter()
            .enumerate()
            .map(|(n, value)| TxOutput {
                value: *value,
                n: n as u32,
            })
            .collect(),
    }
}

fn event(txid: &str, address: &str, amount: u64, direction: &str) -> RawTransferEvent {
    serde_json::from_value(json!({
        "txid": txid,
        "address": address,
        "amount": amount.to_string(),
        "event": direction,
        "runeId": "840000:3",
        "blockHeight": 900000,
        "timestamp": 1750000000
    }))
    .unwrap()
}

// ===== Harness =====

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    kraken: Arc<FakeQuote>,
    gate: Arc<FakeQuote>,
    events_count: Arc<FakeCount>,
}

struct Options {
    quotes_up: bool,
    count_up: bool,
    events: FakeEvents,
    node: FakeNode,
    rate_limit: u32,
}

impl Default for Options {
    fn default() -> Self {
        let mut txs = HashMap::new();
        for tx in [
            raw_tx("fee1", &[("parent", 0)], &[0.99]),
            raw_tx("parent", &[], &[1.0]),
        ] {
            txs.insert(tx.txid.clone(), tx);
        }
        Self {
            quotes_up: true,
            count_up: true,
            events: FakeEvents {
                configured: true,
                ..Default::default()
            },
            node: FakeNode {
                available: true,
                txs,
                ..Default::default()
            },
            rate_limit: 30,
        }
    }
}

fn harness(options: Options) -> Harness {
    let http = Client::new();
    let ttl = Duration::from_secs(30);

    let kraken = FakeQuote::new("kraken", 0.0020, options.quotes_up);
    let gate = FakeQuote::new("gateio", 0.0010, options.quotes_up);
    let quote_sources: Vec<SharedUpstream<PriceQuote>> = vec![kraken.clone(), gate.clone()];

    let bitcoin_sources: Vec<SharedUpstream<Value>> = vec![
        Arc::new(FakeJson {
            name: "fees",
            value: Some(json!({"fastestFee": 12, "halfHourFee": 8, "hourFee": 5, "economyFee": 2, "minimumFee": 1})),
            fallback: json!({"fastestFee": 3}),
        }),
        Arc::new(FakeJson {
            name: "mempool",
            value: None,
            fallback: json!({"count": 50000}),
        }),
    ];
    let market_sources: Vec<SharedUpstream<Value>> = vec![Arc::new(FakeJson {
        name: "tickers",
        value: Some(json!([{"market": "Gate", "pair": "DOG/USDT"}])),
        fallback: json!([]),
    })];

    let events_count = Arc::new(FakeCount {
        total: 2_960_412,
        up: AtomicBool::new(options.count_up),
    });

    let feeds = Feeds::new(
        Aggregator::new("bitcoin", http.clone(), ttl, bitcoin_sources).with_derived("summary", bitcoin_summary),
        Aggregator::new("markets", http.clone(), Duration::from_secs(60), market_sources),
        Aggregator::new(
            "events-count",
            http.clone(),
            Duration::from_secs(300),
            vec![events_count.clone() as SharedUpstream<Value>],
        ),
        http,
        ttl,
        quote_sources,
    );

    let store = Arc::new(MemoryStore::new());
    let notifier = Notifier::new(Duration::from_secs(30));
    let backfill = BackfillJob::new(
        store.clone(),
        FeeResolver::new(Arc::new(options.node)),
        BackfillConfig {
            pacing: Duration::ZERO,
            ..Default::default()
        },
        Some(SECRET.to_string()),
    )
    .with_notifier(notifier.clone());

    let state = AppState {
        feeds: Arc::new(feeds),
        rune_events: Arc::new(options.events),
        store: store.clone(),
        backfill: Arc::new(backfill),
        notifier,
        cache_key: TRANSACTIONS_CACHE_KEY.to_string(),
    };
    let app = create_router(state, RateLimitConfig::per_minute(options.rate_limit));

    Harness {
        app,
        store,
        kraken,
        gate,
        events_count,
    }
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri).await
}

async fn seed(store: &MemoryStore, records: Vec<TransactionRecord>) {
    let mut cache = TransactionCache {
        transactions: records,
        ..Default::default()
    };
    cache.extra.insert("last_block".to_string(), json!(900123));
    cache.extra.insert("metrics".to_string(), json!({"holders": 42}));
    store
        .set(TRANSACTIONS_CACHE_KEY, &serde_json::to_string(&cache).unwrap())
        .await
        .unwrap();
}

// ===== Snapshots =====

#[tokio::test]
async fn health_is_ok() {
    let h = harness(Options::default());
    let (status, body) = get(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn price_aggregate_serves_unified_view_and_caches() {
    let h = harness(Options::default());

    let (status, body) = get(&h.app, "/api/price").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kraken"]["price"], 0.0020);
    let unified = body["unified"]["price"].as_f64().unwrap();
    assert!((unified - 0.0015).abs() < 1e-12);
    assert_eq!(body["cached"], false);

    let (_, again) = get(&h.app, "/api/price").await;
    assert_eq!(again["cached"], true);
    assert_eq!(h.kraken.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bitcoin_snapshot_marks_fallback_sources() {
    let h = harness(Options::default());
    let (status, body) = get(&h.app, "/api/bitcoin").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fees"]["fastestFee"], 12);
    assert_eq!(body["mempool"]["count"], 50000);
    assert_eq!(body["fallbackSources"], json!(["mempool"]));
    assert_eq!(body["summary"]["fees"]["fastest"], 12);
}

#[tokio::test]
async fn markets_snapshot_without_derived_view() {
    let h = harness(Options::default());
    let (status, body) = get(&h.app, "/api/markets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tickers"][0]["market"], "Gate");
    assert!(body.get("summary").is_none());
}

#[tokio::test]
async fn single_source_quote_is_flattened() {
    let h = harness(Options::default());
    let (status, body) = get(&h.app, "/api/price/gateio").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "gateio");
    assert_eq!(body["price"], 0.0010);
    assert_eq!(body["change24h"], 1.0);
    assert_eq!(body["fallbackSources"], json!([]));
}

#[tokio::test]
async fn synthetic_single_source_quote_is_503_with_default_body() {
    let h = harness(Options {
        quotes_up: false,
        ..Default::default()
    });
    let (status, body) = get(&h.app, "/api/price/kraken").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["price"], 0.00163);
    assert_eq!(body["fallbackSources"], json!(["kraken"]));

    // The aggregate stays 200 on the same defaults
    let (status, body) = get(&h.app, "/api/price").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unified"]["liveSources"], 0);
}

#[tokio::test(start_paused = true)]
async fn single_source_serves_stale_after_upstream_dies() {
    let h = harness(Options::default());
    get(&h.app, "/api/price/gateio").await;

    h.gate.up.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(45)).await;

    let (status, body) = get(&h.app, "/api/price/gateio").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["price"], 0.0010);
    assert_eq!(body["stale"], true);
    assert_eq!(body["cacheAge"], 45);
}

#[tokio::test]
async fn unknown_price_source_is_404() {
    let h = harness(Options::default());
    let (status, body) = get(&h.app, "/api/price/nasdaq").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nasdaq"));
}

// ===== Rune event count =====

#[tokio::test(start_paused = true)]
async fn events_count_is_cached_then_served_stale() {
    let h = harness(Options::default());

    let (status, body) = get(&h.app, "/api/dog-rune/events-count").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2_960_412);
    assert_eq!(body["cached"], false);

    let (_, again) = get(&h.app, "/api/dog-rune/events-count").await;
    assert_eq!(again["cached"], true);

    h.events_count.up.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(301)).await;
    let (status, body) = get(&h.app, "/api/dog-rune/events-count").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2_960_412);
    assert_eq!(body["cached"], true);
    assert_eq!(body["stale"], true);
}

#[tokio::test]
async fn events_count_falls_back_to_last_known_total() {
    let h = harness(Options {
        count_up: false,
        ..Default::default()
    });
    let (status, body) = get(&h.app, "/api/dog-rune/events-count").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], DEFAULT_DOG_EVENT_COUNT);
    assert_eq!(body["fallbackSources"], json!(["total"]));
}

// ===== Rune search =====

#[tokio::test]
async fn search_tx_classifies_transfer() {
    let events = vec![
        event("abc", "bc1sender", 1_000_000, "send"),
        event("abc", "bc1receiver", 600_000, "receive"),
        event("abc", "bc1sender", 400_000, "receive"),
        event("other", "bc1x", 5, "send"),
    ];
    let h = harness(Options {
        events: FakeEvents {
            configured: true,
            events,
            ..Default::default()
        },
        ..Default::default()
    });

    let (status, body) = get(&h.app, "/api/dog-rune/search-tx?txid=abc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "transfer");
    assert_eq!(body["has_change"], true);
    assert_eq!(body["net_transfer"], 6.0);
    assert_eq!(body["change_amount"], 4.0);
}

#[tokio::test]
async fn search_tx_error_statuses() {
    let h = harness(Options::default());
    let (status, _) = get(&h.app, "/api/dog-rune/search-tx").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(&h.app, "/api/dog-rune/search-tx?txid=missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let unconfigured = harness(Options {
        events: FakeEvents::default(),
        ..Default::default()
    });
    let (status, _) = get(&unconfigured.app, "/api/dog-rune/search-tx?txid=abc").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let failing = harness(Options {
        events: FakeEvents {
            configured: true,
            failing: true,
            ..Default::default()
        },
        ..Default::default()
    });
    let (status, _) = get(&failing.app, "/api/dog-rune/search-tx?txid=abc").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn search_tx_is_rate_limited() {
    let h = harness(Options {
        rate_limit: 2,
        ..Default::default()
    });
    for expected in ["1", "0"] {
        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/dog-rune/search-tx?txid=x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected);
    }

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/dog-rune/search-tx?txid=x")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert!(!response.headers().contains_key("x-ratelimit-remaining"));

    // Other routes are not limited
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/api/price").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("x-ratelimit-remaining"));
}

// ===== Cached transactions =====

#[tokio::test]
async fn transactions_blob_and_summary() {
    let h = harness(Options::default());
    let (status, _) = get(&h.app, "/api/dog-rune/transactions").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    seed(&h.store, vec![TransactionRecord::new("a", Utc::now()), TransactionRecord::new("b", Utc::now())]).await;

    let (status, body) = get(&h.app, "/api/dog-rune/transactions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transactions"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["metrics"]["holders"], 42);

    let (status, body) = get(&h.app, "/api/dog-rune/transactions?summary=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_transactions"], 2);
    assert_eq!(body["last_block"], 900123);
    assert!(body.get("transactions").is_none());
}

#[tokio::test]
async fn malformed_blob_is_422() {
    let h = harness(Options::default());
    h.store.set(TRANSACTIONS_CACHE_KEY, "[1, 2").await.unwrap();
    let (status, _) = get(&h.app, "/api/dog-rune/transactions").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, _) = get(&h.app, &format!("/api/calculate-fees?secret={SECRET}")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ===== Fee backfill trigger =====

#[tokio::test]
async fn calculate_fees_resolves_and_reports() {
    let h = harness(Options::default());
    seed(
        &h.store,
        vec![
            TransactionRecord::new("fee1", Utc::now()),
            TransactionRecord::new("unknown", Utc::now()),
        ],
    )
    .await;

    let (status, body) = send(&h.app, Method::POST, &format!("/api/calculate-fees?secret={SECRET}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["fees_calculated"], 1);
    assert_eq!(body["fees_failed"], 1);
    assert_eq!(body["remaining"], 0);

    let (_, blob) = get(&h.app, "/api/dog-rune/transactions").await;
    assert_eq!(blob["transactions"][0]["fee_sats"], 1_000_000);
    assert_eq!(blob["last_block"], 900123);
    assert!(blob["last_update"].is_string());
}

#[tokio::test]
async fn calculate_fees_honours_max() {
    let h = harness(Options::default());
    seed(
        &h.store,
        vec![
            TransactionRecord::new("unknown1", Utc::now()),
            TransactionRecord::new("unknown2", Utc::now()),
            TransactionRecord::new("unknown3", Utc::now()),
        ],
    )
    .await;

    let (status, body) = get(&h.app, &format!("/api/calculate-fees?secret={SECRET}&max=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fees_failed"], 1);
    assert_eq!(body["remaining"], 2);
}

#[tokio::test]
async fn calculate_fees_error_statuses() {
    let h = harness(Options::default());
    let (status, _) = get(&h.app, "/api/calculate-fees?secret=wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = get(&h.app, "/api/calculate-fees").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = get(&h.app, &format!("/api/calculate-fees?secret={SECRET}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let no_rpc = harness(Options {
        node: FakeNode::default(),
        ..Default::default()
    });
    let (status, _) = get(&no_rpc.app, &format!("/api/calculate-fees?secret={SECRET}")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// ===== Event stream =====

#[tokio::test]
async fn events_stream_starts_with_connected_frame() {
    let h = harness(Options::default());
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/api/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let mut body = response.into_body().into_data_stream();
    let frame = futures_util::StreamExt::next(&mut body).await.unwrap().unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    assert!(text.starts_with("data: {"));
    assert!(text.contains("\"type\":\"connected\""));
}
