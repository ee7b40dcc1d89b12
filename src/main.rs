//! dogdata - DOG market data and fee backfill service

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dogdata_backend::{
    api::{create_router, AppState},
    config::{load_env, Config},
    feeds::Feeds,
    fees::{BackfillError, BackfillJob, FeeResolver},
    middleware::RateLimitConfig,
    rpc::BitcoinRpc,
    scrapers::unisat::UnisatClient,
    store::{KvStore, MemoryStore, SqliteStore},
    stream::Notifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("🐕 dogdata backend starting");
    let config = Config::from_env();

    let http_client = reqwest::Client::builder()
        .timeout(config.upstream_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let store: Arc<dyn KvStore> = match &config.store_path {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => {
            warn!("STORE_PATH not set, transaction cache is in-memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let rpc = BitcoinRpc::new(config.rpc.clone())?;
    if !rpc.is_configured() {
        warn!("Bitcoin RPC credentials missing, fee backfill disabled");
    }
    if config.update_secret.is_none() {
        warn!("UPDATE_SECRET not set, every fee backfill trigger will be rejected");
    }

    let notifier = Notifier::new(config.events_heartbeat);
    let backfill = Arc::new(
        BackfillJob::new(
            store.clone(),
            FeeResolver::new(Arc::new(rpc)),
            config.backfill(),
            config.update_secret.clone(),
        )
        .with_notifier(notifier.clone()),
    );

    let unisat = UnisatClient::new(
        http_client.clone(),
        config.unisat_api_url.clone(),
        config.unisat_api_token.clone(),
        config.upstream_timeout,
    );

    let state = AppState {
        feeds: Arc::new(Feeds::from_config(http_client, &config)),
        rune_events: Arc::new(unisat),
        store,
        backfill: backfill.clone(),
        notifier,
        cache_key: config.transactions_cache_key.clone(),
    };

    if let Some(period) = config.fee_backfill_interval {
        tokio::spawn(scheduled_backfill(
            backfill,
            period,
            config.update_secret.clone(),
        ));
    }

    let app = create_router(
        state,
        RateLimitConfig::per_minute(config.search_rate_limit_per_min),
    );

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dogdata_backend=debug,dogdata=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Runs the backfill with the configured limits every `period`.
async fn scheduled_backfill(job: Arc<BackfillJob>, period: Duration, secret: Option<String>) {
    info!(period_secs = period.as_secs(), "⏱️ Scheduled fee backfill enabled");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let (max, window) = (job.config().max_count, job.config().recency_window);
        match job.run_batch(max, window, secret.as_deref()).await {
            Ok(report) => info!(
                resolved = report.resolved,
                failed = report.failed,
                remaining = report.remaining,
                "Scheduled backfill pass done"
            ),
            Err(BackfillError::NoCache) => info!("Scheduled backfill: no cached transactions yet"),
            Err(err @ (BackfillError::Unauthorized | BackfillError::RpcUnavailable)) => {
                error!(error = %err, "Scheduled backfill cannot run, stopping");
                return;
            }
            Err(err) => warn!(error = %err, "Scheduled backfill pass failed"),
        }
    }
}
