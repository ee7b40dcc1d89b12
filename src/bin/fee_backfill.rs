//! Fee Backfill Tool
//!
//! Runs the fee backfill against the service's key-value store outside the
//! HTTP server, e.g. from cron.
//!
//! Usage:
//!   cargo run --release --bin fee_backfill -- --store-path ./dogdata.db --max 100
//!   cargo run --release --bin fee_backfill -- --store-path ./dogdata.db --until-done

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dogdata_backend::{
    config::load_env,
    fees::{BackfillConfig, BackfillJob, BackfillReport, FeeResolver},
    models::TRANSACTIONS_CACHE_KEY,
    rpc::{BitcoinRpc, RpcConfig},
    store::SqliteStore,
};

/// Recover missing transaction fees from a Bitcoin node
#[derive(Parser, Debug)]
#[command(name = "fee_backfill")]
#[command(about = "Fill in missing fee_sats on recent cached DOG transactions")]
struct Cli {
    /// Path to the SQLite key-value store
    #[arg(long, env = "STORE_PATH")]
    store_path: String,

    /// Store key of the transaction blob
    #[arg(long, env = "TRANSACTIONS_CACHE_KEY", default_value = TRANSACTIONS_CACHE_KEY)]
    cache_key: String,

    /// Maximum transactions to resolve per pass
    #[arg(short, long, env = "FEE_BACKFILL_MAX", default_value = "50")]
    max: usize,

    /// Only transactions newer than this many hours are eligible
    #[arg(short, long, env = "FEE_BACKFILL_WINDOW_HOURS", default_value = "24")]
    window_hours: u64,

    /// Minimum spacing between node lookups, in milliseconds
    #[arg(long, env = "FEE_BACKFILL_PACING_MS", default_value = "100")]
    pacing_ms: u64,

    /// Shared secret (same as the HTTP trigger)
    #[arg(long, env = "UPDATE_SECRET", hide_env_values = true)]
    secret: Option<String>,

    #[arg(long, env = "BITCOIN_RPC_URL", default_value = "http://127.0.0.1:8332")]
    rpc_url: String,

    #[arg(long, env = "BITCOIN_RPC_USER", default_value = "")]
    rpc_user: String,

    #[arg(long, env = "BITCOIN_RPC_PASSWORD", default_value = "", hide_env_values = true)]
    rpc_password: String,

    #[arg(long, env = "BITCOIN_RPC_TIMEOUT_SECS", default_value = "30")]
    rpc_timeout_secs: u64,

    /// Keep running passes until nothing eligible remains
    #[arg(long)]
    until_done: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();
    let cli = Cli::parse();

    let rpc = BitcoinRpc::new(RpcConfig {
        url: cli.rpc_url.clone(),
        user: cli.rpc_user.clone(),
        password: cli.rpc_password.clone(),
        timeout: Duration::from_secs(cli.rpc_timeout_secs),
    })?;
    if !rpc.is_configured() {
        bail!("Bitcoin RPC credentials not configured (BITCOIN_RPC_USER / BITCOIN_RPC_PASSWORD)");
    }

    let store = Arc::new(
        SqliteStore::open(&cli.store_path)
            .with_context(|| format!("Failed to open store: {}", cli.store_path))?,
    );
    let window = Duration::from_secs(cli.window_hours.saturating_mul(3600));
    let job = BackfillJob::new(
        store,
        FeeResolver::new(Arc::new(rpc)),
        BackfillConfig {
            max_count: cli.max,
            recency_window: window,
            pacing: Duration::from_millis(cli.pacing_ms),
            cache_key: cli.cache_key.clone(),
        },
        cli.secret.clone(),
    );

    let mut totals = (0usize, 0usize);
    let mut pass = 0u32;
    loop {
        pass += 1;
        let report = job
            .run_batch(cli.max, window, cli.secret.as_deref())
            .await
            .context("Backfill pass failed")?;
        print_report(pass, &report);
        totals.0 += report.resolved;
        totals.1 += report.failed;

        if !cli.until_done || report.remaining == 0 {
            break;
        }
        // Failed records stay eligible and are retried first
        if report.resolved == 0 {
            warn!(remaining = report.remaining, "No progress in this pass, stopping");
            break;
        }
    }

    info!(resolved = totals.0, failed = totals.1, passes = pass, "✅ Fee backfill finished");
    Ok(())
}

fn print_report(pass: u32, report: &BackfillReport) {
    println!(
        "pass {:>3}: {} resolved, {} failed, {} remaining ({})",
        pass, report.resolved, report.failed, report.remaining, report.message
    );
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dogdata_backend=info,fee_backfill=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
