//! Fills in missing `fee_sats` on recent cached transactions.
//!
//! One pass reads the whole blob, resolves up to `max_count` eligible
//! records one at a time under a [`Pacer`], and writes the blob back once if
//! anything changed. Re-running is safe: resolved records are no longer
//! eligible.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::pacing::Pacer;
use super::resolver::FeeResolver;
use crate::models::{TransactionCache, TRANSACTIONS_CACHE_KEY};
use crate::store::KvStore;
use crate::stream::{Notifier, StreamEvent};

pub const DEFAULT_MAX_COUNT: usize = 50;
pub const DEFAULT_RECENCY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_PACING: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub max_count: usize,
    pub recency_window: Duration,
    pub pacing: Duration,
    pub cache_key: String,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            recency_window: DEFAULT_RECENCY_WINDOW,
            pacing: DEFAULT_PACING,
            cache_key: TRANSACTIONS_CACHE_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub message: String,
    #[serde(rename = "fees_calculated")]
    pub resolved: usize,
    #[serde(rename = "fees_failed")]
    pub failed: usize,
    /// Eligible records not attempted in this pass.
    pub remaining: usize,
    #[serde(skip)]
    pub eligible: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("RPC credentials not configured")]
    RpcUnavailable,
    #[error("no cached transactions found")]
    NoCache,
    #[error("cached transactions are malformed: {0}")]
    MalformedCache(String),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub struct BackfillJob {
    store: Arc<dyn KvStore>,
    resolver: FeeResolver,
    config: BackfillConfig,
    secret: Option<String>,
    notifier: Option<Notifier>,
}

/// Length-independent comparison so response timing does not leak a prefix.
fn secrets_match(expected: &str, provided: &str) -> bool {
    let (a, b) = (expected.as_bytes(), provided.as_bytes());
    let diff = a
        .iter()
        .zip(b.iter())
        .fold(a.len() ^ b.len(), |acc, (x, y)| acc | usize::from(x ^ y));
    diff == 0
}

fn window_label(window: Duration) -> String {
    let hours = window.as_secs() / 3600;
    if hours > 0 && window.as_secs() % 3600 == 0 {
        format!("{hours}h")
    } else {
        format!("{}s", window.as_secs())
    }
}

impl BackfillJob {
    pub fn new(
        store: Arc<dyn KvStore>,
        resolver: FeeResolver,
        config: BackfillConfig,
        secret: Option<String>,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
            secret: secret.filter(|s| !s.is_empty()),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    /// Without a configured secret every request is rejected.
    pub fn authorize(&self, provided: Option<&str>) -> Result<(), BackfillError> {
        match (self.secret.as_deref(), provided) {
            (Some(expected), Some(provided)) if secrets_match(expected, provided) => Ok(()),
            _ => Err(BackfillError::Unauthorized),
        }
    }

    pub async fn run_batch(
        &self,
        max_count: usize,
        recency_window: Duration,
        secret: Option<&str>,
    ) -> Result<BackfillReport, BackfillError> {
        self.run_batch_at(max_count, recency_window, secret, Utc::now()).await
    }

    pub async fn run_batch_at(
        &self,
        max_count: usize,
        recency_window: Duration,
        secret: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<BackfillReport, BackfillError> {
        self.authorize(secret)?;
        if !self.resolver.is_available() {
            return Err(BackfillError::RpcUnavailable);
        }

        let raw = self
            .store
            .get(&self.config.cache_key)
            .await?
            .ok_or(BackfillError::NoCache)?;
        let blob: Value =
            serde_json::from_str(&raw).map_err(|e| BackfillError::MalformedCache(e.to_string()))?;
        // An empty list is a valid cache with nothing to do; no list at all is not
        if blob.get("transactions").map_or(true, Value::is_null) {
            return Err(BackfillError::NoCache);
        }
        let mut cache: TransactionCache =
            serde_json::from_value(blob).map_err(|e| BackfillError::MalformedCache(e.to_string()))?;

        // An unrepresentable window means "everything"
        let cutoff = chrono::Duration::from_std(recency_window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window));
        let eligible: Vec<usize> = cache
            .transactions
            .iter()
            .enumerate()
            .filter(|(_, record)| record.needs_fee() && record.time().is_some_and(|t| cutoff.map_or(true, |c| t >= c)))
            .map(|(idx, _)| idx)
            .collect();

        if eligible.is_empty() {
            return Ok(BackfillReport {
                message: format!(
                    "All transactions in last {} already have fees",
                    window_label(recency_window)
                ),
                resolved: 0,
                failed: 0,
                remaining: 0,
                eligible: 0,
            });
        }

        let batch = &eligible[..eligible.len().min(max_count)];
        info!(eligible = eligible.len(), batch = batch.len(), "💸 Starting fee backfill");

        let mut pacer = Pacer::new(self.config.pacing);
        let (mut resolved, mut failed) = (0usize, 0usize);
        for &idx in batch {
            pacer.ready().await;
            let record = &mut cache.transactions[idx];
            match self.resolver.resolve_fee(&record.txid).await {
                Some(fee) => {
                    debug!(txid = %record.txid, fee_sats = fee, "Fee resolved");
                    record.fee_sats = Some(i64::try_from(fee).unwrap_or(i64::MAX));
                    resolved += 1;
                }
                None => failed += 1,
            }
        }

        if resolved > 0 {
            cache.touch(now);
            let blob = serde_json::to_string(&cache)
                .map_err(|e| BackfillError::Store(anyhow::Error::new(e).context("serialize cache")))?;
            self.store.set(&self.config.cache_key, &blob).await?;
            if let Some(notifier) = &self.notifier {
                notifier.publish(StreamEvent::data_changed("transactions"));
            }
        } else {
            warn!(failed = failed, "No fees resolved in this pass");
        }

        let remaining = eligible.len() - batch.len();
        info!(resolved, failed, remaining, "✅ Fee backfill pass complete");
        Ok(BackfillReport {
            message: format!("Calculated {resolved} fees ({failed} failed, {remaining} remaining)"),
            resolved,
            failed,
            remaining,
            eligible: eligible.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::resolver::tests::{tx, FakeNode};
    use crate::models::TransactionRecord;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use futures_util::StreamExt;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn node() -> FakeNode {
        FakeNode::default()
            .with(tx("t1", &[("p", 0)], &[0.99]))
            .with(tx("t2", &[("p", 1)], &[0.4999]))
            .with(tx("p", &[], &[1.0, 0.5]))
    }

    async fn store_with(records: Vec<TransactionRecord>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let cache = TransactionCache { transactions: records, ..Default::default() };
        store
            .set(TRANSACTIONS_CACHE_KEY, &serde_json::to_string(&cache).unwrap())
            .await
            .unwrap();
        store
    }

    fn job(store: Arc<MemoryStore>, node: FakeNode) -> BackfillJob {
        let config = BackfillConfig { pacing: Duration::ZERO, ..Default::default() };
        BackfillJob::new(store, FeeResolver::new(Arc::new(node)), config, Some("s3cret".to_string()))
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("abc", "ab"));
        assert!(!secrets_match("abc", ""));
    }

    #[tokio::test]
    async fn test_wrong_or_missing_secret_does_no_work() {
        let store = store_with(vec![TransactionRecord::new("t1", now())]).await;
        let node = node();
        let job = job(store, node);
        let err = job.run_batch_at(50, DEFAULT_RECENCY_WINDOW, Some("nope"), now()).await.unwrap_err();
        assert!(matches!(err, BackfillError::Unauthorized));
        let err = job.run_batch_at(50, DEFAULT_RECENCY_WINDOW, None, now()).await.unwrap_err();
        assert!(matches!(err, BackfillError::Unauthorized));
    }

    #[tokio::test]
    async fn test_unset_secret_rejects_everything() {
        let store = store_with(vec![]).await;
        let job = BackfillJob::new(store, FeeResolver::new(Arc::new(node())), BackfillConfig::default(), Some(String::new()));
        assert!(matches!(job.authorize(Some("")), Err(BackfillError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_resolves_recent_missing_fees_only() {
        let old = now() - chrono::Duration::hours(30);
        let mut done = TransactionRecord::new("t2", now());
        done.fee_sats = Some(777);
        let store = store_with(vec![
            TransactionRecord::new("t1", now() - chrono::Duration::hours(1)),
            done,
            TransactionRecord::new("t2", old),
        ])
        .await;
        let job = job(store.clone(), node());

        let report = job.run_batch_at(50, DEFAULT_RECENCY_WINDOW, Some("s3cret"), now()).await.unwrap();
        assert_eq!((report.resolved, report.failed, report.remaining), (1, 0, 0));

        let saved: TransactionCache =
            serde_json::from_str(&store.get(TRANSACTIONS_CACHE_KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(saved.transactions[0].fee_sats, Some(1_000_000));
        assert_eq!(saved.transactions[1].fee_sats, Some(777));
        assert_eq!(saved.transactions[2].fee_sats, None);
        assert!(saved.last_update.is_some());
    }

    #[tokio::test]
    async fn test_max_count_leaves_remaining() {
        let store = store_with(vec![
            TransactionRecord::new("t1", now()),
            TransactionRecord::new("t2", now()),
            TransactionRecord::new("unknown", now()),
        ])
        .await;
        let job = job(store, node());

        let report = job.run_batch_at(2, DEFAULT_RECENCY_WINDOW, Some("s3cret"), now()).await.unwrap();
        assert_eq!((report.resolved, report.failed, report.remaining), (2, 0, 1));

        let report = job.run_batch_at(2, DEFAULT_RECENCY_WINDOW, Some("s3cret"), now()).await.unwrap();
        assert_eq!((report.resolved, report.failed, report.remaining), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_failures_do_not_write() {
        let store = store_with(vec![TransactionRecord::new("unknown", now())]).await;
        let before = store.get(TRANSACTIONS_CACHE_KEY).await.unwrap();
        let job = job(store.clone(), node());

        let report = job.run_batch_at(50, DEFAULT_RECENCY_WINDOW, Some("s3cret"), now()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(store.get(TRANSACTIONS_CACHE_KEY).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_cache() {
        let empty = Arc::new(MemoryStore::new());
        let job_empty = job(empty.clone(), node());
        assert!(matches!(
            job_empty.run_batch_at(50, DEFAULT_RECENCY_WINDOW, Some("s3cret"), now()).await,
            Err(BackfillError::NoCache)
        ));

        empty.set(TRANSACTIONS_CACHE_KEY, "{not json").await.unwrap();
        assert!(matches!(
            job_empty.run_batch_at(50, DEFAULT_RECENCY_WINDOW, Some("s3cret"), now()).await,
            Err(BackfillError::MalformedCache(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_transaction_list_is_not_an_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(TRANSACTIONS_CACHE_KEY, r#"{"transactions":[],"last_update":"x"}"#)
            .await
            .unwrap();
        let job = job(store.clone(), node());

        let report = job.run_batch_at(50, DEFAULT_RECENCY_WINDOW, Some("s3cret"), now()).await.unwrap();
        assert_eq!((report.resolved, report.failed, report.remaining), (0, 0, 0));
        assert_eq!(report.message, "All transactions in last 24h already have fees");

        store.set(TRANSACTIONS_CACHE_KEY, r#"{"last_update":"x"}"#).await.unwrap();
        assert!(matches!(
            job.run_batch_at(50, DEFAULT_RECENCY_WINDOW, Some("s3cret"), now()).await,
            Err(BackfillError::NoCache)
        ));
    }

    #[tokio::test]
    async fn test_nothing_to_do_message() {
        let mut done = TransactionRecord::new("t1", now());
        done.fee_sats = Some(5);
        let store = store_with(vec![done]).await;
        let job = job(store, node());
        let report = job.run_batch_at(50, DEFAULT_RECENCY_WINDOW, Some("s3cret"), now()).await.unwrap();
        assert_eq!(report.message, "All transactions in last 24h already have fees");
        assert_eq!(report.remaining, 0);
    }

    #[tokio::test]
    async fn test_publishes_data_changed() {
        let store = store_with(vec![TransactionRecord::new("t1", now())]).await;
        let notifier = Notifier::new(Duration::from_secs(30));
        let events = notifier.subscribe();
        tokio::pin!(events);
        events.next().await.unwrap();
        let job = job(store, node()).with_notifier(notifier);

        job.run_batch_at(50, DEFAULT_RECENCY_WINDOW, Some("s3cret"), now()).await.unwrap();
        match events.next().await.unwrap() {
            StreamEvent::DataChanged { topic, .. } => assert_eq!(topic, "transactions"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
