//! Fan-out over several upstreams with a cached merged snapshot.
//!
//! Refresh rules:
//! - a fresh cached snapshot is returned without touching any upstream;
//! - a refresh where at least one source answered is cached and returned;
//! - a refresh where every source fell back returns the previous snapshot
//!   marked stale, or the static defaults (uncached) when there is none;
//! - a fan-out that fails as a whole (task panic or cancellation) takes the
//!   same path as an all-fallback refresh and carries an error string.
//!
//! The cache is written only after every task has completed, so a dropped
//! request never leaves a partial snapshot behind.

use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, TtlCell};
use crate::scrapers::{fetch_or_default, SourceResult, Upstream};

pub type SharedUpstream<P> = Arc<dyn Upstream<Payload = P>>;
pub type SourceMap<P> = BTreeMap<&'static str, SourceResult<P>>;
pub type DeriveFn<P> = fn(&SourceMap<P>) -> Value;

/// Merged result of one fan-out.
#[derive(Debug, Clone)]
pub struct Snapshot<P> {
    pub sources: SourceMap<P>,
    /// Normalized view computed from `sources` (unified price, fee schedule...).
    pub derived: Value,
    /// Response key the derived view is published under.
    pub derived_key: &'static str,
}

impl<P> Snapshot<P> {
    pub fn fallback_sources(&self) -> Vec<&'static str> {
        self.sources
            .iter()
            .filter(|(_, result)| result.is_fallback())
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn all_fallback(&self) -> bool {
        self.sources.values().all(SourceResult::is_fallback)
    }
}

/// How a served snapshot was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Fetched during this call.
    Live,
    /// Served from a cache entry still within its TTL.
    Cached,
    /// Served from an expired cache entry because the refresh failed.
    Stale,
    /// Static defaults; nothing live or cached existed.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Served<P> {
    pub entry: Arc<CacheEntry<Snapshot<P>>>,
    pub freshness: Freshness,
    pub error: Option<String>,
}

impl<P> Served<P> {
    pub fn snapshot(&self) -> &Snapshot<P> {
        &self.entry.value
    }

    pub fn is_synthetic(&self) -> bool {
        self.freshness == Freshness::Fallback
    }
}

impl<P: Serialize> Served<P> {
    /// Response body: one key per source plus the derived view and freshness flags.
    pub fn to_json(&self) -> Value {
        let snapshot = self.snapshot();
        let mut body = Map::new();
        for (name, result) in &snapshot.sources {
            let value = serde_json::to_value(result.value()).unwrap_or(Value::Null);
            body.insert((*name).to_string(), value);
        }
        if !snapshot.derived.is_null() {
            body.insert(snapshot.derived_key.to_string(), snapshot.derived.clone());
        }

        let from_cache = matches!(self.freshness, Freshness::Cached | Freshness::Stale);
        body.insert("cached".to_string(), json!(from_cache));
        body.insert("stale".to_string(), json!(self.freshness == Freshness::Stale));
        if from_cache {
            body.insert("cacheAge".to_string(), json!(self.entry.age().as_secs()));
        }
        body.insert("fallbackSources".to_string(), json!(snapshot.fallback_sources()));
        if let Some(err) = &self.error {
            body.insert("error".to_string(), json!(err));
        }
        Value::Object(body)
    }
}

fn no_derived<P>(_: &SourceMap<P>) -> Value {
    Value::Null
}

pub struct Aggregator<P> {
    name: &'static str,
    http: Client,
    sources: Vec<SharedUpstream<P>>,
    cell: TtlCell<Snapshot<P>>,
    derive: DeriveFn<P>,
    derived_key: &'static str,
}

impl<P> Aggregator<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, http: Client, ttl: Duration, sources: Vec<SharedUpstream<P>>) -> Self {
        Self {
            name,
            http,
            sources,
            cell: TtlCell::new(ttl),
            derive: no_derived::<P>,
            derived_key: "summary",
        }
    }

    pub fn with_derived(mut self, key: &'static str, derive: DeriveFn<P>) -> Self {
        self.derive = derive;
        self.derived_key = key;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// The snapshot built purely from static defaults.
    pub fn default_snapshot(&self) -> Snapshot<P> {
        let sources = self
            .sources
            .iter()
            .map(|s| (s.name(), SourceResult::Fallback(s.fallback())))
            .collect();
        self.build(sources)
    }

    fn build(&self, sources: SourceMap<P>) -> Snapshot<P> {
        let derived = (self.derive)(&sources);
        Snapshot {
            sources,
            derived,
            derived_key: self.derived_key,
        }
    }

    /// Cached snapshot if fresh, otherwise a refresh. Never fails.
    pub async fn get_snapshot(&self) -> Served<P> {
        if let Some(entry) = self.cell.fresh() {
            debug!(aggregator = self.name, age_secs = entry.age().as_secs(), "Cache hit");
            return Served { entry, freshness: Freshness::Cached, error: None };
        }
        self.refresh().await
    }

    /// Fan out to every source regardless of cache state.
    pub async fn refresh(&self) -> Served<P> {
        match self.fan_out().await {
            Ok(sources) => {
                let snapshot = self.build(sources);
                if snapshot.all_fallback() {
                    warn!(aggregator = self.name, "⚠️ Every upstream failed this cycle");
                    return self.degraded(None);
                }
                let fallback = snapshot.fallback_sources();
                if !fallback.is_empty() {
                    info!(aggregator = self.name, fallback = ?fallback, "Partial refresh");
                }
                let entry = self.cell.set(snapshot);
                Served { entry, freshness: Freshness::Live, error: None }
            }
            Err(err) => {
                error!(aggregator = self.name, error = %err, "❌ Fan-out failed");
                self.degraded(Some(err))
            }
        }
    }

    fn degraded(&self, error: Option<String>) -> Served<P> {
        match self.cell.get() {
            Some(entry) => Served { entry, freshness: Freshness::Stale, error },
            None => Served {
                entry: Arc::new(CacheEntry::new(self.default_snapshot())),
                freshness: Freshness::Fallback,
                error,
            },
        }
    }

    async fn fan_out(&self) -> Result<SourceMap<P>, String> {
        let mut tasks = JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            let http = self.http.clone();
            tasks.spawn(async move {
                let result = fetch_or_default(source.as_ref(), &http).await;
                (source.name(), result)
            });
        }

        let mut merged = SourceMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, result)) => {
                    merged.insert(name, result);
                }
                Err(join_err) => return Err(format!("join error: {join_err}")),
            }
        }
        Ok(merged)
    }
}
