//! DOG rune transaction lookups.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::routes::{ApiError, AppState};
use crate::classifier::{classify, filter_events, ClassifiedTransaction, DOG_RUNE_ID};
use crate::models::TransactionCache;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub txid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub summary: Option<String>,
}

/// Classify the DOG transfers of one transaction.
pub async fn search_tx(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<ClassifiedTransaction>, ApiError> {
    let txid = params
        .txid
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("txid parameter required".to_string()))?;

    if !state.rune_events.is_configured() {
        return Err(ApiError::Unavailable("Unisat API token not configured".to_string()));
    }

    let events = state
        .rune_events
        .rune_events()
        .await
        .map_err(|e| ApiError::Upstream(format!("Failed to fetch rune events: {e}")))?;
    debug!(txid = %txid, fetched = events.len(), "Searching rune events");

    let matching = filter_events(events, &txid, DOG_RUNE_ID);
    let classified = classify(&matching).ok_or_else(|| {
        ApiError::NotFound("No DOG transfer events found for this transaction".to_string())
    })?;
    info!(txid = %txid, tx_type = ?classified.tx_type, "🔎 Transaction classified");
    Ok(Json(classified))
}

fn wants_summary(flag: Option<&str>) -> bool {
    flag.map(str::to_ascii_lowercase)
        .is_some_and(|f| matches!(f.as_str(), "1" | "true" | "summary"))
}

/// Zero, empty and null count as absent, the way the ingestion side writes them.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    })
}

fn summarize(cache: &TransactionCache) -> Value {
    let extra = |key: &str| present(cache.extra.get(key)).cloned();
    json!({
        "total_transactions": extra("total_transactions").unwrap_or_else(|| json!(cache.transactions.len())),
        "last_block": extra("last_block").unwrap_or_else(|| json!(0)),
        "last_updated": extra("last_updated")
            .or_else(|| present(cache.last_update.as_ref()).cloned())
            .unwrap_or(Value::Null),
        "metrics": extra("metrics").unwrap_or(Value::Null),
    })
}

/// The cached transaction blob, or its summary with `?summary=1`.
pub async fn get_transactions(
    State(state): State<AppState>,
    Query(params): Query<TransactionsQuery>,
) -> Result<Json<Value>, ApiError> {
    let raw = state
        .store
        .get(&state.cache_key)
        .await?
        .ok_or_else(|| ApiError::Unavailable("Transaction cache not yet populated".to_string()))?;
    let cache: TransactionCache = serde_json::from_str(&raw)
        .map_err(|e| ApiError::Unprocessable(format!("Cached transactions are malformed: {e}")))?;

    if !wants_summary(params.summary.as_deref()) {
        let body = serde_json::to_value(&cache).map_err(anyhow::Error::from)?;
        return Ok(Json(body));
    }

    Ok(Json(summarize(&cache)))
}

/// Total DOG rune events, cached and served stale when Unisat is down.
pub async fn get_events_count(State(state): State<AppState>) -> Json<Value> {
    Json(state.feeds.events_count.get_snapshot().await.to_json())
}
