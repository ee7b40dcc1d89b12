use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::routes::{ApiError, AppState};

/// Upper bound on `max` so one request cannot pin the node for hours.
const MAX_BATCH: usize = 500;

#[derive(Debug, Deserialize)]
pub struct CalculateFeesQuery {
    pub secret: Option<String>,
    pub max: Option<usize>,
    pub window_hours: Option<u64>,
}

/// Trigger one backfill pass.
pub async fn calculate_fees(
    State(state): State<AppState>,
    Query(params): Query<CalculateFeesQuery>,
) -> Result<Json<Value>, ApiError> {
    let defaults = state.backfill.config();
    let max = params.max.unwrap_or(defaults.max_count).clamp(1, MAX_BATCH);
    let window = params
        .window_hours
        .filter(|&h| h > 0)
        .map(|h| Duration::from_secs(h.saturating_mul(3600)))
        .unwrap_or(defaults.recency_window);

    let report = state
        .backfill
        .run_batch(max, window, params.secret.as_deref())
        .await?;

    let mut body = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
    if let Value::Object(map) = &mut body {
        map.insert("success".to_string(), Value::Bool(true));
    }
    Ok(Json(body))
}
