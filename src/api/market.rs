//! Price, market and network snapshots.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;

use super::routes::{ApiError, AppState};
use crate::aggregator::Served;
use crate::scrapers::PriceQuote;

pub async fn get_bitcoin(State(state): State<AppState>) -> Json<Value> {
    Json(state.feeds.bitcoin.get_snapshot().await.to_json())
}

pub async fn get_markets(State(state): State<AppState>) -> Json<Value> {
    Json(state.feeds.markets.get_snapshot().await.to_json())
}

pub async fn get_price(State(state): State<AppState>) -> Json<Value> {
    Json(state.feeds.price.get_snapshot().await.to_json())
}

/// One quote source. Answers 503 (with the default quote) when the value is
/// entirely synthetic.
pub async fn get_price_source(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> Result<Response, ApiError> {
    let aggregator = state
        .feeds
        .price_source(&source)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown price source: {source}")))?;

    let served = aggregator.get_snapshot().await;
    let status = if served.is_synthetic() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    Ok((status, Json(single_source_body(aggregator.name(), &served))).into_response())
}

/// Lifts the quote fields to the top level next to the freshness flags.
fn single_source_body(name: &str, served: &Served<PriceQuote>) -> Value {
    let mut body = served.to_json();
    if let Value::Object(map) = &mut body {
        if let Some(Value::Object(quote)) = map.remove(name) {
            map.extend(quote);
        }
        map.insert("source".to_string(), Value::String(name.to_string()));
    }
    body
}
