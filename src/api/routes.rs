use axum::{
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use super::{events, fees, market, runes};
use crate::feeds::Feeds;
use crate::fees::{BackfillError, BackfillJob};
use crate::middleware::{log_requests, rate_limit_middleware, RateLimitConfig, RateLimiter};
use crate::scrapers::unisat::RuneEventSource;
use crate::store::KvStore;
use crate::stream::Notifier;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub feeds: Arc<Feeds>,
    pub rune_events: Arc<dyn RuneEventSource>,
    pub store: Arc<dyn KvStore>,
    pub backfill: Arc<BackfillJob>,
    pub notifier: Notifier,
    pub cache_key: String,
}

/// Create the API router
pub fn create_router(state: AppState, search_limit: RateLimitConfig) -> Router {
    let limiter = RateLimiter::new(search_limit);

    let limited_routes = Router::new()
        .route("/api/dog-rune/search-tx", get(runes::search_tx))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/bitcoin", get(market::get_bitcoin))
        .route("/api/markets", get(market::get_markets))
        .route("/api/price", get(market::get_price))
        .route("/api/price/:source", get(market::get_price_source))
        .route("/api/dog-rune/transactions", get(runes::get_transactions))
        .route("/api/dog-rune/events-count", get(runes::get_events_count))
        .route(
            "/api/calculate-fees",
            get(fees::calculate_fees).post(fees::calculate_fees),
        )
        .route("/api/events", get(events::stream_events))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(limited_routes)
        .layer(middleware::from_fn(log_requests))
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    /// The stored blob exists but cannot be read.
    Unprocessable(String),
    RateLimited { retry_after: Duration },
    /// A pass-through upstream call failed and there is nothing to fall back on.
    Upstream(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<BackfillError> for ApiError {
    fn from(err: BackfillError) -> Self {
        match err {
            BackfillError::Unauthorized => ApiError::Unauthorized("Unauthorized".to_string()),
            BackfillError::RpcUnavailable => {
                ApiError::Unavailable("Bitcoin RPC credentials not configured".to_string())
            }
            BackfillError::NoCache => ApiError::NotFound("No transactions found".to_string()),
            BackfillError::MalformedCache(msg) => {
                ApiError::Unprocessable(format!("Cached transactions are malformed: {msg}"))
            }
            BackfillError::Store(err) => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            ApiError::RateLimited { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                let body = Json(json!({
                    "error": "Too many requests. Please slow down.",
                    "retry_after_seconds": secs,
                }));
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, secs.to_string())],
                    body,
                )
                    .into_response();
            }
            ApiError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
