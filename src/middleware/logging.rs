//! Access log for the HTTP surface.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::rate_limit::client_ip;

/// Health checks and the long-lived event stream would drown everything else.
fn is_quiet(path: &str) -> bool {
    matches!(path, "/health" | "/api/events")
}

/// One line per request: 5xx at WARN, the rest at INFO. 4xx lines carry the
/// client address since they are usually caller mistakes or abuse.
pub async fn log_requests(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_quiet(&path) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let client = client_ip(&request, connect_info.map(|ConnectInfo(addr)| addr));
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let latency_ms = start.elapsed().as_millis();
    if status.is_server_error() {
        warn!(%method, %path, status = status.as_u16(), latency_ms, "Request failed (5xx)");
    } else if status.is_client_error() {
        info!(%method, %path, status = status.as_u16(), latency_ms, client_ip = %client, "Request rejected (4xx)");
    } else if status == StatusCode::NOT_MODIFIED {
        debug!(%method, %path, latency_ms, "Not modified");
    } else {
        info!(%method, %path, status = status.as_u16(), latency_ms, "Request completed");
    }

    response
}
