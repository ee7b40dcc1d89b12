//! Rate limiting middleware.
//!
//! Fixed-window request counting per client IP.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::api::ApiError;

pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Configuration for rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(30)
    }
}

/// Rate limiter state tracking requests per IP.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<IpAddr, RateLimitEntry>>>,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, PartialEq, Eq)]
enum RateLimitResult {
    Allowed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn check(&self, ip: IpAddr) -> RateLimitResult {
        let mut state = self.state.lock();
        let now = Instant::now();

        // Drop expired clients once the table grows
        let window = self.config.window;
        if state.len() > 1024 {
            state.retain(|_, entry| now.duration_since(entry.window_start) < window);
        }

        let entry = state.entry(ip).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.config.max_requests {
            return RateLimitResult::Exceeded {
                retry_after: (entry.window_start + window).duration_since(now),
            };
        }

        entry.count += 1;
        RateLimitResult::Allowed {
            remaining: self.config.max_requests - entry.count,
        }
    }
}

/// First hop of `X-Forwarded-For`, then the socket peer.
pub(crate) fn client_ip(request: &Request<Body>, peer: Option<SocketAddr>) -> IpAddr {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&request, connect_info.map(|ConnectInfo(addr)| addr));

    match limiter.check(ip) {
        RateLimitResult::Allowed { remaining } => {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
            response
        }
        RateLimitResult::Exceeded { retry_after } => {
            warn!(
                ip = %ip,
                path = %request.uri().path(),
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_allows_under_limit() {
        let limiter = limiter(3);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        assert_eq!(limiter.check(ip), RateLimitResult::Allowed { remaining: 2 });
        assert_eq!(limiter.check(ip), RateLimitResult::Allowed { remaining: 1 });
        assert_eq!(limiter.check(ip), RateLimitResult::Allowed { remaining: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exceeded_until_window_resets() {
        let limiter = limiter(2);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        limiter.check(ip);
        limiter.check(ip);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(
            limiter.check(ip),
            RateLimitResult::Exceeded {
                retry_after: Duration::from_secs(40)
            }
        );

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(limiter.check(ip), RateLimitResult::Allowed { remaining: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_counted_separately() {
        let limiter = limiter(1);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(matches!(limiter.check(a), RateLimitResult::Allowed { .. }));
        assert!(matches!(limiter.check(b), RateLimitResult::Allowed { .. }));
        assert!(matches!(limiter.check(a), RateLimitResult::Exceeded { .. }));
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(client_ip(&request, Some(peer)), "203.0.113.7".parse::<IpAddr>().unwrap());

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&bare, Some(peer)), peer.ip());
        assert_eq!(client_ip(&bare, None), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
