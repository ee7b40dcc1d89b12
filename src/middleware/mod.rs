//! Middleware for observability and rate limiting.

pub mod logging;
pub mod rate_limit;

pub use logging::log_requests;
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimiter};
