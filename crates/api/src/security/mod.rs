//! Request-level protections: response hardening headers and rate limits

mod headers;
pub mod rate_limit;

pub use headers::security_headers_middleware;
pub use rate_limit::{
    client_ip_from_headers, enforce_rate_limit, RateLimitDecision, RateLimitGuard,
    RateLimitPolicy, RateLimiter,
};
