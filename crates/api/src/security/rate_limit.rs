//! Sliding-window rate limiting keyed by client address

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;

use crate::error::ApiError;

/// Bucket key used when no client address can be determined
const UNKNOWN_CLIENT: &str = "unknown";

/// Default cap on distinct tracked addresses per policy
pub const DEFAULT_MAX_TRACKED_CLIENTS: usize = 10_000;

/// Window length and request allowance for one policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub window: Duration,
    pub max_requests: usize,
}

impl RateLimitPolicy {
    /// General traffic: 100 requests per minute
    pub const GENERAL: Self = Self {
        name: "general",
        window: Duration::from_secs(60),
        max_requests: 100,
    };

    /// Authentication endpoints: 10 requests per 15 minutes
    pub const AUTH: Self = Self {
        name: "auth",
        window: Duration::from_secs(900),
        max_requests: 10,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: usize },
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Per-address request timestamps for a single policy
pub struct RateLimiter {
    policy: RateLimitPolicy,
    max_tracked_clients: usize,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_capacity(policy, DEFAULT_MAX_TRACKED_CLIENTS)
    }

    pub fn with_capacity(policy: RateLimitPolicy, max_tracked_clients: usize) -> Self {
        Self {
            policy,
            max_tracked_clients,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub async fn check(&self, client: &str) -> RateLimitDecision {
        self.check_at(client, Instant::now()).await
    }

    /// Record a request from `client` at `now` unless it would exceed the
    /// policy. Rejected requests are not recorded.
    pub async fn check_at(&self, client: &str, now: Instant) -> RateLimitDecision {
        let window = self.policy.window;
        let mut buckets = self.buckets.lock().await;

        if !buckets.contains_key(client) && buckets.len() >= self.max_tracked_clients {
            tracing::warn!(
                policy = self.policy.name,
                tracked = buckets.len(),
                "Rate limiter at capacity, rejecting new client"
            );
            return RateLimitDecision::Limited {
                retry_after: window,
            };
        }

        let bucket = buckets.entry(client.to_string()).or_default();
        prune(bucket, now, window);

        if bucket.len() >= self.policy.max_requests {
            let retry_after = bucket
                .front()
                .map(|oldest| (*oldest + window).saturating_duration_since(now))
                .unwrap_or(window);
            return RateLimitDecision::Limited { retry_after };
        }

        bucket.push_back(now);
        RateLimitDecision::Allowed {
            remaining: self.policy.max_requests - bucket.len(),
        }
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    /// Prune every bucket and drop the ones left empty.
    /// Returns how many buckets were removed.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let window = self.policy.window;
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();

        buckets.retain(|_, bucket| {
            prune(bucket, now, window);
            !bucket.is_empty()
        });

        before - buckets.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

/// Remove timestamps older than `now - window`
fn prune(bucket: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = bucket.front() {
        if now.saturating_duration_since(*oldest) >= window {
            bucket.pop_front();
        } else {
            break;
        }
    }
}

/// Extract the client IP from proxy headers (Cloudflare first)
///
/// `x-forwarded-for` is read from the right. Only the last entry was appended
/// by the trusted proxy; anything before it came from the client.
pub fn client_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    let header = |name: &'static str| headers.get(name).and_then(|h| h.to_str().ok());

    header("cf-connecting-ip")
        .or_else(|| header("x-real-ip"))
        .or_else(|| header("x-forwarded-for").and_then(|s| s.rsplit(',').next()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the address a request should be counted against.
///
/// Proxy headers are client-controlled, so they are only honoured when the
/// service is known to sit behind a proxy that sets them.
pub fn client_key(request: &Request<Body>, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(ip) = client_ip_from_headers(request.headers()) {
            return ip;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Middleware state binding one limiter to a route group
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
    trust_proxy_headers: bool,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>, trust_proxy_headers: bool) -> Self {
        Self {
            limiter,
            trust_proxy_headers,
        }
    }
}

/// Reject the request with 429 when the client is over its allowance
pub async fn enforce_rate_limit(
    State(guard): State<RateLimitGuard>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let client = client_key(&request, guard.trust_proxy_headers);

    match guard.limiter.check(&client).await {
        RateLimitDecision::Allowed { .. } => Ok(next.run(request).await),
        RateLimitDecision::Limited { retry_after } => {
            let policy = guard.limiter.policy();
            tracing::warn!(
                ip = %client,
                policy = policy.name,
                path = %request.uri().path(),
                "Rate limit exceeded"
            );
            Err(ApiError::RateLimited {
                retry_after_secs: ceil_secs(retry_after),
            })
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}
