//! Transport rate limiting middleware
//!
//! Per-IP token-bucket limiting in front of the anonymous endpoints (login,
//! verify, exchange) to blunt brute-force attempts. This is separate from the
//! per-key minute/daily counters enforced during verification: this layer
//! throttles callers by source address before any key is even looked at.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained requests per second
    pub requests_per_second: u32,
    /// Burst capacity (maximum requests allowed at once)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 30,
        }
    }
}

/// Stricter limit for login attempts
pub fn auth_rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        requests_per_second: 1,
        burst_size: 5,
    }
}

/// Limit for the anonymous verify/exchange endpoints, which gateways call on
/// every fronted request
pub fn exchange_rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        requests_per_second: 50,
        burst_size: 100,
    }
}

/// Per-IP rate limiter using governor
pub type IpRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Thread-safe map of IP addresses to their rate limiters
#[derive(Clone)]
pub struct RateLimitState {
    limiters: Arc<RwLock<HashMap<IpAddr, Arc<IpRateLimiter>>>>,
    config: RateLimitConfig,
}

impl RateLimitState {
    /// Create a new rate limit state with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limiters: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Get or create a rate limiter for the given IP address
    async fn get_limiter(&self, ip: IpAddr) -> Arc<IpRateLimiter> {
        // Try to get existing limiter with read lock first
        {
            let limiters = self.limiters.read().await;
            if let Some(limiter) = limiters.get(&ip) {
                return limiter.clone();
            }
        }

        let mut limiters = self.limiters.write().await;

        // Double-check after acquiring write lock
        if let Some(limiter) = limiters.get(&ip) {
            return limiter.clone();
        }

        let quota = Quota::per_second(
            NonZeroU32::new(self.config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(self.config.burst_size).unwrap_or(NonZeroU32::MIN));

        let limiter = Arc::new(RateLimiter::direct(quota));
        limiters.insert(ip, limiter.clone());
        limiter
    }

    /// Bound the number of tracked IPs; called periodically
    pub async fn cleanup(&self) {
        let mut limiters = self.limiters.write().await;
        let initial_count = limiters.len();

        const MAX_TRACKED_IPS: usize = 10000;

        if limiters.len() > MAX_TRACKED_IPS {
            let to_remove: Vec<_> = limiters.keys().take(limiters.len() / 2).cloned().collect();

            for ip in to_remove {
                limiters.remove(&ip);
            }

            debug!(
                "Rate limiter cleanup: {} -> {} entries",
                initial_count,
                limiters.len()
            );
        }
    }
}

/// Resolve the caller's IP, honoring proxy headers
///
/// Precedence: first address in `X-Forwarded-For`, then `X-Real-IP`, then the
/// socket peer address.
pub fn client_ip(headers: &HeaderMap, remote: IpAddr) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse::<IpAddr>() {
            return ip;
        }
    }

    remote
}

/// Rate limiting middleware for Axum
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), addr.ip());
    let limiter = rate_limit.get_limiter(ip).await;

    match limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, path = %request.uri().path(), "Transport rate limit exceeded");
            RateLimitExceeded {
                limit: rate_limit.config.burst_size,
            }
            .into_response()
        }
    }
}

/// Rate limit exceeded response
pub struct RateLimitExceeded {
    pub limit: u32,
}

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            [
                ("Retry-After", "1".to_string()),
                ("X-RateLimit-Limit", self.limit.to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
                ("X-RateLimit-Reset", "1".to_string()),
            ],
            "Too many requests. Please try again later.",
        )
            .into_response()
    }
}

/// Spawn a background task to periodically clean up rate limiters
pub fn spawn_rate_limit_cleanup(state: RateLimitState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600)); // Every hour
        loop {
            interval.tick().await;
            state.cleanup().await;
        }
    });
}
