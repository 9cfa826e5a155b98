//! Per-peer rate limiting: a token bucket smooths bursts, and a sliding
//! window caps the absolute request count over a longer interval so a
//! caller can't sustain a high steady-state rate just by staying under
//! the bucket's burst size.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;

use crate::GatewayState;

/// Tunables for [`RateLimiter`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Token bucket capacity; also the largest burst allowed instantaneously.
    pub burst_capacity: u32,
    /// Tokens restored per second.
    pub refill_per_sec: f64,
    /// Width of the sliding window used for the hard request-count cap.
    pub window: Duration,
    /// Maximum requests allowed within any `window`-wide interval.
    pub window_limit: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            burst_capacity: 20,
            refill_per_sec: 10.0,
            window: Duration::from_secs(60),
            window_limit: 300,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    window_hits: VecDeque<Instant>,
}

/// Keyed token-bucket + sliding-window limiter, one bucket per peer.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<String, Mutex<Bucket>>,
}

impl RateLimiter {
    /// Build a limiter with `config`.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// True if a request from `key` is allowed right now; otherwise it
    /// is counted against neither the bucket nor the window.
    pub fn allow(&self, key: &str) -> bool {
        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: self.config.burst_capacity as f64,
                last_refill: Instant::now(),
                window_hits: VecDeque::new(),
            })
        });
        let mut bucket = entry.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.refill_per_sec)
            .min(self.config.burst_capacity as f64);
        bucket.last_refill = now;

        while bucket
            .window_hits
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.config.window)
        {
            bucket.window_hits.pop_front();
        }

        if bucket.tokens < 1.0 || bucket.window_hits.len() as u32 >= self.config.window_limit {
            return false;
        }

        bucket.tokens -= 1.0;
        bucket.window_hits.push_back(now);
        true
    }
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "rate limit exceeded" })),
    )
        .into_response()
}

/// `axum::middleware::from_fn_with_state` handler enforcing the
/// configured [`RateLimiter`] against the caller's peer address.
///
/// Requires the server to be bound with
/// `axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())`
/// for per-peer keys; otherwise every caller shares one bucket keyed
/// `"unknown"`.
pub async fn rate_limit(State(state): State<Arc<GatewayState>>, request: Request, next: Next) -> Response {
    let key = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if !state.rate_limiter.allow(&key) {
        state.metrics.record_rejection("rate_limit");
        return too_many_requests();
    }

    next.run(request).await
}
