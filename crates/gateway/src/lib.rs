//! The cloud gateway middleware pipeline sitting in front of the HTTP
//! reference transport: request validation, rate limiting, JWT
//! authentication, RBAC authorization, and request tracing, run in that
//! fixed order ahead of actor dispatch.

mod error;
pub mod metrics;
pub mod middleware;
mod pipeline;

pub use error::{Error, Result};
pub use metrics::GatewayMetrics;
pub use middleware::auth::{AuthConfig, AuthenticatedUser, Claims, VerificationKey};
pub use middleware::authz::{AuthzConfig, Policy};
pub use middleware::rate_limit::{RateLimiter, RateLimiterConfig};
pub use pipeline::build as build_router;

use std::sync::Arc;

/// Everything the middleware pipeline needs, shared behind one `Arc`
/// across every stage.
pub struct GatewayState {
    auth: AuthConfig,
    authz: AuthzConfig,
    rate_limiter: RateLimiter,
    metrics: GatewayMetrics,
}

impl GatewayState {
    /// Assemble the state backing [`build_router`].
    pub fn new(auth: AuthConfig, authz: AuthzConfig, rate_limiter: RateLimiter) -> Arc<Self> {
        Arc::new(Self {
            auth,
            authz,
            rate_limiter,
            metrics: GatewayMetrics::new(),
        })
    }

    /// The metrics registry backing this gateway's `/metrics` endpoint.
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }
}
