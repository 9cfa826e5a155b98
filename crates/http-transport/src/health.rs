//! The shape of `GET /health`'s response, and the trait a host lifecycle
//! implements to supply it.
//!
//! This crate only defines the contract; `trebuchet-host` owns the actual
//! lifecycle state machine and implements [`HealthProvider`] against it.
//! Keeping the trait here (rather than in `trebuchet-host`) lets the
//! gateway build its router without depending on the host crate, which
//! itself depends on this one to serve.

use async_trait::async_trait;
use serde::Serialize;

/// Coarse lifecycle phase of the node serving this gateway.
///
/// Serializes to the `"healthy"|"draining"|"unhealthy"` vocabulary
/// `GET /health` is specified to return, which doesn't match these
/// variant names one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostStatus {
    /// Accepting new invocations and streams normally.
    #[serde(rename = "healthy")]
    Running,
    /// No longer accepting new work; waiting for in-flight work to finish.
    #[serde(rename = "draining")]
    Draining,
    /// Fully shut down.
    #[serde(rename = "unhealthy")]
    Stopped,
}

/// A point-in-time snapshot of the node's health, returned by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Current lifecycle phase.
    pub status: HostStatus,
    /// Invocations currently being dispatched.
    pub inflight_requests: u64,
    /// Streams currently open and publishing.
    pub active_streams: u64,
    /// Seconds since the node started accepting connections.
    pub uptime_secs: u64,
}

/// Supplies the live [`HealthSnapshot`] backing `GET /health`.
#[async_trait]
pub trait HealthProvider: Send + Sync {
    /// Produce a fresh snapshot of the node's current health.
    async fn snapshot(&self) -> HealthSnapshot;
}

/// A provider that always reports [`HostStatus::Running`] with zeroed
/// counters, useful for tests and for gateways run without a host
/// lifecycle attached.
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProvider for AlwaysHealthy {
    async fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: HostStatus::Running,
            inflight_requests: 0,
            active_streams: 0,
            uptime_secs: 0,
        }
    }
}
