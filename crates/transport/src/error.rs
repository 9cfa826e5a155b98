//! Errors produced by the framed socket transport, connection pool,
//! circuit breaker, and retry executor.

/// Errors this crate's operations can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O failure establishing or using a connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Wire(#[from] trebuchet_wire::Error),

    /// The peer closed the connection; distinct from a transient failure
    /// so callers can drop routing state instead of retrying.
    #[error("connection to {endpoint} closed")]
    ConnectionClosed {
        /// Endpoint whose connection closed.
        endpoint: String,
    },

    /// Connecting to `endpoint`, or writing to it, failed.
    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed {
        /// Endpoint that failed.
        endpoint: String,
        /// Human-readable cause.
        reason: String,
    },

    /// An operation against `endpoint` exceeded its configured timeout.
    #[error("operation against {endpoint} timed out after {after_ms}ms")]
    Timeout {
        /// Endpoint the operation targeted.
        endpoint: String,
        /// Configured timeout that was exceeded.
        after_ms: u64,
    },

    /// The circuit breaker for `endpoint` is open; the request was
    /// rejected without attempting the operation.
    #[error("circuit open for {endpoint}: {reason}")]
    CircuitBreakerOpen {
        /// Endpoint whose circuit is open.
        endpoint: String,
        /// Why it's open / when it will next half-open.
        reason: String,
    },

    /// Catch-all for transport-level failures not covered above.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
