//! Tunables for the circuit breaker, retry executor, and connection pool.
//! Every field has a documented default matching the reference transport's
//! behavior; nothing is loaded implicitly from the environment or a file.

/// Configures a [`crate::circuit_breaker::CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive successes in `HalfOpen` before the circuit closes.
    pub success_threshold: u32,
    /// How long the circuit stays open before allowing a trial request.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Configures a [`crate::retry::RetryExecutor`].
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Number of retries attempted after the first failure (so the
    /// operation runs at most `max_retries + 1` times).
    pub max_retries: u32,
    /// Base delay for exponential backoff; attempt `n` waits roughly
    /// `backoff_ms * 2^(n-1)`, jittered by ±25%.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 200,
        }
    }
}

/// Configures the per-endpoint connection pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// An idle pooled connection older than this is closed and evicted.
    pub idle_timeout: std::time::Duration,
    /// A write that doesn't complete within this bound fails the
    /// connection with [`crate::Error::Timeout`] and evicts it from the
    /// pool rather than blocking the caller indefinitely.
    pub write_timeout: std::time::Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: std::time::Duration::from_secs(300),
            write_timeout: std::time::Duration::from_secs(30),
        }
    }
}
