//! Circuit breaker pattern for remote endpoint protection.
//!
//! Prevents cascading failures by stopping requests to an endpoint once
//! it has failed repeatedly, instead of letting every caller queue up
//! behind a connection that keeps timing out.
//!
//! # States
//!
//! - **Closed**: normal operation, requests allowed.
//! - **Open**: too many failures, requests rejected immediately.
//! - **HalfOpen**: testing recovery, limited requests allowed.
//!
//! ```text
//! Closed ──(failures >= threshold)──> Open
//!   ↑                                   │
//!   │                            (reset_timeout)
//!   │                                   ▼
//!   └──(successes >= threshold)── HalfOpen
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::CircuitBreakerConfig;
use crate::{Error, Result};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; requests allowed.
    Closed,
    /// Too many failures; requests rejected.
    Open,
    /// Testing recovery; limited requests allowed.
    HalfOpen,
}

/// Thread-safe circuit breaker tracking one endpoint's health.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitBreakerState>>,
    endpoint: String,
}

#[derive(Debug, Clone)]
struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
}

impl CircuitBreaker {
    /// Build a breaker for `endpoint` with the given configuration.
    pub fn new(endpoint: String, config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(CircuitBreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_time: None,
                last_state_change: Instant::now(),
            })),
            endpoint,
        }
    }

    /// Run `operation` under the breaker: rejected outright while open,
    /// otherwise executed and used to update the breaker's state.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.check_and_maybe_transition().await?;

        match operation().await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(e) => {
                self.on_failure().await;
                Err(e)
            }
        }
    }

    async fn check_and_maybe_transition(&self) -> Result<()> {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                if let Some(last_failure) = state.last_failure_time {
                    let elapsed = last_failure.elapsed();
                    if elapsed >= Duration::from_millis(self.config.reset_timeout_ms) {
                        debug!(
                            endpoint = %self.endpoint,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "circuit transitioning to half-open"
                        );
                        state.state = CircuitState::HalfOpen;
                        state.consecutive_successes = 0;
                        state.last_state_change = Instant::now();
                        Ok(())
                    } else {
                        let remaining = self
                            .config
                            .reset_timeout_ms
                            .saturating_sub(state.last_state_change.elapsed().as_millis() as u64);
                        Err(Error::CircuitBreakerOpen {
                            endpoint: self.endpoint.clone(),
                            reason: format!("reset in {remaining}ms"),
                        })
                    }
                } else {
                    warn!(endpoint = %self.endpoint, "open circuit with no recorded failure; resetting to closed");
                    state.state = CircuitState::Closed;
                    Ok(())
                }
            }
            CircuitState::HalfOpen => Ok(()),
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;

        state.consecutive_failures = 0;
        state.consecutive_successes += 1;

        if state.state == CircuitState::HalfOpen
            && state.consecutive_successes >= self.config.success_threshold
        {
            debug!(endpoint = %self.endpoint, "circuit closing after recovery");
            state.state = CircuitState::Closed;
            state.consecutive_successes = 0;
            state.last_state_change = Instant::now();
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;

        state.consecutive_successes = 0;
        state.consecutive_failures += 1;
        state.last_failure_time = Some(Instant::now());

        if state.state != CircuitState::Open
            && state.consecutive_failures >= self.config.failure_threshold
        {
            warn!(
                endpoint = %self.endpoint,
                failures = state.consecutive_failures,
                "circuit opening"
            );
            state.state = CircuitState::Open;
            state.last_state_change = Instant::now();
        }
    }

    /// Current state, mostly useful for health reporting and tests.
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    /// Force the breaker back to `Closed`, discarding failure history.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.last_failure_time = None;
        state.last_state_change = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> Error {
        Error::ConnectionFailed {
            endpoint: "test-endpoint".into(),
            reason: "synthetic failure".into(),
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout_ms: 1000,
        };
        let cb = CircuitBreaker::new("test-endpoint".to_string(), config);

        for i in 0..3 {
            let result = cb.execute(|| async { Err::<(), _>(failure()) }).await;
            assert!(result.is_err());
            if i < 2 {
                assert_eq!(cb.state().await, CircuitState::Closed);
            } else {
                assert_eq!(cb.state().await, CircuitState::Open);
            }
        }
    }

    #[tokio::test]
    async fn rejects_requests_immediately_while_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout_ms: 5000,
        };
        let cb = CircuitBreaker::new("test-endpoint".to_string(), config);

        let _ = cb.execute(|| async { Err::<(), _>(failure()) }).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        let result = cb.execute(|| async { Ok::<(), Error>(()) }).await;
        assert!(matches!(result, Err(Error::CircuitBreakerOpen { .. })));
    }

    #[tokio::test]
    async fn closes_after_success_threshold_in_half_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout_ms: 10,
        };
        let cb = CircuitBreaker::new("test-endpoint".to_string(), config);

        let _ = cb.execute(|| async { Err::<(), _>(failure()) }).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(15)).await;

        let _ = cb.execute(|| async { Ok::<(), Error>(()) }).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        let _ = cb.execute(|| async { Ok::<(), Error>(()) }).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }
}
