//! Retry with exponential backoff and jitter, for transient failures that
//! a [`crate::circuit_breaker::CircuitBreaker`] hasn't (yet) judged the
//! endpoint unhealthy over.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::Result;

/// Retries a fallible async operation with exponential backoff.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Build an executor from `config`.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, retrying on failure up to `max_retries` times with
    /// exponential backoff (base `backoff_ms`, jittered by ±25%).
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        let max_attempts = self.config.max_retries + 1;

        loop {
            attempts += 1;

            match operation().await {
                Ok(result) => {
                    if attempts > 1 {
                        debug!(attempts, "operation succeeded after retrying");
                    }
                    return Ok(result);
                }
                Err(e) if attempts < max_attempts => {
                    let backoff = self.config.backoff_ms * 2_u64.pow(attempts - 1);
                    let jitter_range = (backoff / 4) as i64;
                    let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range as f64;
                    let backoff_with_jitter = ((backoff as i64) + jitter as i64).max(0) as u64;

                    warn!(
                        attempt = attempts,
                        max_attempts, %e, retry_in_ms = backoff_with_jitter,
                        "operation failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_with_jitter)).await;
                }
                Err(e) => {
                    warn!(attempts, %e, "operation failed; retries exhausted");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient() -> Error {
        Error::Transport("transient failure".to_string())
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt() {
        let config = RetryConfig {
            max_retries: 3,
            backoff_ms: 10,
        };
        let executor = RetryExecutor::new(config);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = executor
            .execute(|| async {
                let n = attempts_clone.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_configured_retries() {
        let config = RetryConfig {
            max_retries: 2,
            backoff_ms: 10,
        };
        let executor = RetryExecutor::new(config);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = executor
            .execute(|| async {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
