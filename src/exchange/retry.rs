//! Bounded fixed-delay retry for gateway calls.

use super::error::GatewayError;
use super::traits::GatewayResult;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retries transient gateway failures a bounded number of times.
///
/// Only errors for which [`GatewayError::is_transient`] holds are retried.
/// Everything else (rate limits, missing orders, validation rejects) is
/// returned on the first occurrence. The policy carries no state beyond its
/// parameters, so one instance can be shared across every call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Invoke `call`, retrying on transient failure.
    ///
    /// On exhaustion returns [`GatewayError::RetriesExhausted`] carrying
    /// `operation` and the last transient error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Transient gateway error"
                    );
                    if attempt >= self.max_attempts {
                        return Err(GatewayError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
