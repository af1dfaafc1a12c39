// src/retry/strategy.rs

use crate::config::LoadBalancerConfig;
use crate::proxy::ProxyError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Caller-side retry with exponential backoff and jitter.
///
/// `Proxy::dispatch` reports failures without retrying; callers that can
/// replay a request wrap it in this strategy, driven by `max_retries` and
/// `retry_delay_ms`.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

impl RetryStrategy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// `max_retries` retries on top of the first attempt, backoff capped at
    /// thirty times the configured delay.
    pub fn from_config(config: &LoadBalancerConfig) -> Self {
        let base = config.retry_delay();
        Self::new(config.max_retries.saturating_add(1), base, base.saturating_mul(30))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Execute a function with retry logic
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_with_decision(f, |_| RetryDecision::Retry).await
    }

    /// Execute with custom retry decision logic
    pub async fn execute_with_decision<F, Fut, T, E>(
        &self,
        mut f: F,
        should_retry: impl Fn(&E) -> RetryDecision,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match f().await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };

            if should_retry(&error) == RetryDecision::NoRetry {
                debug!("Error is non-retryable: {}", error);
                return Err(error);
            }

            if attempt >= self.max_attempts {
                warn!("Retry failed after {} attempts: {}", attempt, error);
                return Err(error);
            }

            let backoff = self.calculate_backoff(attempt);
            debug!(
                "Attempt {} failed: {}. Retrying in {:?}",
                attempt, error, backoff
            );
            sleep(backoff).await;
        }
    }

    /// Retries dispatch failures that another attempt could plausibly fix.
    pub async fn execute_dispatch<F, Fut, T>(&self, f: F) -> Result<T, ProxyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProxyError>>,
    {
        self.execute_with_decision(f, Self::is_retryable).await
    }

    /// Exponential backoff (`base * 2^(attempt - 1)`, capped) plus up to 25% jitter.
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;

        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(max);
        let jitter = (capped as f64 * rand::random::<f64>() * 0.25) as u64;

        Duration::from_millis(capped + jitter)
    }

    pub fn is_retryable(error: &ProxyError) -> RetryDecision {
        match error {
            ProxyError::NoHealthyBackends
            | ProxyError::Timeout
            | ProxyError::BackendError(_) => RetryDecision::Retry,
            ProxyError::InvalidBackendUrl { .. }
            | ProxyError::BackendNotFound(_)
            | ProxyError::InvalidConfig(_)
            | ProxyError::ClientInit(_) => RetryDecision::NoRetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn strategy(max_attempts: u32) -> RetryStrategy {
        RetryStrategy::new(max_attempts, Duration::from_millis(5), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = AtomicU32::new(0);

        let result = strategy(3)
            .execute(|| async {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err("Temporary failure")
                } else {
                    Ok("Success")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "Success");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_max_attempts() {
        let counter = AtomicU32::new(0);

        let result: Result<(), &str> = strategy(2)
            .execute(|| async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("Always fails")
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispatch_errors_respect_retryability() {
        let counter = AtomicU32::new(0);

        let result: Result<(), ProxyError> = strategy(4)
            .execute_dispatch(|| async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProxyError::BackendNotFound("b1".to_string()))
            })
            .await;
        assert!(matches!(result, Err(ProxyError::BackendNotFound(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        counter.store(0, Ordering::SeqCst);
        let result: Result<(), ProxyError> = strategy(4)
            .execute_dispatch(|| async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProxyError::NoHealthyBackends)
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_from_config_counts_first_attempt() {
        let config = LoadBalancerConfig {
            max_retries: 3,
            retry_delay_ms: 100,
            ..LoadBalancerConfig::default()
        };
        let strategy = RetryStrategy::from_config(&config);

        assert_eq!(strategy.max_attempts(), 4);
        let first = strategy.calculate_backoff(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let capped = strategy.calculate_backoff(20);
        assert!(capped >= Duration::from_secs(3) && capped <= Duration::from_millis(3750));
    }
}
