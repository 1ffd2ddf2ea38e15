//! Retry with exponential backoff and jitter for recoverable backend errors.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::Error;

/// Errors that know whether a retry can help.
pub trait Retryable {
    fn is_recoverable(&self) -> bool;
}

impl Retryable for Error {
    fn is_recoverable(&self) -> bool {
        self.is_recoverable()
    }
}

/// Counters for retry outcomes.
#[derive(Debug, Default)]
pub struct RetryMetrics {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
}

impl RetryMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_retry(&self, succeeded: bool) {
        self.total.fetch_add(1, Ordering::SeqCst);
        if succeeded {
            self.success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failure.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failure.load(Ordering::SeqCst)
    }
}

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

/// Retry policy over recoverable errors.
#[derive(Debug, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
    metrics: Option<RetryMetrics>,
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: RetryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exp_delay = self.config.base_delay * (2u32.pow(attempt.saturating_sub(1)));
        let delay = std::cmp::min(exp_delay, self.config.max_delay);

        if self.config.jitter_factor > 0.0 {
            let jitter_range = delay.as_millis() as f64 * self.config.jitter_factor;
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
            let adjusted_ms = (delay.as_millis() as f64 + jitter).max(0.0);
            Duration::from_millis(adjusted_ms as u64)
        } else {
            delay
        }
    }

    fn record(&self, attempt: u32, succeeded: bool) {
        if attempt > 0 {
            if let Some(ref metrics) = self.metrics {
                metrics.record_retry(succeeded);
            }
        }
    }

    /// Run `operation` until it succeeds, the error is unrecoverable, or the
    /// retry budget is spent.
    ///
    /// # Errors
    ///
    /// Returns the last error seen.
    pub async fn execute<F, T, E, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Debug,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    self.record(attempt, true);
                    return Ok(result);
                }
                Err(e) => {
                    if !e.is_recoverable() || attempt >= self.config.max_retries {
                        self.record(attempt, false);
                        return Err(e);
                    }

                    attempt += 1;
                    let delay = self.calculate_delay(attempt);
                    warn!(
                        "Retry attempt {}/{} failed: {:?}, retrying in {:?}",
                        attempt, self.config.max_retries, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::with_config(RetryConfig {
            base_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        });

        let counter = Arc::clone(&attempts);
        let result: Result<u32, Error> = policy
            .execute(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Connection("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unrecoverable_errors_fail_fast() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new();

        let counter = Arc::clone(&attempts);
        let result: Result<(), Error> = policy
            .execute(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Data("invalid".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
