//! Retry policy with exponential backoff.
//!
//! The policy is a pluggable strategy handed to the HTTP-facing parts of the
//! SDK by the host application: [`RetryConfig::none`] disables retries,
//! the default retries transient failures with bounded exponential backoff.

use crate::error::Retryable;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Disable jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Retry policy for executing operations with automatic retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a retry policy with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Create a policy that runs the operation exactly once.
    #[must_use]
    pub fn no_retries() -> Self {
        Self::new(RetryConfig::none())
    }

    /// Calculate the delay for a given attempt number.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay =
            self.config.initial_delay.as_millis() as f64 * self.config.multiplier.powi(exponent);

        let delay_ms = base_delay.min(self.config.max_delay.as_millis() as f64);

        let final_delay = if self.config.jitter {
            // up to 25%
            delay_ms * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Check if an error should be retried.
    #[must_use]
    pub fn should_retry<E: Retryable>(&self, error: &E, attempt: u32) -> bool {
        attempt < self.config.max_retries && error.is_retryable()
    }

    /// Execute an async operation with retries.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last error once all
    /// retries are exhausted.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !self.should_retry(&error, attempt) {
                        return Err(error);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Get the maximum number of retries.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Throttled,
        Rejected,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, Self::Throttled)
        }
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_delay_calculation_no_jitter() {
        let policy = RetryPolicy::new(RetryConfig::default().without_jitter());

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig::default()
            .without_jitter()
            .with_max_delay(Duration::from_millis(150));
        let policy = RetryPolicy::new(config);

        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(150));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::with_defaults();

        assert!(policy.should_retry(&TestError::Throttled, 0));
        assert!(policy.should_retry(&TestError::Throttled, 2));
        assert!(!policy.should_retry(&TestError::Throttled, 3));
        assert!(!policy.should_retry(&TestError::Rejected, 0));
    }

    #[test]
    fn test_no_retries_policy() {
        let policy = RetryPolicy::no_retries();
        assert_eq!(policy.max_retries(), 0);
        assert!(!policy.should_retry(&TestError::Throttled, 0));
    }

    #[tokio::test]
    async fn test_execute_success() {
        let policy = RetryPolicy::with_defaults();
        let result: Result<i32, TestError> = policy.execute(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_execute_retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .without_jitter()
                .with_initial_delay(Duration::from_millis(1)),
        );
        let calls = AtomicU32::new(0);

        let result: Result<u32, TestError> = policy
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError::Throttled)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_non_retryable_error() {
        let policy = RetryPolicy::with_defaults();
        let calls = AtomicU32::new(0);
        let result: Result<i32, TestError> = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Rejected) }
            })
            .await;
        assert_eq!(result.unwrap_err(), TestError::Rejected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
