//! Retry policy implementation with configurable backoff.
//!
//! This module provides a bounded retry mechanism for handling transient
//! failures of slow external dependencies. The default policy waits a fixed
//! delay between attempts; a multiplier above `1.0` turns it into
//! exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Retryable;
use crate::shutdown::ShutdownSignal;
use crate::PlatformError;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier applied to the delay after every attempt
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
        }
    }
}

impl RetryConfig {
    /// Create a fixed-delay config. The cap is raised to `delay` when it
    /// exceeds the default.
    #[must_use]
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        let config = Self::default();
        let max_delay = config.max_delay.max(delay);
        config
            .with_max_retries(max_retries)
            .with_initial_delay(delay)
            .with_max_delay(max_delay)
    }

    /// Create a new retry config with custom max retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Create a new retry config with custom initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Create a new retry config with custom max delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Create a new retry config with a backoff multiplier (clamped to >= 1.0).
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
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

    /// Calculate the delay for a given attempt number.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay =
            self.config.initial_delay.as_millis() as f64 * self.config.multiplier.powi(exponent);

        let delay_ms = base_delay.min(self.config.max_delay.as_millis() as f64);

        Duration::from_millis(delay_ms as u64)
    }

    /// Check if an error should be retried.
    #[must_use]
    pub fn should_retry<E: Retryable>(&self, error: &E, attempt: u32) -> bool {
        attempt < self.config.max_retries && error.is_retryable()
    }

    /// Execute an async operation with retries.
    ///
    /// The operation runs at most `max_retries + 1` times.
    ///
    /// # Errors
    ///
    /// Returns the last error if all retries are exhausted, or the first
    /// non-retryable error.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + From<PlatformError> + std::fmt::Display,
    {
        self.execute_until(&mut ShutdownSignal::never(), operation)
            .await
    }

    /// Execute an async operation with retries, aborting on shutdown.
    ///
    /// A fired `shutdown` is observed before every attempt and during every
    /// delay; it ends the sequence with [`PlatformError::Cancelled`].
    /// An attempt already in flight is not interrupted.
    ///
    /// # Errors
    ///
    /// Returns the last error if all retries are exhausted, the first
    /// non-retryable error, or a cancellation error.
    pub async fn execute_until<F, Fut, T, E>(
        &self,
        shutdown: &mut ShutdownSignal,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + From<PlatformError> + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            if shutdown.is_shutdown() {
                return Err(PlatformError::cancelled("shutdown before attempt").into());
            }
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !self.should_retry(&error, attempt) {
                        return Err(error);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = shutdown.recv() => {
                            return Err(PlatformError::cancelled("shutdown during retry delay").into());
                        }
                    }
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
    use crate::shutdown::ShutdownTrigger;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::new(RetryConfig::fixed(3, Duration::from_millis(100)));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));
    }

    #[test]
    fn test_fixed_delay_above_default_cap() {
        let policy = RetryPolicy::new(RetryConfig::fixed(2, Duration::from_secs(90)));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(90));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(90));
    }

    #[test]
    fn test_delay_calculation_exponential() {
        let config = RetryConfig::fixed(3, Duration::from_millis(100)).with_multiplier(2.0);
        let policy = RetryPolicy::new(config);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig::fixed(3, Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_millis(150));
        let policy = RetryPolicy::new(config);

        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(150));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::with_defaults();
        let transient = PlatformError::unavailable("busy");

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&PlatformError::invalid_input("test"), 0));
    }

    #[tokio::test]
    async fn test_execute_success() {
        let policy = RetryPolicy::with_defaults();
        let result: Result<i32, PlatformError> = policy.execute(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_execute_non_retryable_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::with_defaults();
        let counter = Arc::clone(&calls);
        let result: Result<i32, PlatformError> = policy
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(PlatformError::invalid_input("bad")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_exhausts_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(RetryConfig::fixed(3, Duration::from_secs(2)));
        let counter = Arc::clone(&calls);
        let started = tokio::time::Instant::now();

        let result: Result<(), PlatformError> = policy
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(PlatformError::unavailable("still locked")) }
            })
            .await;

        assert!(matches!(result, Err(PlatformError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_delay() {
        let (trigger, mut signal) = ShutdownTrigger::new();
        let policy = RetryPolicy::new(RetryConfig::fixed(5, Duration::from_secs(60)));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let handle = tokio::spawn(async move {
            policy
                .execute_until(&mut signal, || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(PlatformError::unavailable("busy")) }
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.trigger();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(PlatformError::Cancelled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
