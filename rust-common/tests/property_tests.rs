//! Property-based tests for rust-common crate.
//!
//! These tests verify universal properties across all inputs using proptest.

use proptest::prelude::*;
use rust_common::{PlatformError, RetryConfig, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_retryable_errors_are_consistent(
        msg in "[a-zA-Z0-9 ]{1,50}",
        secs in 1u64..600,
    ) {
        let retryable_errors = vec![
            PlatformError::unavailable(msg.clone()),
            PlatformError::timeout(msg.clone(), Duration::from_secs(secs)),
        ];

        for err in retryable_errors {
            prop_assert!(err.is_retryable(), "Error {:?} should be retryable", err);
        }

        let non_retryable_errors = vec![
            PlatformError::invalid_input(msg.clone()),
            PlatformError::cancelled(msg.clone()),
            PlatformError::Internal(msg.clone()),
        ];

        for err in non_retryable_errors {
            prop_assert!(!err.is_retryable(), "Error {:?} should not be retryable", err);
        }
    }

    /// A fixed-delay policy never grows its delay.
    #[test]
    fn prop_fixed_delay_is_constant(
        delay_ms in 1u64..10_000,
        attempt in 0u32..32,
    ) {
        let policy = RetryPolicy::new(RetryConfig::fixed(3, Duration::from_millis(delay_ms)));
        prop_assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(delay_ms));
    }

    /// With N leading failures and R allowed retries the operation runs
    /// min(N, R) + 1 times.
    #[test]
    fn prop_attempt_count_is_bounded(
        max_retries in 0u32..6,
        failures in 0u32..10,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        rt.block_on(async {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&calls);
            let policy = RetryPolicy::new(RetryConfig::fixed(max_retries, Duration::from_secs(2)));

            let result: Result<u32, PlatformError> = policy
                .execute(|| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n <= failures {
                            Err(PlatformError::unavailable("transient"))
                        } else {
                            Ok(n)
                        }
                    }
                })
                .await;

            let expected_calls = failures.min(max_retries) + 1;
            prop_assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
            prop_assert_eq!(result.is_ok(), failures <= max_retries);

            Ok(())
        })?;
    }
}
