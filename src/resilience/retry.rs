//! Bounded-attempt retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::AccountingError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::from_millis(base_backoff_ms),
            max_backoff: Duration::from_secs(30),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_backoff);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64 / 4 + 1);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Runs `operation` until it succeeds, a non-retryable error is returned by
/// it, the policy's attempt bound is reached, or `is_cancelled` reports
/// true at an attempt boundary. `is_retryable` classifies each error.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&AccountingError) -> bool,
    is_cancelled: impl Fn() -> bool,
    mut operation: F,
) -> Result<T, AccountingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AccountingError>>,
{
    let mut attempt = 0u32;
    loop {
        if is_cancelled() {
            return Err(AccountingError::Cancelled);
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 >= policy.max_attempts || !is_retryable(&e) => {
                return Err(AccountingError::RetryExhausted(e.to_string()));
            }
            Err(_) => {
                tokio::time::sleep(policy.backoff_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(5, 1);
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(
            &policy,
            |_| true,
            || false,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AccountingError::StorageError("transient".to_string()))
                } else {
                    Ok(42)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_on_non_retryable_error() {
        let policy = RetryPolicy::new(5, 1);
        let result: Result<(), AccountingError> =
            retry_with_backoff(&policy, |_| false, || false, || async { Err(AccountingError::NotFound) }).await;
        assert!(matches!(result, Err(AccountingError::RetryExhausted(_))));
    }

    #[tokio::test]
    async fn exhausts_attempt_bound() {
        let policy = RetryPolicy::new(2, 1);
        let calls = AtomicU32::new(0);
        let result: Result<(), AccountingError> = retry_with_backoff(
            &policy,
            |_| true,
            || false,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AccountingError::StorageError("down".to_string()))
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let policy = RetryPolicy::new(5, 1);
        let result: Result<(), AccountingError> =
            retry_with_backoff(&policy, |_| true, || true, || async { Ok(()) }).await;
        assert!(matches!(result, Err(AccountingError::Cancelled)));
    }
}
