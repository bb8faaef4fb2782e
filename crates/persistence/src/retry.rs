//! Generic retry policy for store operations.

use std::future::Future;
use std::time::Duration;

use crate::PersistenceError;

/// Retry policy value: how many attempts, how long between them, and which
/// errors are worth another try.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Run `op` until it succeeds, the classifier rejects the error, or
    /// attempts are exhausted. The closure receives the 1-based attempt
    /// number.
    pub async fn run<T, F, Fut, C>(
        &self,
        mut op: F,
        is_retryable: C,
    ) -> Result<T, PersistenceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
        C: Fn(&PersistenceError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && is_retryable(&err) => {
                    tracing::warn!(attempt, error = %err, "store operation failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let result = policy
            .run(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(PersistenceError::Transient("blip".to_string()))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(PersistenceError::Transient("down".to_string())) }
                },
                |_| true,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(PersistenceError::InvalidArgument("bad".to_string())) }
                },
                |err| err.is_retryable(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
