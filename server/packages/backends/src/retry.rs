use std::future::Future;
use std::time::Duration;

use crate::BackendError;

/// Exponential backoff for transient upstream failures (429/503).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Runs `op`, retrying retriable failures with doubling delays until
    /// the attempt budget is spent. The last error is returned as-is.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Err(e) if attempt < self.attempts && e.is_retriable() => {
                    tracing::debug!(
                        "Retriable backend error (attempt {}/{}): {}",
                        attempt,
                        self.attempts,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_delay);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn retries_rate_limits_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(5)
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BackendError::RateLimited {
                        message: "slow down".to_string(),
                    })
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::Unavailable {
                    message: "overloaded".to_string(),
                })
            })
            .await;
        assert!(matches!(result, Err(BackendError::Unavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::Auth {
                    message: "bad key".to_string(),
                })
            })
            .await;
        assert!(matches!(result, Err(BackendError::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
