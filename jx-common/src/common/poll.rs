use std::{future::Future, time::Duration};

use tokio::time::{Instant, sleep};
use tracing::warn;

use crate::error::Error;

/// Result of one check of a polled condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollStatus<T> {
    Ready(T),
    Pending,
}

/// Repeats a check every `interval` until it is ready or `timeout` elapses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Poller {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Runs `check` until it returns `PollStatus::Ready`.
    /// ---
    /// An `Err` from `check` stops polling and is returned as is,
    /// so checks decide for themselves which failures are fatal.
    /// When the deadline passes `Error::Timeout` is returned.
    pub async fn poll<T, F, Fut>(&self, description: &str, mut check: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollStatus<T>, Error>>,
    {
        let deadline = Instant::now() + self.timeout;

        loop {
            if let PollStatus::Ready(value) = check().await? {
                return Ok(value);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!(
                    "Timed out waiting for {} after {:?}",
                    description, self.timeout
                )));
            }

            sleep(self.interval.min(deadline - now)).await;
        }
    }
}

/// Exponential backoff for calls that can fail with `Error::TransientApi`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt`, counting from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Calls `op` until it succeeds, fails with a non-retryable error,
/// or `policy.max_attempts` is used up.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let backoff = policy.backoff(attempt);
                warn!(
                    "Retry [{}]: attempt {}/{} failed: {}. Retrying in {:?}",
                    operation, attempt, policy.max_attempts, err, backoff
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_poll_returns_when_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(5));

        let value = poller
            .poll("counter", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(if n >= 3 {
                        PollStatus::Ready(n)
                    } else {
                        PollStatus::Pending
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let poller = Poller::new(Duration::from_millis(5), Duration::from_millis(20));
        let err = poller
            .poll::<(), _, _>("never", || async { Ok(PollStatus::Pending) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_poll_stops_on_error() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(5));
        let err = poller
            .poll::<(), _, _>("broken", || async {
                Err(Error::PromotionFailed("closed".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PromotionFailed(_)));
    }

    #[tokio::test]
    async fn test_retry_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let value = retry_with_backoff(&fast_policy(), "flaky", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::TransientApi("503".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = retry_with_backoff::<(), _, _>(&fast_policy(), "down", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::TransientApi("503".to_string()))
            }
        })
        .await
        .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let _ = retry_with_backoff::<(), _, _>(&fast_policy(), "bad", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Configuration("nope".to_string()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }
}
