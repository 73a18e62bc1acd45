//! Bounded fixed-delay retry shared by every call into an external collaborator.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Attempt budget and delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay between consecutive attempts in milliseconds
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self { max_attempts, delay_ms }
    }

    /// A policy that never waits.
    #[cfg(test)]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn backoff(&self) -> FixedBackoff {
        FixedBackoff::new(self.attempts(), self.delay())
    }
}

/// Constant delay that gives up after a fixed number of attempts.
#[derive(Debug, Clone)]
struct FixedBackoff {
    max_attempts: u32,
    delay: Duration,
    retries_left: u32,
}

impl FixedBackoff {
    fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            retries_left: max_attempts.saturating_sub(1),
        }
    }
}

impl Backoff for FixedBackoff {
    fn reset(&mut self) {
        self.retries_left = self.max_attempts.saturating_sub(1);
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries_left == 0 {
            return None;
        }
        self.retries_left -= 1;
        Some(self.delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. The last error is returned on exhaustion.
pub async fn retry<T, E, Op, Fut, R>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: R,
    mut op: Op,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: fmt::Display,
{
    let classify = &is_retryable;
    let max_attempts = policy.attempts();
    let mut attempt = 1u32;

    backoff::future::retry_notify(
        policy.backoff(),
        move || {
            let fut = op();
            async move {
                fut.await.map_err(|e| {
                    if classify(&e) {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        },
        |err: E, wait: Duration| {
            warn!(
                operation = operation,
                attempt = attempt,
                max_attempts = max_attempts,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            attempt += 1;
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fixed_backoff_budget() {
        let mut backoff = FixedBackoff::new(3, Duration::from_millis(5));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_backoff(), None);

        backoff.reset();
        assert!(backoff.next_backoff().is_some());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, GatewayError> = retry(
            &RetryPolicy::immediate(3),
            "test",
            GatewayError::is_retryable,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(GatewayError::Transient("flaky".into()))
                } else {
                    Ok(n)
                }
            },
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), GatewayError> = retry(
            &RetryPolicy::immediate(5),
            "test",
            GatewayError::is_retryable,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Rejected("no margin".into()))
            },
        )
        .await;

        assert_eq!(result, Err(GatewayError::Rejected("no margin".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), GatewayError> = retry(
            &RetryPolicy::immediate(3),
            "test",
            GatewayError::is_retryable,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(GatewayError::Transient(format!("attempt {}", n)))
            },
        )
        .await;

        assert_eq!(result, Err(GatewayError::Transient("attempt 3".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
