//! Bounded retry with exponential backoff for transient failures
//!
//! Only errors whose [`Error::is_retryable`] is true are retried, and only
//! within the current tick: timeouts and validation failures surface
//! immediately.

use crate::clock::Clock;
use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for one class of operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given 1-based attempt
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.base_delay.mul_f64(factor.max(1.0));
        delay.min(self.max_delay)
    }
}

/// Run `operation`, retrying retryable errors per `policy`
pub async fn with_retries<T, F, Fut>(
    clock: &Arc<dyn Clock>,
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<Error> = None;

    for attempt in 1..=policy.max_attempts.max(1) {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                last_error = Some(err);
                clock.sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Internal("retry loop exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(VirtualClock::new())
    }

    #[tokio::test]
    async fn returns_first_success() {
        let clock = clock();
        let calls = AtomicU32::new(0);
        let result = with_retries(&clock, &RetryPolicy::default(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(7) }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let raw = Arc::new(VirtualClock::new());
        let clock: Arc<dyn Clock> = raw.clone();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let policy = RetryPolicy::default();
        let attempt = with_retries(&clock, &policy, "op", move || {
            let n = calls_in.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Transient("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        });

        // Drive the virtual clock past both backoff delays while the
        // retry future is pending
        let driver = async {
            for _ in 0..50 {
                raw.advance(Duration::from_millis(500));
                tokio::task::yield_now().await;
            }
        };

        let (result, _) = tokio::join!(attempt, driver);
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let clock = clock();
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(&clock, &RetryPolicy::default(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Timeout("deadline".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(4), Duration::from_millis(300));
    }
}
