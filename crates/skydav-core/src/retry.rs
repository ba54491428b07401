//! Retry helpers for upstream calls.
//!
//! Two loops recur in every backend:
//!
//! - [`poll_until`] keeps polling a long-running server operation until its
//!   status says it is done, bounded by an overall time budget.
//! - [`RetryPolicy::run`] re-drives an idempotent call that failed with a
//!   transient error, bounded by an attempt count.

use crate::config::RetryConfig;
use crate::error::{CloudError, CloudResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Poll `attempt` until `should_retry` rejects its result or time runs out.
///
/// Each round sleeps `pre_delay()` first. After a result that should be
/// retried, the loop sleeps `poll_interval` and goes again, unless
/// `overall_timeout` has elapsed, in which case the last result is returned.
/// An error from `attempt` is returned immediately.
pub async fn poll_until<T, E, P, A, Fut, S>(
    mut pre_delay: P,
    mut attempt: A,
    mut should_retry: S,
    poll_interval: Duration,
    overall_timeout: Duration,
) -> Result<T, E>
where
    P: FnMut() -> Duration,
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: FnMut(&T) -> bool,
{
    let started = Instant::now();
    let mut rounds = 0u32;
    loop {
        let delay = pre_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = attempt().await?;
        rounds += 1;
        if !should_retry(&result) {
            return Ok(result);
        }
        if started.elapsed() >= overall_timeout {
            debug!(rounds, ?overall_timeout, "Polling budget exhausted");
            return Ok(result);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Count-bounded retry of transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub max_retries: usize,
    /// Sleep between attempts.
    pub retry_delay: Duration,
    /// Budget of a single attempt. Zero disables the per-attempt timeout.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            call_timeout: config.call_timeout,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::ZERO,
            call_timeout: Duration::ZERO,
        }
    }

    /// Retry `attempt` while it fails with a transient error.
    ///
    /// `attempt` receives the zero-based attempt number. The last error is
    /// returned once attempts run out.
    pub async fn run<T, A, Fut>(&self, attempt: A) -> CloudResult<T>
    where
        A: FnMut(usize) -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        self.run_if(attempt, CloudError::is_transient).await
    }

    /// Retry `attempt` while it fails with an error accepted by `retryable`.
    pub async fn run_if<T, A, Fut, R>(&self, mut attempt: A, retryable: R) -> CloudResult<T>
    where
        A: FnMut(usize) -> Fut,
        Fut: Future<Output = CloudResult<T>>,
        R: Fn(&CloudError) -> bool,
    {
        let mut n = 0;
        loop {
            let result = if self.call_timeout.is_zero() {
                attempt(n).await
            } else {
                match tokio::time::timeout(self.call_timeout, attempt(n)).await {
                    Ok(result) => result,
                    Err(_) => Err(CloudError::Timeout(self.call_timeout)),
                }
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if n < self.max_retries && retryable(&e) => {
                    debug!(attempt = n, error = %e, "Retrying upstream call");
                    n += 1;
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_completes() {
        let polls = AtomicUsize::new(0);
        let status = poll_until(
            || Duration::ZERO,
            || async {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CloudError>(if n >= 2 { "COMPLETED" } else { "RUNNING" })
            },
            |s| *s != "COMPLETED",
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert_eq!(status, "COMPLETED");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_returns_last_result_on_timeout() {
        let started = Instant::now();
        let status = poll_until(
            || Duration::ZERO,
            || async { Ok::<_, CloudError>("RUNNING") },
            |_| true,
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(status, "RUNNING");
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_propagates_error() {
        let err = poll_until(
            || Duration::from_millis(10),
            || async { Err::<&str, _>(CloudError::status(403, "denied")) },
            |_| true,
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            call_timeout: Duration::from_secs(1),
        };

        let value = policy
            .run(|n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CloudError::status(404, "shard miss"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            retry_delay: Duration::ZERO,
            call_timeout: Duration::ZERO,
        };

        let err = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CloudError::status(503, "busy")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::Upstream { status: Some(503), .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_does_not_retry_permanent_errors() {
        let calls = AtomicUsize::new(0);
        let err = RetryPolicy::default()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CloudError::status(403, "forbidden")) }
            })
            .await
            .unwrap_err();

        assert!(!err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out_attempts() {
        let policy = RetryPolicy {
            max_retries: 1,
            retry_delay: Duration::ZERO,
            call_timeout: Duration::from_millis(50),
        };
        let err = policy
            .run(|_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Timeout(d) if d == Duration::from_millis(50)));
    }
}
