//! Retry of transient KMS failures.

use std::future::Future;
use std::time::Duration;

use envelope::EnvelopeError;
use tracing::warn;

/// Upper bound on the backoff doubling.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Bounded exponential backoff for [`EnvelopeError::KmsUnavailable`].
///
/// Every other error kind is returned on the first attempt: retrying an
/// integrity or authorisation failure cannot change its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each one after.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1 << shift)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts are exhausted.
    ///
    /// Each attempt calls `op` afresh, so a retried seal draws a new DEK and
    /// nonce.
    pub async fn run<T, F, Fut>(&self, name: &'static str, mut op: F) -> Result<T, EnvelopeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EnvelopeError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        op = name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "KMS unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
        assert_eq!(p.delay_after(100), Duration::from_millis(100 * 1024));
    }

    #[tokio::test]
    async fn retries_unavailable_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out = fast(3)
            .run("seal", || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(EnvelopeError::KmsUnavailable("503".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = fast(2)
            .run("open", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(EnvelopeError::KmsUnavailable("timeout".into()))
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        for err in [
            EnvelopeError::KmsAccessDenied("denied".into()),
            EnvelopeError::MalformedEnvelope("short".into()),
        ] {
            let calls = AtomicU32::new(0);
            let mut pending = Some(err);
            let result = fast(5)
                .run("open", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let e = pending.take();
                    async move { Err::<(), _>(e.unwrap_or(EnvelopeError::Internal("again".into()))) }
                })
                .await;
            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
