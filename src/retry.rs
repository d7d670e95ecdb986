//! Retry and backoff utilities shared by downloads and provider calls.
//!
//! A [`RetryPolicy`] carries the attempt budget and backoff shape; the caller
//! supplies the retryable predicate per call site.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, Result};

/// Default number of attempts for downloads (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Base delay for exponential backoff (2 seconds).
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Maximum delay cap for exponential backoff (30 seconds).
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Determine if a reqwest error is a transient network error that should be retried.
///
/// Returns true for connection errors, timeouts, and failures during body transfer.
pub fn is_transient_network_error(error: &reqwest::Error) -> bool {
    if error.is_connect() || error.is_timeout() || error.is_body() || error.is_request() {
        return true;
    }

    if let Some(status) = error.status() {
        return crate::error::is_transient_status(status.as_u16());
    }

    false
}

/// Calculate exponential backoff delay with jitter.
///
/// Uses the formula: min(base * 2^attempt + jitter, max_delay)
/// where jitter is half the base, capped at 500ms.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_ms = (base.as_millis() as u64).min(1000);
    let jitter = Duration::from_millis(jitter_ms / 2);
    exponential.saturating_add(jitter).min(max)
}

/// Attempt budget and backoff shape for one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Add a small fixed jitter on top of the exponential delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BACKOFF_BASE,
            max_delay: DEFAULT_BACKOFF_MAX,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.jitter {
            calculate_backoff(attempt, self.base_delay, self.max_delay)
        } else {
            self.base_delay
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(self.max_delay)
        }
    }

    /// Run `operation` until it succeeds, returns an error `retryable` rejects,
    /// or the attempt budget is spent. The last error is returned unchanged.
    ///
    /// Sleeps between attempts observe `cancel`.
    pub async fn run<T, F, Fut, P>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        retryable: P,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&ProviderError) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        label,
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if retryable(&e) {
                        log::error!("{} failed after {} attempts. Giving up.", label, attempt + 1);
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[test]
    fn test_calculate_backoff_first_attempt() {
        let delay = calculate_backoff(0, Duration::from_secs(1), Duration::from_secs(60));
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_millis(1500));
    }

    #[test]
    fn test_calculate_backoff_grows() {
        let base = DEFAULT_BACKOFF_BASE;
        let max = DEFAULT_BACKOFF_MAX;
        assert!(calculate_backoff(1, base, max) > calculate_backoff(0, base, max));
        assert!(calculate_backoff(2, base, max) > calculate_backoff(1, base, max));
    }

    #[test]
    fn test_calculate_backoff_respects_max() {
        let delay = calculate_backoff(10, Duration::from_secs(1), Duration::from_secs(60));
        assert!(delay <= Duration::from_secs(60));
    }

    #[test]
    fn test_delay_without_jitter_is_exact() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(6), DEFAULT_BACKOFF_MAX);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_run_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = fast_policy(4)
            .run("test", &cancel, ProviderError::is_retryable, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::transient(Some(503), "busy"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = fast_policy(4)
            .run("test", &cancel, ProviderError::is_retryable, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::permanent(Some(400), "bad")) }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = fast_policy(3)
            .run("test", &cancel, ProviderError::is_retryable, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(ProviderError::transient(
                        Some(500 + attempt as u16),
                        "still failing",
                    ))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(502));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = fast_policy(3)
            .run("test", &cancel, ProviderError::is_retryable, |_| async {
                Ok(())
            })
            .await;

        assert_eq!(result, Err(ProviderError::Cancelled));
    }
}
