use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{BrowserConfig, HttpConfig};
use crate::error::{ScrapeKitError, ScrapeKitResult};

/// Wait between two attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// `multiplier * 2^(n-1)` after the n-th failure, clamped to `[min, max]`
    Exponential {
        multiplier: Duration,
        min: Duration,
        max: Duration,
    },
    Fixed(Duration),
}

/// Bounded retry with backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub backoff: Backoff,
    retry_on: fn(&ScrapeKitError) -> bool,
}

impl RetryPolicy {
    pub fn exponential(attempts: usize, multiplier: Duration, min: Duration, max: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Backoff::Exponential { multiplier, min, max },
            retry_on: ScrapeKitError::is_recoverable,
        }
    }

    pub fn fixed(attempts: usize, wait: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Backoff::Fixed(wait),
            retry_on: ScrapeKitError::is_recoverable,
        }
    }

    /// A single attempt, no retries
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Replace the predicate deciding which errors are worth another attempt
    pub fn retry_on(mut self, predicate: fn(&ScrapeKitError) -> bool) -> Self {
        self.retry_on = predicate;
        self
    }

    pub fn from_http_config(config: &HttpConfig) -> Self {
        Self::exponential(
            config.retries,
            Duration::from_millis(config.backoff_multiplier_ms),
            Duration::from_millis(config.backoff_min_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// Fixed waits; missing elements are retried like driver failures
    pub fn from_browser_config(config: &BrowserConfig) -> Self {
        Self::fixed(config.retry_attempts, Duration::from_secs(config.retry_wait_seconds)).retry_on(|e| {
            e.is_recoverable() || matches!(e, ScrapeKitError::ElementNotFound { .. })
        })
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match &self.backoff {
            Backoff::Fixed(wait) => *wait,
            Backoff::Exponential { multiplier, min, max } => {
                let exponent = attempt.saturating_sub(1).min(31) as u32;
                multiplier.saturating_mul(1u32 << exponent).clamp(*min, *max.max(min))
            }
        }
    }

    pub fn should_retry(&self, error: &ScrapeKitError) -> bool {
        (self.retry_on)(error)
    }
}

/// Run `f` until it succeeds, fails with a non-retryable error, or the policy
/// runs out of attempts. The last error is returned unchanged.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> ScrapeKitResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ScrapeKitResult<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.attempts && policy.should_retry(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {}ms",
                    operation,
                    attempt,
                    policy.attempts,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_exponential_delays_are_clamped() {
        let policy = RetryPolicy::from_http_config(&HttpConfig::default());
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(64), Duration::from_secs(10));
    }

    #[test]
    fn test_browser_policy() {
        let policy = RetryPolicy::from_browser_config(&BrowserConfig::default());
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay_for(2), Duration::from_secs(5));
        assert!(policy.should_retry(&ScrapeKitError::ElementNotFound { locator: "#x".into() }));
        assert!(!policy.should_retry(&ScrapeKitError::config("bad")));
    }

    #[tokio::test]
    async fn test_retries_recoverable_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));

        let result = retry(&policy, "flaky op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ScrapeKitError::network("connection reset"))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_last_attempt() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::fixed(2, Duration::from_millis(1));

        let result: ScrapeKitResult<()> = retry(&policy, "down", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ScrapeKitError::Timeout { url: "http://x".into() })
        })
        .await;

        assert!(matches!(result, Err(ScrapeKitError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));

        let result: ScrapeKitResult<()> = retry(&policy, "not found", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ScrapeKitError::HttpStatus { url: "http://x".into(), status: 404 })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
