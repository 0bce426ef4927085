//! Retry combinator shared by every retried operation
//!
//! Vehicle pages, dealership landing pages and vehicle deliveries all go through
//! [`retry_with_policy`]; they differ only in their [`RetryPolicy`] and retryable predicate.

use crate::config::DelayRange;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay strategy between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// Uniformly random delay from the range before every retry
    Jitter(DelayRange),
}

impl Backoff {
    /// Delay to sleep before the next attempt.
    pub fn delay(&self) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Jitter(range) => range.sample(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: usize,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn jittered(max_attempts: usize, range: DelayRange) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Jitter(range),
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or exhausts
/// `policy.max_attempts`. The last error is returned on failure.
pub async fn retry_with_policy<T, E, F, Fut, P>(
    label: &str,
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_attempts || !is_retryable(&err) {
            return Err(err);
        }

        let delay = policy.backoff.delay();
        warn!(
            target_label = label,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CrawlError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn transient() -> CrawlError {
        CrawlError::Browser("connection reset".to_string())
    }

    #[tokio::test]
    async fn test_succeeds_on_first_try() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result = retry_with_policy(
            "first",
            &RetryPolicy::fixed(3, Duration::ZERO),
            CrawlError::is_retryable,
            |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CrawlError>(7)
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_third_attempt_succeeds_with_three_attempts() {
        let result = retry_with_policy(
            "third",
            &RetryPolicy::fixed(3, Duration::ZERO),
            CrawlError::is_retryable,
            |attempt| async move {
                if attempt < 3 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry_with_policy(
            "exhaust",
            &RetryPolicy::fixed(2, Duration::ZERO),
            CrawlError::is_retryable,
            |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            },
        )
        .await;
        assert!(matches!(result, Err(CrawlError::Browser(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry_with_policy(
            "permanent",
            &RetryPolicy::fixed(5, Duration::ZERO),
            CrawlError::is_retryable,
            |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(CrawlError::InvalidUrl("ftp://x".into()))
                }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_is_applied_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), _> = retry_with_policy(
            "delay",
            &RetryPolicy::fixed(3, Duration::from_secs(2)),
            CrawlError::is_retryable,
            |_| async { Err(transient()) },
        )
        .await;
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }
}
