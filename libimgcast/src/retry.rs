//! Bounded retry with exponential backoff and jitter
//!
//! A [`RetryPolicy`] is a plain value composed around any fallible async
//! step. Only errors that report themselves as transient are retried;
//! everything else is returned on the spot.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::UiError;

/// Errors that know whether repeating the operation could help
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for UiError {
    fn is_transient(&self) -> bool {
        UiError::is_transient(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each following one
    pub base_delay: Duration,
    /// Upper bound for any single delay, jitter included
    pub max_delay: Duration,
    /// Random extra delay in `[0, jitter]` added to every backoff
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Policy for opening the post editor: 3 attempts, 2s base, 10s cap
    pub fn navigation() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_secs(1),
        }
    }

    /// Policy for publish confirmation: one extra cycle, no backoff
    ///
    /// The step itself performs its network-idle fallback before retrying,
    /// which is all the settling the second cycle needs.
    pub fn publish_confirmation() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Run every attempt exactly once, never retrying
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Backoff before attempt `attempt + 1`, given that `attempt` just failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        let jitter = random_jitter(self.jitter);
        backoff.saturating_add(jitter).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// when every attempt failed.
    pub async fn run<T, E, F, Fut>(&self, operation_name: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", operation_name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "Transient error in {} (attempt {}/{}): {}. Retrying in {:.1}s...",
                        operation_name,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(
                            "{} failed after {} attempts: {}",
                            operation_name, max_attempts, e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::navigation()
    }
}

fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_navigation_policy_shape() {
        let policy = RetryPolicy::navigation();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            jitter: Duration::ZERO,
        };

        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(policy.delay_after(4), Duration::from_secs(10));
        assert_eq!(policy.delay_after(30), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let policy = RetryPolicy::navigation();
        for attempt in 1..=5 {
            let delay = policy.delay_after(attempt);
            assert!(delay >= Duration::from_secs(2).min(policy.max_delay));
            assert!(delay <= policy.max_delay);
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, UiError> = fast(3)
            .run("navigate", |_attempt| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(UiError::Navigation("reset".to_string()))
                    } else {
                        Ok("opened")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "opened");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), UiError> = fast(3)
            .run("navigate", |_attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(UiError::Navigation("down".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(UiError::Navigation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), UiError> = fast(3)
            .run("click", |_attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(UiError::ElementNotFound("publish".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(UiError::ElementNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_numbers_are_passed_through() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = seen.clone();

        let _: Result<(), UiError> = fast(2)
            .run("confirm", |attempt| {
                log.lock().unwrap().push(attempt);
                async move {
                    Err(UiError::Timeout {
                        what: "url".to_string(),
                        after: Duration::from_millis(1),
                    })
                }
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_none_policy_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let _: Result<(), UiError> = RetryPolicy::none()
            .run("once", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(UiError::Driver("gone".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
