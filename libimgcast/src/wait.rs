//! Racing independent completion sources
//!
//! Every bounded wait in imgcast is a race between a few futures: an element
//! showing up, a URL changing, a timer, a keypress. [`first_of`] polls them
//! together and drops the losers as soon as one finishes, which cancels them.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::future::select_all;
use tokio::time::sleep;

use crate::error::UiError;

/// A boxed completion source
pub type Source<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a wait that is bounded by a timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Waited<T> {
    Done(T),
    TimedOut,
}

impl<T> Waited<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Waited::Done(_))
    }

    /// Convert a timeout into [`UiError::Timeout`]
    pub fn or_timeout(self, what: &str, after: Duration) -> Result<T, UiError> {
        match self {
            Waited::Done(value) => Ok(value),
            Waited::TimedOut => Err(UiError::Timeout {
                what: what.to_string(),
                after,
            }),
        }
    }
}

/// Wait for the first source to complete
///
/// Returns its output together with its index in `sources`. All other
/// sources are dropped before this returns.
///
/// # Panics
///
/// Panics if `sources` is empty.
pub async fn first_of<'a, T>(sources: Vec<Source<'a, T>>) -> (T, usize) {
    let (output, index, losers) = select_all(sources).await;
    drop(losers);
    (output, index)
}

/// Race `fut` against a timer of length `limit`
pub async fn within<'a, T, F>(limit: Duration, fut: F) -> Waited<T>
where
    T: Send + 'a,
    F: Future<Output = T> + Send + 'a,
{
    let sources: Vec<Source<'a, Waited<T>>> = vec![
        Box::pin(async move { Waited::Done(fut.await) }),
        Box::pin(async move {
            sleep(limit).await;
            Waited::TimedOut
        }),
    ];

    first_of(sources).await.0
}

/// Re-check `probe` every `interval` until it reports `true`
///
/// Probe errors count as "not yet". The loop never ends on its own; bound it
/// with [`within`].
pub async fn poll_until<F, Fut>(interval: Duration, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, UiError>>,
{
    loop {
        match probe().await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => tracing::trace!("Probe not satisfied yet: {}", e),
        }
        sleep(interval).await;
    }
}

/// Repeat `op` every `interval` until it succeeds or `limit` elapses
///
/// This mirrors the auto-waiting of browser automation tools: an element
/// that is not interactive yet often becomes so a moment later. On timeout
/// the most recent error is returned, or [`UiError::Timeout`] if `op` never
/// completed.
pub async fn retry_within<T, F, Fut>(
    limit: Duration,
    interval: Duration,
    what: &str,
    mut op: F,
) -> Result<T, UiError>
where
    T: Send,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, UiError>> + Send,
{
    let mut last_error: Option<UiError> = None;

    let outcome = within(limit, async {
        loop {
            match op().await {
                Ok(value) => return value,
                Err(e) => {
                    tracing::trace!("{} not ready: {}", what, e);
                    last_error = Some(e);
                }
            }
            sleep(interval).await;
        }
    })
    .await;

    match outcome {
        Waited::Done(value) => Ok(value),
        Waited::TimedOut => Err(last_error.unwrap_or(UiError::Timeout {
            what: what.to_string(),
            after: limit,
        })),
    }
}
