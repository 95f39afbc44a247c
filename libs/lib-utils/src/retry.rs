//! Retry with exponential backoff
//!
//! One retry loop shared by every external client. Callers supply the
//! operation and a classifier deciding whether a failure is worth another
//! attempt; the loop owns the attempt counting and the sleeping.

use std::{fmt, future::Future, time::Duration};

/// Attempt ceiling and backoff curve for one kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retrying after the failed attempt with index `attempt` (0-based):
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// What the classifier thinks of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Try again after backing off.
    Transient,
    /// Give up immediately and hand the error back.
    Terminal,
}

/// Why the retry loop stopped without a success.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The classifier marked the error as terminal.
    Terminal(E),
    /// Every attempt failed with a transient error; `last` is the final one.
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Terminal(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Terminal(e) => write!(f, "terminal error: {}", e),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op` until it succeeds, the classifier calls a failure terminal, or
/// `policy.max_attempts` attempts have been made.
///
/// `op` receives the 0-based attempt index. No sleep happens after the last
/// attempt.
pub async fn retry_with_backoff<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    classify: C,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Retry,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if classify(&err) == Retry::Terminal {
            return Err(RetryError::Terminal(err));
        }

        if attempt + 1 >= max_attempts {
            tracing::warn!(
                "{}: giving up after {} attempts: {}",
                label,
                max_attempts,
                err
            );
            return Err(RetryError::Exhausted {
                attempts: max_attempts,
                last: err,
            });
        }

        let delay = policy.delay_for(attempt);
        tracing::warn!(
            "{}: attempt {}/{} failed, retrying in {:?}: {}",
            label,
            attempt + 1,
            max_attempts,
            delay,
            err
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
