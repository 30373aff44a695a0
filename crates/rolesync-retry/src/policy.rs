//! Retry execution: attempt budget, backoff, and transient-error predicate.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{Cancelled, InvalidPolicy};

/// Classification hooks a retried error type must provide.
///
/// `From<Cancelled>` lets a policy surface cancellation in the caller's
/// own error type when the token fires during a backoff wait.
pub trait RetryClassify: std::error::Error + From<Cancelled> {
    /// True for cancellation outcomes. These are never retried.
    fn is_cancellation(&self) -> bool;

    /// True when the error is file contention (locked or busy file).
    fn is_io_contention(&self) -> bool {
        false
    }

    /// True for contract errors that no amount of retrying can fix.
    fn is_permanent(&self) -> bool {
        false
    }
}

/// Delay between attempts, as a function of the 1-based attempt that just failed.
#[derive(Clone)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Same delay after every failure.
    Fixed(Duration),
    /// `base * attempt`.
    Linear(Duration),
    /// `base * 2^(attempt-1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Linear(base) => base.saturating_mul(attempt),
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(*max)
            }
            Backoff::Custom(f) => f(attempt),
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::None => write!(f, "None"),
            Backoff::Fixed(d) => write!(f, "Fixed({d:?})"),
            Backoff::Linear(d) => write!(f, "Linear({d:?})"),
            Backoff::Exponential { base, max } => {
                write!(f, "Exponential {{ base: {base:?}, max: {max:?} }}")
            }
            Backoff::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// A named, immutable backoff strategy.
///
/// An operation that keeps failing with a retryable error is invoked exactly
/// `max_attempts` times; the last error is then returned unchanged.
/// Cancellation errors are returned immediately without consuming an attempt
/// or waiting on backoff.
pub struct RetryPolicy<E> {
    name: String,
    max_attempts: u32,
    backoff: Backoff,
    predicate: RetryPredicate<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl<E: RetryClassify> RetryPolicy<E> {
    /// Create a policy. Fails if `max_attempts` is zero.
    pub fn new(
        name: impl Into<String>,
        max_attempts: u32,
        backoff: Backoff,
        predicate: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Result<Self, InvalidPolicy> {
        let name = name.into();
        if max_attempts == 0 {
            return Err(InvalidPolicy::ZeroAttempts { name });
        }
        Ok(Self {
            name,
            max_attempts,
            backoff,
            predicate: Arc::new(predicate),
        })
    }

    /// A policy that runs the operation once.
    pub fn no_retry(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_attempts: 1,
            backoff: Backoff::None,
            predicate: Arc::new(|_| false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    fn should_retry(&self, err: &E, attempt: u32) -> bool {
        !err.is_cancellation() && attempt < self.max_attempts && (self.predicate)(err)
    }

    /// Run a blocking operation under this policy.
    pub fn execute<T>(&self, mut operation: impl FnMut() -> Result<T, E>) -> Result<T, E> {
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !self.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        policy = %self.name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Run an async operation under this policy without external cancellation.
    pub async fn execute_async<T, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_cancellable(&CancelToken::new(), operation).await
    }

    /// Run an async operation under this policy.
    ///
    /// The token is checked before each attempt, raced against each attempt
    /// (an in-flight attempt is dropped on cancel) and raced against every
    /// backoff wait.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        cancel: &CancelToken,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            cancel.check()?;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(E::from(Cancelled)),
                result = operation() => result,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.is_cancellation() {
                        debug!(policy = %self.name, attempt, "operation cancelled");
                        return Err(err);
                    }
                    if !self.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        policy = %self.name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    cancel.sleep(delay).await?;
                    attempt += 1;
                }
            }
        }
    }
}
