//! Fixed-interval polling with a deadline.
//!
//! Heartbeat confirmation, reset confirmation and completion polling all run
//! through [`poll_until`]. Transport failures and non-2xx answers count as
//! "not yet"; every other error ends the poll.

use std::future::Future;
use std::time::Duration;

use rolesync_retry::CancelToken;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::domain::{Phase, SyncError, SyncResult};

/// Interval between checks and the total time allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Result of a single check.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep<T> {
    /// Terminal predicate satisfied.
    Done(T),
    /// Not there yet; the string describes the last observed status.
    NotYet(String),
}

fn is_not_yet(err: &SyncError) -> bool {
    matches!(err, SyncError::Unreachable { .. } | SyncError::Api { .. })
}

/// Check `peer` every `settings.interval` until the check reports
/// [`PollStep::Done`] or `settings.timeout` elapses.
///
/// The token is checked on every iteration and raced against both the check
/// and the interval sleep. A deadline that overflows the clock is treated as
/// unbounded.
pub async fn poll_until<T, F, Fut>(
    peer: &str,
    phase: Phase,
    settings: PollSettings,
    cancel: &CancelToken,
    mut check: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<PollStep<T>>>,
{
    let deadline = Instant::now().checked_add(settings.timeout);
    let mut checks: u64 = 0;

    loop {
        cancel.check()?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            outcome = check() => outcome,
        };
        checks += 1;

        let last_status = match outcome {
            Ok(PollStep::Done(value)) => {
                debug!(peer, %phase, checks, "poll reached terminal state");
                return Ok(value);
            }
            Ok(PollStep::NotYet(status)) => {
                trace!(peer, %phase, %status, "not yet");
                status
            }
            Err(err) if is_not_yet(&err) => {
                debug!(peer, %phase, error = %err, "check failed, polling again");
                err.to_string()
            }
            Err(err) => return Err(err.in_phase(phase)),
        };

        let wait = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(SyncError::PollingTimeout {
                        peer: peer.to_string(),
                        phase,
                        timeout: settings.timeout,
                        last_status,
                    });
                }
                remaining.min(settings.interval)
            }
            None => settings.interval,
        };

        cancel.sleep(wait).await?;
    }
}
