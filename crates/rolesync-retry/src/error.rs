//! Error types for rolesync-retry

use thiserror::Error;

/// Raised when a [`crate::CancelToken`] fires before an operation completes.
///
/// Cancellation is an outcome, not a failure: callers should not log it as an
/// error and policies never retry it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Policy construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidPolicy {
    /// A policy must allow at least one attempt
    #[error("retry policy '{name}' must allow at least one attempt")]
    ZeroAttempts { name: String },
}
