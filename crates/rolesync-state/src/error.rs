//! Error types for rolesync-state

use std::io;
use std::path::PathBuf;

use rolesync_retry::{Cancelled, RetryClassify};
use thiserror::Error;

/// Errors that can occur in the state persistence layer
#[derive(Error, Debug)]
pub enum StateError {
    /// State id is empty or would escape the state directory
    #[error("invalid state id '{state_id}': {reason}")]
    InvalidStateId { state_id: String, reason: String },

    /// File system error on a state file
    #[error("state I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Document could not be serialized
    #[error("state serialization failed: {0}")]
    Serialization(String),

    /// Stored file is not a valid JSON document
    #[error("state document '{state_id}' is corrupt: {reason}")]
    Corrupt { state_id: String, reason: String },

    /// Blocking I/O task did not complete
    #[error("state I/O task failed: {0}")]
    Task(String),

    /// Store could not be constructed
    #[error("state store configuration invalid: {0}")]
    Config(String),

    /// Operation cancelled while waiting
    #[error("state operation cancelled")]
    Cancelled,
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StateError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<Cancelled> for StateError {
    fn from(_: Cancelled) -> Self {
        StateError::Cancelled
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

impl RetryClassify for StateError {
    fn is_cancellation(&self) -> bool {
        matches!(self, StateError::Cancelled)
    }

    fn is_io_contention(&self) -> bool {
        match self {
            StateError::Io { source, .. } => is_contention(source),
            _ => false,
        }
    }

    fn is_permanent(&self) -> bool {
        matches!(
            self,
            StateError::InvalidStateId { .. } | StateError::Config(_)
        )
    }
}

/// Locked, busy, or interrupted files.
fn is_contention(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    ) {
        return true;
    }

    #[cfg(windows)]
    {
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }

    #[cfg(not(windows))]
    {
        // EBUSY, ETXTBSY
        matches!(err.raw_os_error(), Some(16) | Some(26))
    }
}
