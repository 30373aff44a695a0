//! Error taxonomy for role synchronization.
//!
//! Every failure carries a numeric [`ErrorReason`] compatible with the
//! `errorReason` integers peers report. Codes below 500 are transient and
//! restart the peer workflow; 500 and above are contract errors.

use std::fmt;
use std::time::Duration;

use rolesync_retry::{Cancelled, RetryClassify};
use rolesync_state::StateError;
use serde::{Deserialize, Serialize};

/// Structured reason code attached to failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrorReason {
    Undefined,
    WorkloadFailed,
    HttpNonSuccessResponse,
    ApiStatePollingTimeout,
    ApiRequestFailed,
    InvalidProfileDefinition,
    DependencyNotFound,
    InstructionsNotValid,
    SystemOperationFailed,
    /// Any code reported by a peer that has no named variant.
    Other(i32),
}

impl ErrorReason {
    pub fn code(self) -> i32 {
        match self {
            ErrorReason::Undefined => 0,
            ErrorReason::WorkloadFailed => 315,
            ErrorReason::HttpNonSuccessResponse => 320,
            ErrorReason::ApiStatePollingTimeout => 410,
            ErrorReason::ApiRequestFailed => 411,
            ErrorReason::InvalidProfileDefinition => 501,
            ErrorReason::DependencyNotFound => 507,
            ErrorReason::InstructionsNotValid => 510,
            ErrorReason::SystemOperationFailed => 517,
            ErrorReason::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ErrorReason::Undefined,
            315 => ErrorReason::WorkloadFailed,
            320 => ErrorReason::HttpNonSuccessResponse,
            410 => ErrorReason::ApiStatePollingTimeout,
            411 => ErrorReason::ApiRequestFailed,
            501 => ErrorReason::InvalidProfileDefinition,
            507 => ErrorReason::DependencyNotFound,
            510 => ErrorReason::InstructionsNotValid,
            517 => ErrorReason::SystemOperationFailed,
            other => ErrorReason::Other(other),
        }
    }

    /// Codes below 500 are worth redoing the workflow for.
    pub fn is_transient(self) -> bool {
        self.code() < 500
    }
}

impl From<i32> for ErrorReason {
    fn from(code: i32) -> Self {
        ErrorReason::from_code(code)
    }
}

impl From<ErrorReason> for i32 {
    fn from(reason: ErrorReason) -> Self {
        reason.code()
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::Other(code) => write!(f, "{code}"),
            named => write!(f, "{named:?}/{}", named.code()),
        }
    }
}

/// Step of a peer workflow in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    ConfirmingPeer,
    Resetting,
    DispatchingInstructions,
    PollingForCompletion,
    CleaningUp,
    NotifyingExit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ConfirmingPeer => "peer confirmation",
            Phase::Resetting => "reset",
            Phase::DispatchingInstructions => "instruction dispatch",
            Phase::PollingForCompletion => "completion polling",
            Phase::CleaningUp => "state cleanup",
            Phase::NotifyingExit => "exit notification",
        };
        f.write_str(name)
    }
}

/// Errors produced by the synchronization layer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("peer '{peer}' unreachable during {phase}: {detail}")]
    Unreachable {
        peer: String,
        phase: Phase,
        detail: String,
    },

    #[error("{phase} request to '{peer}' failed with HTTP {status} ({reason}): {detail}")]
    Api {
        peer: String,
        phase: Phase,
        status: u16,
        reason: ErrorReason,
        detail: String,
    },

    #[error("invalid response from '{peer}' during {phase}: {detail}")]
    InvalidResponse {
        peer: String,
        phase: Phase,
        detail: String,
    },

    #[error("workload '{operation}' failed on '{peer}' ({reason}): {message}")]
    WorkloadFailed {
        peer: String,
        operation: String,
        reason: ErrorReason,
        message: String,
    },

    #[error("{phase} on '{peer}' timed out after {timeout:?} (last status: {last_status})")]
    PollingTimeout {
        peer: String,
        phase: Phase,
        timeout: Duration,
        last_status: String,
    },

    #[error("invalid topology: {0}")]
    Topology(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid instructions: {0}")]
    InvalidInstructions(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Structured reason code for this failure.
    pub fn reason(&self) -> ErrorReason {
        match self {
            SyncError::Unreachable { .. } => ErrorReason::ApiRequestFailed,
            SyncError::Api { reason, .. } => *reason,
            SyncError::InvalidResponse { .. } => ErrorReason::ApiRequestFailed,
            SyncError::WorkloadFailed { reason, .. } => *reason,
            SyncError::PollingTimeout { .. } => ErrorReason::ApiStatePollingTimeout,
            SyncError::Topology(_) | SyncError::Config(_) => ErrorReason::InvalidProfileDefinition,
            SyncError::InvalidInstructions(_) => ErrorReason::InstructionsNotValid,
            SyncError::State(_) => ErrorReason::SystemOperationFailed,
            SyncError::Cancelled => ErrorReason::Undefined,
        }
    }

    /// Host or agent id of the peer involved, if any.
    pub fn peer(&self) -> Option<&str> {
        match self {
            SyncError::Unreachable { peer, .. }
            | SyncError::Api { peer, .. }
            | SyncError::InvalidResponse { peer, .. }
            | SyncError::WorkloadFailed { peer, .. }
            | SyncError::PollingTimeout { peer, .. } => Some(peer),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            SyncError::Unreachable { phase, .. }
            | SyncError::Api { phase, .. }
            | SyncError::InvalidResponse { phase, .. }
            | SyncError::PollingTimeout { phase, .. } => Some(*phase),
            SyncError::WorkloadFailed { .. } => Some(Phase::PollingForCompletion),
            _ => None,
        }
    }

    /// Re-attribute a transport-level failure to the workflow step that issued it.
    pub fn in_phase(mut self, new_phase: Phase) -> Self {
        match &mut self {
            SyncError::Unreachable { phase, .. }
            | SyncError::Api { phase, .. }
            | SyncError::InvalidResponse { phase, .. }
            | SyncError::PollingTimeout { phase, .. } => *phase = new_phase,
            _ => {}
        }
        self
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::PollingTimeout { .. })
    }
}

impl From<Cancelled> for SyncError {
    fn from(_: Cancelled) -> Self {
        SyncError::Cancelled
    }
}

impl RetryClassify for SyncError {
    fn is_cancellation(&self) -> bool {
        match self {
            SyncError::Cancelled => true,
            SyncError::State(inner) => inner.is_cancellation(),
            _ => false,
        }
    }

    /// Contract errors (reason >= 500). Polling timeouts (410) are transient:
    /// the workflow restarts the whole step.
    fn is_permanent(&self) -> bool {
        !self.reason().is_transient()
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
