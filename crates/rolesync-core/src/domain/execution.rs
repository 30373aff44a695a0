//! Peer-side execution state as observed by the coordinator.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use super::error::ErrorReason;

/// Status of an instructed execution on a peer.
///
/// Unrecognized values decode to `Unknown` so a newer peer never breaks
/// polling; `Unknown` is never terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    ExecutionCompleted,
    Failed,
    ResetInProgress,
    ResetCompleted,
    Unknown,
}

impl ExecutionStatus {
    pub fn parse(raw: &str) -> Self {
        const ALL: [ExecutionStatus; 6] = [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::ExecutionCompleted,
            ExecutionStatus::Failed,
            ExecutionStatus::ResetInProgress,
            ExecutionStatus::ResetCompleted,
        ];
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("ExecutionStarted") {
            return ExecutionStatus::Running;
        }
        ALL.into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(raw))
            .unwrap_or(ExecutionStatus::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::ExecutionCompleted => "ExecutionCompleted",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::ResetInProgress => "ResetInProgress",
            ExecutionStatus::ResetCompleted => "ResetCompleted",
            ExecutionStatus::Unknown => "Unknown",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::ExecutionCompleted
                | ExecutionStatus::Failed
                | ExecutionStatus::ResetCompleted
        )
    }

    fn is_reset_track(self) -> bool {
        matches!(
            self,
            ExecutionStatus::ResetInProgress | ExecutionStatus::ResetCompleted
        )
    }

    // Position along either track. Failed closes both.
    fn rank(self) -> u8 {
        match self {
            ExecutionStatus::Pending | ExecutionStatus::ResetInProgress => 0,
            ExecutionStatus::Running => 1,
            ExecutionStatus::ExecutionCompleted
            | ExecutionStatus::ResetCompleted
            | ExecutionStatus::Failed => 2,
            ExecutionStatus::Unknown => 0,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ExecutionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ExecutionStatus::parse(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal execution status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

/// `GET /state/{id}` body: `{ status, errorReason?, errorMessage? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    #[serde(
        default,
        deserialize_with = "lenient_reason",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionState {
    pub fn new(status: ExecutionStatus) -> Self {
        Self {
            status,
            error_reason: None,
            error_message: None,
        }
    }

    pub fn failed(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            error_reason: Some(reason),
            error_message: Some(message.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, enforcing forward-only transitions.
    ///
    /// Staying in the same status is allowed. `Pending -> Running ->
    /// {ExecutionCompleted | Failed}` and `ResetInProgress -> ResetCompleted`
    /// are separate tracks; `Failed` may end either.
    pub fn advance(&mut self, next: ExecutionStatus) -> Result<(), InvalidTransition> {
        let from = self.status;
        if from == next {
            return Ok(());
        }

        let illegal = InvalidTransition { from, to: next };
        if from.is_terminal() || next == ExecutionStatus::Unknown {
            return Err(illegal);
        }

        if from != ExecutionStatus::Unknown && next != ExecutionStatus::Failed {
            let same_track = from.is_reset_track() == next.is_reset_track();
            if !same_track || next.rank() <= from.rank() {
                return Err(illegal);
            }
        }

        self.status = next;
        Ok(())
    }

    /// Reason to report for a `Failed` state; missing reasons default to
    /// [`ErrorReason::WorkloadFailed`].
    pub fn failure_reason(&self) -> ErrorReason {
        match self.error_reason {
            None | Some(ErrorReason::Undefined) => ErrorReason::WorkloadFailed,
            Some(reason) => reason,
        }
    }

    pub fn failure_message(&self) -> String {
        self.error_message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "workload failed without an error message".to_string())
    }
}

// Integers and numeric strings decode; anything else is treated as absent.
fn lenient_reason<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<ErrorReason>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let code = match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(|c| i32::try_from(c).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i32>().ok(),
        _ => None,
    };
    Ok(code.map(ErrorReason::from_code))
}
