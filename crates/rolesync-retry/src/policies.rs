//! Standing policies used across rolesync.
//!
//! - [`file_operations`]: state file I/O, retries only file contention,
//!   linear backoff.
//! - [`workflow`]: whole multi-step remote workflows, retries anything that
//!   is neither a cancellation nor a contract error, fixed backoff. A failed
//!   workflow is redone from its first step.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::InvalidPolicy;
use crate::policy::{Backoff, RetryClassify, RetryPolicy};

pub const FILE_OPERATIONS: &str = "file-operations";
pub const WORKFLOW: &str = "workflow";

/// Attempt count and backoff base for a standing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first (1 = no retry).
    pub max_attempts: u32,
    /// Backoff base in milliseconds.
    pub backoff_base_ms: u64,
}

impl RetrySettings {
    pub fn new(max_attempts: u32, backoff_base_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_base_ms,
        }
    }

    /// Defaults for state file I/O: 6 attempts, 1s, 2s, 3s ... between them.
    pub fn file_default() -> Self {
        Self::new(6, 1_000)
    }

    /// Defaults for remote workflows: 4 attempts, 1s between them.
    pub fn workflow_default() -> Self {
        Self::new(4, 1_000)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Policy for local state file operations.
pub fn file_operations<E>(settings: &RetrySettings) -> Result<RetryPolicy<E>, InvalidPolicy>
where
    E: RetryClassify,
{
    RetryPolicy::new(
        FILE_OPERATIONS,
        settings.max_attempts,
        Backoff::Linear(settings.backoff_base()),
        |err: &E| err.is_io_contention(),
    )
}

/// Policy for restarting an entire remote workflow after any failure.
pub fn workflow<E>(settings: &RetrySettings) -> Result<RetryPolicy<E>, InvalidPolicy>
where
    E: RetryClassify,
{
    RetryPolicy::new(
        WORKFLOW,
        settings.max_attempts,
        Backoff::Fixed(settings.backoff_base()),
        |err: &E| !err.is_permanent(),
    )
}
