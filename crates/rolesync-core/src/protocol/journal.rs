//! Dispatch journal: last known dispatch per (role, agent) in the state store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rolesync_state::{StateStore, StateStoreExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{AgentInstance, ErrorReason, ExecutionState, ExecutionStatus, SyncResult};

/// What the coordinator last knew about an instruction sent to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub role: String,
    pub agent: String,
    pub host: String,
    pub instruction_id: String,
    pub operation: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DispatchRecord {
    pub fn dispatched(
        role: &str,
        agent: &AgentInstance,
        instruction_id: &str,
        operation: &str,
    ) -> Self {
        Self {
            role: role.to_string(),
            agent: agent.name.clone(),
            host: agent.ip_address.clone(),
            instruction_id: instruction_id.to_string(),
            operation: operation.to_string(),
            status: ExecutionStatus::Pending,
            error_reason: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    /// Copy of this record carrying the observed peer state.
    pub fn observed(&self, state: &ExecutionState) -> Self {
        let failed = state.status == ExecutionStatus::Failed;
        Self {
            status: state.status,
            error_reason: failed.then(|| state.failure_reason()),
            error_message: if failed {
                Some(state.failure_message())
            } else {
                None
            },
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// State id under which the dispatch to `agent` in `role` is journaled.
pub fn journal_state_id(role: &str, agent: &str) -> String {
    format!("dispatch-{}-{}", role.trim(), agent.trim()).to_lowercase()
}

/// Journal backed by a [`StateStore`]. Write failures are logged, never raised.
#[derive(Clone)]
pub struct DispatchJournal {
    store: Arc<dyn StateStore>,
}

impl DispatchJournal {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, record: &DispatchRecord) {
        let state_id = journal_state_id(&record.role, &record.agent);
        if let Err(e) = self.store.save_state_as(&state_id, record).await {
            warn!(state_id = %state_id, error = %e, "failed to journal dispatch");
        }
    }

    pub async fn last(&self, role: &str, agent: &str) -> SyncResult<Option<DispatchRecord>> {
        let state_id = journal_state_id(role, agent);
        Ok(self.store.get_state_as(&state_id).await?)
    }
}
