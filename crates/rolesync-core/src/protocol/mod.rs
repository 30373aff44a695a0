//! Role synchronization protocol
//!
//! For a role name, resolve its peers from topology and drive one workflow
//! per peer concurrently: confirm liveness, optionally reset, dispatch
//! instructions, poll for a terminal status. Each per-peer workflow runs
//! under the workflow retry policy and restarts from its first step on a
//! retryable failure. The synchronizer keeps no state between calls.
//!
//! Peers never abort each other. The aggregate waits for every peer, then
//! reports cancellation if any peer saw it, otherwise the first failure in
//! topology order.

mod journal;
mod shutdown;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rolesync_retry::{CancelToken, RetryPolicy};
use rolesync_state::StateStore;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::api::AgentClient;
use crate::domain::{
    AgentInstance, ExecutionState, ExecutionStatus, Instructions, InstructionsType, Phase,
    SyncError, SyncResult, TopologyReader,
};
use crate::polling::{poll_until, PollSettings, PollStep};
use crate::registry::AgentClientRegistry;

pub use journal::{journal_state_id, DispatchJournal, DispatchRecord};
pub use shutdown::{NotifyFailure, ShutdownNotifier};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Timing knobs for the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub heartbeat_timeout: Duration,
    /// Budget for a peer to confirm a reset
    pub state_confirmation_timeout: Duration,
    pub completion_timeout: Duration,
    pub poll_interval: Duration,
    pub reset_before_dispatch: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(600),
            state_confirmation_timeout: Duration::from_secs(600),
            completion_timeout: DAY * 90,
            poll_interval: Duration::from_secs(1),
            reset_before_dispatch: false,
        }
    }
}

/// Per-peer result of a successful workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerReport {
    pub agent: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction_id: Option<String>,
}

/// Outcome of a role-wide operation in which every peer succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSummary {
    pub role: String,
    pub peers: Vec<PeerReport>,
    pub elapsed_ms: u64,
}

/// Coordinator side of the role synchronization protocol.
pub struct RoleSynchronizer {
    topology: Arc<dyn TopologyReader>,
    registry: Arc<AgentClientRegistry>,
    workflow_retry: RetryPolicy<SyncError>,
    settings: SyncSettings,
    journal: Option<DispatchJournal>,
}

impl RoleSynchronizer {
    pub fn new(
        topology: Arc<dyn TopologyReader>,
        registry: Arc<AgentClientRegistry>,
        workflow_retry: RetryPolicy<SyncError>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            topology,
            registry,
            workflow_retry,
            settings,
            journal: None,
        }
    }

    /// Journal dispatches and terminal states into `store`.
    pub fn with_journal(mut self, store: Arc<dyn StateStore>) -> Self {
        self.journal = Some(DispatchJournal::new(store));
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<AgentClientRegistry> {
        &self.registry
    }

    /// Shutdown notifier sharing this synchronizer's topology and registry.
    pub fn shutdown_notifier(&self) -> ShutdownNotifier {
        ShutdownNotifier::new(Arc::clone(&self.topology), Arc::clone(&self.registry))
    }

    /// Last journaled dispatch to `agent` in `role`. `None` without a journal.
    pub async fn last_known_dispatch(
        &self,
        role: &str,
        agent: &str,
    ) -> SyncResult<Option<DispatchRecord>> {
        match &self.journal {
            Some(journal) => journal.last(role, agent).await,
            None => Ok(None),
        }
    }

    /// Confirm every peer of `role` answers its heartbeat and reports its
    /// server online, each within `timeout`.
    #[instrument(skip(self, cancel), fields(timeout_secs = timeout.as_secs()))]
    pub async fn wait_for_role(
        &self,
        role: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> SyncResult<RoleSummary> {
        self.for_each_peer(role, |agent| async move {
            self.workflow_retry
                .execute_cancellable(cancel, || self.confirm_peer(&agent, timeout, cancel))
                .await?;
            Ok(PeerReport {
                agent: agent.name.clone(),
                host: agent.ip_address.clone(),
                instruction_id: None,
            })
        })
        .await
    }

    /// Dispatch `instructions` to every peer of `role` and wait until each
    /// reports `ExecutionCompleted`.
    #[instrument(
        skip(self, instructions, cancel),
        fields(instructions = %instructions.describe(), timeout_secs = completion_timeout.as_secs())
    )]
    pub async fn send_instructions_and_await_completion(
        &self,
        role: &str,
        instructions: &Instructions,
        completion_timeout: Duration,
        cancel: &CancelToken,
    ) -> SyncResult<RoleSummary> {
        instructions.validate()?;

        self.for_each_peer(role, |agent| async move {
            self.workflow_retry
                .execute_cancellable(cancel, || {
                    self.instruct_peer(role, &agent, instructions, completion_timeout, cancel)
                })
                .await
        })
        .await
    }

    /// Reset every peer of `role` and wait for each to confirm.
    #[instrument(skip(self, cancel))]
    pub async fn reset_role(&self, role: &str, cancel: &CancelToken) -> SyncResult<RoleSummary> {
        self.for_each_peer(role, |agent| async move {
            self.workflow_retry
                .execute_cancellable(cancel, || self.reset_agent(&agent, cancel))
                .await?;
            Ok(PeerReport {
                agent: agent.name.clone(),
                host: agent.ip_address.clone(),
                instruction_id: None,
            })
        })
        .await
    }

    async fn for_each_peer<F, Fut>(&self, role: &str, run: F) -> SyncResult<RoleSummary>
    where
        F: Fn(AgentInstance) -> Fut,
        Fut: Future<Output = SyncResult<PeerReport>>,
    {
        let started = Instant::now();
        let peers = self.topology.agents_for_role(role);
        if peers.is_empty() {
            info!(role, "no peers assigned to role");
            return Ok(RoleSummary {
                role: role.to_string(),
                peers: Vec::new(),
                elapsed_ms: 0,
            });
        }

        let names: Vec<String> = peers.iter().map(|p| p.name.clone()).collect();
        debug!(role, peers = ?names, "starting peer workflows");

        let results = join_all(peers.into_iter().map(run)).await;

        let mut reports = Vec::with_capacity(results.len());
        let mut first_failure = None;
        let mut cancelled = false;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(report) => reports.push(report),
                Err(SyncError::Cancelled) => cancelled = true,
                Err(err) => {
                    warn!(
                        role,
                        agent = %name,
                        phase = ?err.phase(),
                        reason = %err.reason(),
                        error = %err,
                        "peer workflow failed"
                    );
                    first_failure.get_or_insert(err);
                }
            }
        }

        if cancelled {
            debug!(role, "role operation cancelled");
            return Err(SyncError::Cancelled);
        }
        if let Some(err) = first_failure {
            return Err(err);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(role, peers = reports.len(), elapsed_ms, "all peers completed");
        Ok(RoleSummary {
            role: role.to_string(),
            peers: reports,
            elapsed_ms,
        })
    }

    async fn confirm_peer(
        &self,
        agent: &AgentInstance,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> SyncResult<()> {
        let client = self.registry.client_for(agent)?;
        let client = &client;
        let settings = PollSettings::new(self.settings.poll_interval, timeout);

        poll_until(
            client.host(),
            Phase::ConfirmingPeer,
            settings,
            cancel,
            move || async move { client.heartbeat().await.map(PollStep::Done) },
        )
        .await?;
        debug!(agent = %agent.name, "heartbeat confirmed");

        // The agent answers heartbeats before its server side is ready.
        poll_until(
            client.host(),
            Phase::ConfirmingPeer,
            settings,
            cancel,
            move || async move { client.server_online().await.map(PollStep::Done) },
        )
        .await?;
        debug!(agent = %agent.name, "server online");
        Ok(())
    }

    /// One attempt of the per-peer dispatch workflow.
    async fn instruct_peer(
        &self,
        role: &str,
        agent: &AgentInstance,
        instructions: &Instructions,
        completion_timeout: Duration,
        cancel: &CancelToken,
    ) -> SyncResult<PeerReport> {
        let client = self.registry.client_for(agent)?;

        if self.settings.reset_before_dispatch {
            self.reset_peer(&client, cancel).await?;
        }

        let instruction_id =
            dispatch(&client, instructions, Phase::DispatchingInstructions, cancel).await?;
        let operation = instructions.describe();
        info!(agent = %agent.name, instruction_id = %instruction_id, "instructions accepted");

        let record = DispatchRecord::dispatched(role, agent, &instruction_id, &operation);
        self.journal(&record).await;

        let state = self
            .await_status(
                &client,
                &instruction_id,
                Phase::PollingForCompletion,
                completion_timeout,
                cancel,
                |s| matches!(s, ExecutionStatus::ExecutionCompleted | ExecutionStatus::Failed),
            )
            .await?;

        let outcome = if state.status == ExecutionStatus::Failed {
            // The polled body may be abbreviated; prefer a fresh read.
            let full = match client.get_state(&instruction_id).await {
                Ok(Some(fresh)) if fresh.status == ExecutionStatus::Failed => fresh,
                _ => state,
            };
            self.journal(&record.observed(&full)).await;
            Err(SyncError::WorkloadFailed {
                peer: client.host().to_string(),
                operation,
                reason: full.failure_reason(),
                message: full.failure_message(),
            })
        } else {
            self.journal(&record.observed(&state)).await;
            Ok(PeerReport {
                agent: agent.name.clone(),
                host: client.host().to_string(),
                instruction_id: Some(instruction_id.clone()),
            })
        };

        cleanup(&client, &instruction_id).await;
        outcome
    }

    async fn reset_agent(&self, agent: &AgentInstance, cancel: &CancelToken) -> SyncResult<()> {
        let client = self.registry.client_for(agent)?;
        self.reset_peer(&client, cancel).await
    }

    async fn reset_peer(&self, client: &AgentClient, cancel: &CancelToken) -> SyncResult<()> {
        let reset = Instructions::new(InstructionsType::ClientServerReset);
        let instruction_id = dispatch(client, &reset, Phase::Resetting, cancel).await?;

        let state = self
            .await_status(
                client,
                &instruction_id,
                Phase::Resetting,
                self.settings.state_confirmation_timeout,
                cancel,
                |s| matches!(s, ExecutionStatus::ResetCompleted | ExecutionStatus::Failed),
            )
            .await?;
        cleanup(client, &instruction_id).await;

        if state.status == ExecutionStatus::Failed {
            return Err(SyncError::WorkloadFailed {
                peer: client.host().to_string(),
                operation: format!("{:?}", InstructionsType::ClientServerReset),
                reason: state.failure_reason(),
                message: state.failure_message(),
            });
        }
        debug!(peer = client.host(), "reset confirmed");
        Ok(())
    }

    async fn await_status(
        &self,
        client: &AgentClient,
        instruction_id: &str,
        phase: Phase,
        timeout: Duration,
        cancel: &CancelToken,
        terminal: fn(ExecutionStatus) -> bool,
    ) -> SyncResult<ExecutionState> {
        poll_until(
            client.host(),
            phase,
            PollSettings::new(self.settings.poll_interval, timeout),
            cancel,
            move || async move {
                client
                    .get_state(instruction_id)
                    .await
                    .map(|state| match state {
                        Some(state) if terminal(state.status) => PollStep::Done(state),
                        Some(state) => PollStep::NotYet(state.status.to_string()),
                        None => PollStep::NotYet("state not found".to_string()),
                    })
            },
        )
        .await
    }

    async fn journal(&self, record: &DispatchRecord) {
        if let Some(journal) = &self.journal {
            journal.record(record).await;
        }
    }
}

/// POST `instructions` and return the acknowledged instruction id.
async fn dispatch(
    client: &AgentClient,
    instructions: &Instructions,
    phase: Phase,
    cancel: &CancelToken,
) -> SyncResult<String> {
    cancel.check()?;
    let ack = client
        .send_instructions(instructions)
        .await
        .map_err(|e| e.in_phase(phase))?;

    let id = ack.id.trim();
    if id.is_empty() {
        return Err(SyncError::InvalidResponse {
            peer: client.host().to_string(),
            phase,
            detail: "acknowledgment carries an empty instruction id".to_string(),
        });
    }
    Ok(id.to_string())
}

/// Best-effort removal of the peer's state record.
async fn cleanup(client: &AgentClient, instruction_id: &str) {
    if let Err(e) = client.delete_state(instruction_id).await {
        warn!(
            peer = client.host(),
            instruction_id,
            error = %e,
            "failed to clean up peer state"
        );
    }
}
