//! Exit notification sent to peers when the coordinator shuts down.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::domain::{
    AgentInstance, Instructions, InstructionsType, Phase, SyncError, TopologyReader,
};
use crate::registry::AgentClientRegistry;

/// A peer that could not be told to exit.
#[derive(Debug)]
pub struct NotifyFailure {
    pub role: String,
    pub agent: String,
    pub error: SyncError,
}

/// Explicit list of roles whose peers receive `ClientServerExit` at shutdown.
pub struct ShutdownNotifier {
    topology: Arc<dyn TopologyReader>,
    registry: Arc<AgentClientRegistry>,
    roles: Vec<String>,
}

impl ShutdownNotifier {
    pub fn new(topology: Arc<dyn TopologyReader>, registry: Arc<AgentClientRegistry>) -> Self {
        Self {
            topology,
            registry,
            roles: Vec::new(),
        }
    }

    /// Add `role` to the list. Duplicates (case-insensitive) are ignored.
    pub fn add_role(&mut self, role: impl Into<String>) -> &mut Self {
        let role = role.into();
        if !self.roles.iter().any(|r| r.eq_ignore_ascii_case(&role)) {
            self.roles.push(role);
        }
        self
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Send exit instructions to every peer of every listed role, once each,
    /// concurrently. Failures are collected rather than raised.
    pub async fn notify_all(&self) -> Vec<NotifyFailure> {
        let exit = Instructions::new(InstructionsType::ClientServerExit);
        let targets: Vec<(String, AgentInstance)> = self
            .roles
            .iter()
            .flat_map(|role| {
                self.topology
                    .agents_for_role(role)
                    .into_iter()
                    .map(move |agent| (role.clone(), agent))
            })
            .collect();

        let exit = &exit;
        let sends = targets.into_iter().map(|(role, agent)| async move {
            let sent = match self.registry.client_for(&agent) {
                Ok(client) => client
                    .send_instructions(exit)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.in_phase(Phase::NotifyingExit)),
                Err(e) => Err(e),
            };
            sent.err().map(|error| NotifyFailure {
                role,
                agent: agent.name,
                error,
            })
        });

        let failures: Vec<NotifyFailure> = join_all(sends).await.into_iter().flatten().collect();
        for failure in &failures {
            warn!(
                role = %failure.role,
                agent = %failure.agent,
                error = %failure.error,
                "exit notification failed"
            );
        }
        info!(roles = self.roles.len(), failed = failures.len(), "exit notifications sent");
        failures
    }
}
