//! In-memory fakes for the peer API (testing only)
//!
//! `FakePeer` answers heartbeats, dispatches and state reads from a script
//! and records every call. `FakeClientFactory` hands registered peers to an
//! [`AgentClientRegistry`](crate::registry::AgentClientRegistry) and counts
//! constructions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{AgentApi, AgentClient};
use crate::domain::{
    ErrorReason, ExecutionState, ExecutionStatus, InstructionAck, Instructions,
    InstructionsType, Phase, SyncError, SyncResult,
};
use crate::registry::{AgentEndpoint, ClientFactory};

/// Scripted answer to a heartbeat or server-online check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatReply {
    Healthy,
    /// Non-2xx status
    Unhealthy(u16),
    Unreachable,
}

/// Scripted answer to an instruction dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchReply {
    Accept,
    /// Non-2xx status
    Reject(u16),
    /// 2xx with an empty instruction id
    EmptyAck,
}

struct Execution {
    instructions_type: InstructionsType,
    state: ExecutionState,
    cursor: usize,
}

#[derive(Default)]
struct PeerState {
    heartbeats: VecDeque<HeartbeatReply>,
    server_online: VecDeque<HeartbeatReply>,
    dispatches: VecDeque<DispatchReply>,
    /// States returned by successive reads of a work execution; the last repeats
    script: Vec<ExecutionState>,
    state_read_failures: u32,
    executions: HashMap<String, Execution>,
    heartbeat_calls: usize,
    server_online_calls: usize,
    dispatch_calls: usize,
    state_calls: usize,
    sent: Vec<Instructions>,
    deleted: Vec<String>,
}

/// Scriptable in-memory peer. Clones share state.
#[derive(Clone)]
pub struct FakePeer {
    agent_id: String,
    host: String,
    inner: Arc<Mutex<PeerState>>,
}

impl FakePeer {
    /// A healthy peer whose executions complete on the first read.
    pub fn new(agent_id: impl Into<String>, host: impl Into<String>) -> Self {
        let state = PeerState {
            script: vec![ExecutionState::new(ExecutionStatus::ExecutionCompleted)],
            ..PeerState::default()
        };
        Self {
            agent_id: agent_id.into(),
            host: host.into(),
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Queue heartbeat answers; once drained the peer is healthy.
    pub fn script_heartbeats(&self, replies: impl IntoIterator<Item = HeartbeatReply>) -> &Self {
        self.inner.lock().unwrap().heartbeats.extend(replies);
        self
    }

    /// Queue server-online answers; once drained the server is online.
    pub fn script_server_online(
        &self,
        replies: impl IntoIterator<Item = HeartbeatReply>,
    ) -> &Self {
        self.inner.lock().unwrap().server_online.extend(replies);
        self
    }

    /// Queue dispatch answers; once drained dispatches are accepted.
    pub fn script_dispatches(&self, replies: impl IntoIterator<Item = DispatchReply>) -> &Self {
        self.inner.lock().unwrap().dispatches.extend(replies);
        self
    }

    /// States each dispatched execution walks through, one per read.
    pub fn script_states(&self, states: impl IntoIterator<Item = ExecutionState>) -> &Self {
        let states: Vec<_> = states.into_iter().collect();
        assert!(!states.is_empty(), "state script must not be empty");
        self.inner.lock().unwrap().script = states;
        self
    }

    /// Shorthand for [`script_states`](Self::script_states) from bare statuses.
    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = ExecutionStatus>) -> &Self {
        self.script_states(statuses.into_iter().map(ExecutionState::new))
    }

    /// Make the next `count` state reads fail as unreachable.
    pub fn fail_state_reads(&self, count: u32) -> &Self {
        self.inner.lock().unwrap().state_read_failures = count;
        self
    }

    pub fn heartbeat_calls(&self) -> usize {
        self.inner.lock().unwrap().heartbeat_calls
    }

    pub fn server_online_calls(&self) -> usize {
        self.inner.lock().unwrap().server_online_calls
    }

    pub fn dispatch_calls(&self) -> usize {
        self.inner.lock().unwrap().dispatch_calls
    }

    pub fn state_calls(&self) -> usize {
        self.inner.lock().unwrap().state_calls
    }

    /// Instructions accepted so far, in order.
    pub fn sent(&self) -> Vec<Instructions> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Types of accepted instructions, in order.
    pub fn sent_types(&self) -> Vec<InstructionsType> {
        self.sent().iter().map(|i| i.instructions_type).collect()
    }

    /// State ids deleted so far, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted.clone()
    }

    fn api_error(&self, phase: Phase, status: u16) -> SyncError {
        SyncError::Api {
            peer: self.host.clone(),
            phase,
            status,
            reason: ErrorReason::HttpNonSuccessResponse,
            detail: "scripted failure".to_string(),
        }
    }

    fn unreachable(&self, phase: Phase) -> SyncError {
        SyncError::Unreachable {
            peer: self.host.clone(),
            phase,
            detail: "scripted connection failure".to_string(),
        }
    }
}

#[async_trait]
impl AgentApi for FakePeer {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn base_address(&self) -> String {
        format!("fake://{}", self.host)
    }

    async fn heartbeat(&self) -> SyncResult<()> {
        let reply = {
            let mut inner = self.inner.lock().unwrap();
            inner.heartbeat_calls += 1;
            inner
                .heartbeats
                .pop_front()
                .unwrap_or(HeartbeatReply::Healthy)
        };
        match reply {
            HeartbeatReply::Healthy => Ok(()),
            HeartbeatReply::Unhealthy(status) => Err(self.api_error(Phase::ConfirmingPeer, status)),
            HeartbeatReply::Unreachable => Err(self.unreachable(Phase::ConfirmingPeer)),
        }
    }

    async fn server_online(&self) -> SyncResult<()> {
        let reply = {
            let mut inner = self.inner.lock().unwrap();
            inner.server_online_calls += 1;
            inner
                .server_online
                .pop_front()
                .unwrap_or(HeartbeatReply::Healthy)
        };
        match reply {
            HeartbeatReply::Healthy => Ok(()),
            HeartbeatReply::Unhealthy(status) => Err(self.api_error(Phase::ConfirmingPeer, status)),
            HeartbeatReply::Unreachable => Err(self.unreachable(Phase::ConfirmingPeer)),
        }
    }

    async fn send_instructions(&self, instructions: &Instructions) -> SyncResult<InstructionAck> {
        let mut inner = self.inner.lock().unwrap();
        inner.dispatch_calls += 1;
        match inner.dispatches.pop_front().unwrap_or(DispatchReply::Accept) {
            DispatchReply::Accept => {}
            DispatchReply::Reject(status) => {
                return Err(self.api_error(Phase::DispatchingInstructions, status))
            }
            DispatchReply::EmptyAck => return Ok(InstructionAck::new("")),
        }

        let id = uuid::Uuid::new_v4().to_string();
        let initial = match instructions.instructions_type {
            InstructionsType::ClientServerReset => ExecutionStatus::ResetInProgress,
            _ => ExecutionStatus::Pending,
        };
        inner.executions.insert(
            id.clone(),
            Execution {
                instructions_type: instructions.instructions_type,
                state: ExecutionState::new(initial),
                cursor: 0,
            },
        );
        inner.sent.push(instructions.clone());
        Ok(InstructionAck::new(id))
    }

    async fn get_state(&self, state_id: &str) -> SyncResult<Option<ExecutionState>> {
        let mut inner = self.inner.lock().unwrap();
        inner.state_calls += 1;
        if inner.state_read_failures > 0 {
            inner.state_read_failures -= 1;
            return Err(self.unreachable(Phase::PollingForCompletion));
        }

        let PeerState {
            script, executions, ..
        } = &mut *inner;
        let Some(execution) = executions.get_mut(state_id) else {
            return Ok(None);
        };

        if execution.instructions_type == InstructionsType::ClientServerReset {
            execution
                .state
                .advance(ExecutionStatus::ResetCompleted)
                .expect("reset execution already terminal");
            return Ok(Some(execution.state.clone()));
        }

        let next = script[execution.cursor.min(script.len() - 1)].clone();
        execution.cursor += 1;
        if let Err(e) = execution.state.advance(next.status) {
            panic!("state script violates status ordering: {e}");
        }
        execution.state = next;
        Ok(Some(execution.state.clone()))
    }

    async fn delete_state(&self, state_id: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.executions.remove(state_id);
        inner.deleted.push(state_id.to_string());
        Ok(())
    }
}

/// Factory handing out registered [`FakePeer`]s, a fresh handle per call.
#[derive(Default)]
pub struct FakeClientFactory {
    peers: Mutex<HashMap<String, FakePeer>>,
    created: Mutex<Vec<(String, AgentEndpoint)>>,
    constructions: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block each construction for `delay`, widening race windows in tests.
    pub fn with_construction_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Register a peer; returns a handle sharing its state.
    pub fn add_peer(&self, peer: FakePeer) -> FakePeer {
        self.peers
            .lock()
            .unwrap()
            .insert(peer.agent_id.to_lowercase(), peer.clone());
        peer
    }

    /// Unregister a peer; later constructions for it fail.
    pub fn remove_peer(&self, agent_id: &str) -> Option<FakePeer> {
        self.peers.lock().unwrap().remove(&agent_id.to_lowercase())
    }

    pub fn peer(&self, agent_id: &str) -> Option<FakePeer> {
        self.peers.lock().unwrap().get(&agent_id.to_lowercase()).cloned()
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Every `(agent id, endpoint)` a handle was built for, in order.
    pub fn created(&self) -> Vec<(String, AgentEndpoint)> {
        self.created.lock().unwrap().clone()
    }
}

impl ClientFactory for FakeClientFactory {
    fn create(&self, agent_id: &str, endpoint: &AgentEndpoint) -> SyncResult<AgentClient> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let peer = self.peer(agent_id).ok_or_else(|| {
            SyncError::Config(format!("no fake peer registered for '{agent_id}'"))
        })?;

        self.constructions.fetch_add(1, Ordering::SeqCst);
        self.created
            .lock()
            .unwrap()
            .push((agent_id.to_string(), endpoint.clone()));
        Ok(Arc::new(peer))
    }
}
