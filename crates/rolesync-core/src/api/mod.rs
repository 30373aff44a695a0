//! Peer API surface
//!
//! `AgentApi` is the narrow interface the protocol uses to talk to one peer.
//! `HttpAgentClient` implements it over reqwest; `crate::fakes::FakePeer`
//! implements it in memory.

mod http;

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ExecutionState, InstructionAck, Instructions, SyncResult};

pub use http::HttpAgentClient;

/// Route prefix shared by every peer endpoint.
pub const API_PREFIX: &str = "api";

/// Operations a coordinator can perform against one peer's API.
///
/// Transport failures surface as `SyncError::Unreachable`, non-2xx responses
/// as `SyncError::Api`, and undecodable bodies as `SyncError::InvalidResponse`.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Logical agent id this handle addresses.
    fn agent_id(&self) -> &str;

    /// Host or IP of the peer, used in failure messages.
    fn host(&self) -> &str;

    /// `scheme://host:port` the handle sends requests to.
    fn base_address(&self) -> String;

    /// `GET /api/heartbeat`. Ok only for a 2xx response.
    async fn heartbeat(&self) -> SyncResult<()>;

    /// `HEAD /api/events`. Ok once the peer's server side signals it is
    /// online and ready for clients; the agent answers heartbeats earlier.
    async fn server_online(&self) -> SyncResult<()>;

    /// `POST /api/instructions`.
    async fn send_instructions(&self, instructions: &Instructions) -> SyncResult<InstructionAck>;

    /// `GET /api/state/{id}`. A 404 is `Ok(None)`.
    async fn get_state(&self, state_id: &str) -> SyncResult<Option<ExecutionState>>;

    /// `DELETE /api/state/{id}`. A 404 is success.
    async fn delete_state(&self, state_id: &str) -> SyncResult<()>;
}

/// Shared handle to a peer API.
pub type AgentClient = Arc<dyn AgentApi>;
