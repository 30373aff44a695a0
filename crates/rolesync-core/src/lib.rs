//! Rolesync-Core: coordinate a distributed workload across role-assigned peers
//!
//! The coordinator resolves the peers of a role from the run topology,
//! confirms they are alive, dispatches instructions and polls each peer
//! until it reports a terminal status.
//!
//! ## Layer 2 - Protocol
//!
//! Focus: one cancellable workflow per peer, restarted from scratch by the
//! workflow retry policy, joined before the role-wide result is reported.
//!
//! ## Key Components
//!
//! - `RoleSynchronizer`: `wait_for_role`, `send_instructions_and_await_completion`, `reset_role`
//! - `AgentClientRegistry`: one cached API handle per agent id, atomic recycle
//! - `AgentApi` / `HttpAgentClient`: the peer's heartbeat, server-online, instructions and state endpoints
//! - `poll_until`: fixed-interval polling with deadline and cancellation
//! - `ShutdownNotifier`: explicit exit notification list
//! - `SyncConfig`: TOML configuration and port overrides

pub mod api;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod polling;
pub mod protocol;
pub mod registry;
pub mod telemetry;

pub use api::{AgentApi, AgentClient, HttpAgentClient};
pub use config::{PortResolver, SyncConfig, DEFAULT_API_PORT};
pub use domain::{
    AgentInstance, Component, ErrorReason, ExecutionState, ExecutionStatus, InstructionAck,
    Instructions, InstructionsType, ParameterValue, Phase, SyncError, SyncResult, Topology,
    TopologyReader,
};
pub use polling::{poll_until, PollSettings, PollStep};
pub use protocol::{
    DispatchJournal, DispatchRecord, NotifyFailure, PeerReport, RoleSummary, RoleSynchronizer,
    ShutdownNotifier, SyncSettings,
};
pub use registry::{AgentClientRegistry, AgentEndpoint, ClientFactory, HttpClientFactory};
pub use telemetry::init_tracing;

pub use rolesync_retry::CancelToken;
