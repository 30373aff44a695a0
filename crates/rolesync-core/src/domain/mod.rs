//! Domain types shared by the client registry and the synchronization protocol.

pub mod error;
pub mod execution;
pub mod instructions;
pub mod topology;

pub use error::{ErrorReason, Phase, SyncError, SyncResult};
pub use execution::{ExecutionState, ExecutionStatus, InvalidTransition};
pub use instructions::{Component, InstructionAck, Instructions, InstructionsType, ParameterValue};
pub use topology::{AgentInstance, Topology, TopologyReader};
