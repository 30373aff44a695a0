//! Rolesync-State: durable JSON documents keyed by state id
//!
//! This crate provides the local persistence layer used by the coordinator
//! and its surrounding components to survive process restarts.
//!
//! ## Layer 1 - Data/Persistence
//!
//! Focus: whole-document reads and writes, serialized through one lock per
//! store instance, with file contention absorbed by the file-operation
//! retry policy.
//!
//! ## Key Components
//!
//! - `StateStore`: the backend-agnostic async contract
//! - `FileStateStore`: one pretty-printed `{state id}.json` per document
//! - `fakes::MemoryStateStore`: in-memory implementation for tests

mod error;
pub mod fakes;
mod fs;
pub mod paths;
mod store;

pub use error::StateError;
pub use fs::FileStateStore;
pub use store::{StateStore, StateStoreExt};

/// Result type for state store operations
pub type StateResult<T> = std::result::Result<T, StateError>;
