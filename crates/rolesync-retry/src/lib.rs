//! Rolesync-Retry: bounded retry and cancellation for rolesync
//!
//! Every remote call the coordinator makes and every state file operation
//! runs through a [`RetryPolicy`]. Policies are built once and shared;
//! they never change after construction.
//!
//! ## Layer 0 - Resilience
//!
//! Focus: exact attempt accounting and cancellation that always wins over retry.
//!
//! ## Key Components
//!
//! - `RetryPolicy`: attempt budget + backoff + transient-error predicate
//! - `CancelToken`: a single cancellation signal threaded through every await
//! - `policies`: the standing file-operation and workflow policies

mod cancel;
mod error;
pub mod policies;
mod policy;

pub use cancel::CancelToken;
pub use error::{Cancelled, InvalidPolicy};
pub use policies::RetrySettings;
pub use policy::{Backoff, RetryClassify, RetryPolicy};
