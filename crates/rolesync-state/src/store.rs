//! Storage trait for persisted state documents.
//!
//! Guarantees every implementation must uphold:
//! - `save_state` then `get_state` returns a document deep-equal to the saved one.
//! - `get_state` for an id never saved returns `Ok(None)`, not an error.
//! - `delete_state` for an absent id is a no-op.
//! - A read sees either the whole previous document or the whole new one.
//! - State ids are case-insensitive.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StateError;
use crate::StateResult;

/// Durable key to JSON document store.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a document. `Ok(None)` means no document exists.
    async fn get_state(&self, state_id: &str) -> StateResult<Option<Value>>;

    /// Create or overwrite a document (last writer wins).
    async fn save_state(&self, state_id: &str, document: &Value) -> StateResult<()>;

    /// Remove a document. Absent ids are not an error.
    async fn delete_state(&self, state_id: &str) -> StateResult<()>;
}

/// Typed helpers over [`StateStore`].
#[async_trait]
pub trait StateStoreExt: StateStore {
    async fn get_state_as<T>(&self, state_id: &str) -> StateResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_state(state_id).await? {
            Some(document) => serde_json::from_value(document)
                .map(Some)
                .map_err(|e| StateError::Corrupt {
                    state_id: state_id.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn save_state_as<T>(&self, state_id: &str, value: &T) -> StateResult<()>
    where
        T: Serialize + Sync,
    {
        let document = serde_json::to_value(value)?;
        self.save_state(state_id, &document).await
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}
