//! In-memory fakes for the state store (testing only)
//!
//! `MemoryStateStore` honours the same id normalization and absence
//! semantics as `FileStateStore` without touching the file system, and
//! counts calls per operation so tests can assert how often the store was hit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::paths::normalize_state_id;
use crate::store::StateStore;
use crate::StateResult;

/// In-memory state store backed by a `HashMap<normalized id, document>`.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    documents: Mutex<HashMap<String, Value>>,
    get_calls: AtomicUsize,
    save_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls to `get_state`, including rejected ids.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_state(&self, state_id: &str) -> StateResult<Option<Value>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let id = normalize_state_id(state_id)?;
        let documents = self.documents.lock().unwrap();
        Ok(documents.get(&id).cloned())
    }

    async fn save_state(&self, state_id: &str, document: &Value) -> StateResult<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        let id = normalize_state_id(state_id)?;
        let mut documents = self.documents.lock().unwrap();
        documents.insert(id, document.clone());
        Ok(())
    }

    async fn delete_state(&self, state_id: &str) -> StateResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let id = normalize_state_id(state_id)?;
        let mut documents = self.documents.lock().unwrap();
        documents.remove(&id);
        Ok(())
    }
}
