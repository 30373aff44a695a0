use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rolesync_retry::policies::{self, RetrySettings};
use rolesync_retry::RetryPolicy;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::StateError;
use crate::paths;
use crate::store::StateStore;
use crate::StateResult;

/// File-backed state store.
///
/// Every operation takes the store's exclusive lock for the whole
/// retry-wrapped I/O, so all callers sharing one instance are serialized.
/// The I/O runs on the blocking pool and owns the lock guard, so a caller
/// that drops its future never releases the lock under a write still in
/// progress. Writes go to a temp file in the state directory and are renamed
/// over the target, so readers never observe a partial document. Nothing
/// guards against a second process writing the same directory.
pub struct FileStateStore {
    state_dir: PathBuf,
    lock: Arc<Mutex<()>>,
    retry: RetryPolicy<StateError>,
}

impl FileStateStore {
    /// Create a store rooted at `state_dir` using the file-operation policy.
    /// The directory is created lazily on first save.
    pub fn new(state_dir: impl Into<PathBuf>, settings: &RetrySettings) -> StateResult<Self> {
        let retry = policies::file_operations(settings)
            .map_err(|e| StateError::Config(e.to_string()))?;
        Ok(Self::with_policy(state_dir, retry))
    }

    pub fn with_policy(state_dir: impl Into<PathBuf>, retry: RetryPolicy<StateError>) -> Self {
        Self {
            state_dir: state_dir.into(),
            lock: Arc::new(Mutex::new(())),
            retry,
        }
    }

    /// Store rooted at the platform state directory.
    pub fn at_default_location(settings: &RetrySettings) -> StateResult<Self> {
        Self::new(paths::default_state_dir(), settings)
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Path of the file holding `state_id`.
    pub fn state_path(&self, state_id: &str) -> StateResult<PathBuf> {
        paths::state_file_path(&self.state_dir, state_id)
    }

    /// Run `operation` under the retry policy on the blocking pool while
    /// holding the store lock.
    async fn run_locked<T, F>(&self, operation: F) -> StateResult<T>
    where
        T: Send + 'static,
        F: FnMut() -> StateResult<T> + Send + 'static,
    {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let retry = self.retry.clone();

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            retry.execute(operation)
        })
        .await
        .map_err(|e| StateError::Task(e.to_string()))?
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    #[instrument(skip(self), fields(dir = %self.state_dir.display()))]
    async fn get_state(&self, state_id: &str) -> StateResult<Option<Value>> {
        let path = self.state_path(state_id)?;
        let id = state_id.to_string();

        let document = self.run_locked(move || read_document(&id, &path)).await?;

        debug!(found = document.is_some(), "read state document");
        Ok(document)
    }

    #[instrument(skip(self, document), fields(dir = %self.state_dir.display()))]
    async fn save_state(&self, state_id: &str, document: &Value) -> StateResult<()> {
        let path = self.state_path(state_id)?;
        let content = serde_json::to_vec_pretty(document)?;
        let bytes = content.len();
        let dir = self.state_dir.clone();

        self.run_locked(move || write_document(&dir, &path, &content))
            .await?;

        debug!(bytes, "saved state document");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %self.state_dir.display()))]
    async fn delete_state(&self, state_id: &str) -> StateResult<()> {
        let path = self.state_path(state_id)?;

        self.run_locked(move || remove_document(&path)).await?;

        debug!("deleted state document");
        Ok(())
    }
}

fn read_document(state_id: &str, path: &Path) -> StateResult<Option<Value>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateError::io(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StateError::Corrupt {
            state_id: state_id.to_string(),
            reason: e.to_string(),
        })
}

fn write_document(dir: &Path, path: &Path, content: &[u8]) -> StateResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| StateError::io(dir, e))?;

    // Temp file in the same directory so the rename stays on one volume.
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StateError::io(dir, e))?;
    tmp.write_all(content)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StateError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| StateError::io(path, e.error))?;
    Ok(())
}

fn remove_document(path: &Path) -> StateResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StateError::io(path, e)),
    }
}
