//! State id normalization and on-disk layout.
//!
//! Layout: `<state dir>/<lowercased state id>.json`

use std::path::{Path, PathBuf};

use crate::error::StateError;
use crate::StateResult;

/// Environment variable overriding the platform state directory.
pub const STATE_DIR_ENV: &str = "ROLESYNC_STATE_DIR";

const STATE_FILE_EXTENSION: &str = "json";

/// Lower-case a state id and reject ids that cannot map to a single file.
pub fn normalize_state_id(state_id: &str) -> StateResult<String> {
    let trimmed = state_id.trim();
    let invalid = |reason: &str| StateError::InvalidStateId {
        state_id: state_id.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if trimmed.contains(['/', '\\', '\0']) {
        return Err(invalid("must not contain path separators"));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(invalid("must not be a relative path component"));
    }

    Ok(trimmed.to_lowercase())
}

/// Path of the state file for `state_id` under `state_dir`.
pub fn state_file_path(state_dir: &Path, state_id: &str) -> StateResult<PathBuf> {
    let id = normalize_state_id(state_id)?;
    Ok(state_dir.join(format!("{id}.{STATE_FILE_EXTENSION}")))
}

/// Platform state directory: `$ROLESYNC_STATE_DIR`, else `state/` next to
/// the running executable, else `./state`.
pub fn default_state_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(STATE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("state")))
        .unwrap_or_else(|| PathBuf::from("state"))
}
