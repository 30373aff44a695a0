//! Coordinator configuration
//!
//! Loaded from TOML with a default for every key, then overlaid with
//! `ROLESYNC_*` environment variables.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rolesync_retry::policies::{self, RetrySettings};
use rolesync_retry::RetryPolicy;
use rolesync_state::paths;
use serde::{Deserialize, Serialize};

use crate::domain::{AgentInstance, SyncError, SyncResult};
use crate::protocol::SyncSettings;

/// Default port of a peer's API.
pub const DEFAULT_API_PORT: u16 = 4500;

/// Suffix of the per-agent port override variable, e.g. `server-01_Port`.
pub const PORT_ENV_SUFFIX: &str = "_Port";

const DAY_SECS: u64 = 24 * 60 * 60;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves the API port of an agent.
///
/// Precedence: `{agentId}_Port` variable, override keyed by agent id,
/// the agent's own topology port, override keyed by role, default port.
#[derive(Clone)]
pub struct PortResolver {
    default_port: u16,
    overrides: BTreeMap<String, u16>,
    env: EnvLookup,
}

impl PortResolver {
    /// Resolver reading `{agentId}_Port` from the process environment.
    pub fn new(default_port: u16) -> Self {
        Self {
            default_port,
            overrides: BTreeMap::new(),
            env: Arc::new(|key| std::env::var(key).ok()),
        }
    }

    /// Add an override keyed by agent id or role name (case-insensitive).
    pub fn with_override(mut self, key: &str, port: u16) -> Self {
        self.overrides.insert(key.trim().to_lowercase(), port);
        self
    }

    /// Replace the variable lookup, mainly for tests.
    pub fn with_env_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.env = Arc::new(lookup);
        self
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    /// Environment, then agent override, then topology port, then role
    /// override, then the default. An environment value that is not a
    /// usable port (including 0) is skipped.
    pub fn resolve(&self, agent: &AgentInstance) -> u16 {
        let env_key = format!("{}{PORT_ENV_SUFFIX}", agent.name);
        let env_port = (self.env)(&env_key)
            .and_then(|v| v.trim().parse::<u16>().ok())
            .filter(|port| *port != 0);
        if let Some(port) = env_port {
            return port;
        }
        if let Some(port) = self.overrides.get(&agent.name.trim().to_lowercase()) {
            return *port;
        }
        if let Some(port) = agent.port {
            return port;
        }
        if let Some(port) = self.overrides.get(&agent.role.trim().to_lowercase()) {
            return *port;
        }
        self.default_port
    }
}

impl fmt::Debug for PortResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortResolver")
            .field("default_port", &self.default_port)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}

/// Coordinator settings. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub default_api_port: u16,
    /// Port overrides keyed by agent id or role name
    pub port_overrides: BTreeMap<String, u16>,
    pub heartbeat_timeout_secs: u64,
    pub state_confirmation_timeout_secs: u64,
    pub completion_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub file_retry: RetrySettings,
    pub workflow_retry: RetrySettings,
    /// Falls back to `ROLESYNC_STATE_DIR`, then `<exe dir>/state`
    pub state_dir: Option<PathBuf>,
    pub reset_before_dispatch: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_api_port: DEFAULT_API_PORT,
            port_overrides: BTreeMap::new(),
            heartbeat_timeout_secs: 600,
            state_confirmation_timeout_secs: 600,
            completion_timeout_secs: 90 * DAY_SECS,
            poll_interval_ms: 1_000,
            request_timeout_secs: 60,
            file_retry: RetrySettings::file_default(),
            workflow_retry: RetrySettings::workflow_default(),
            state_dir: None,
            reset_before_dispatch: false,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> SyncResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SyncError::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Overlay `ROLESYNC_DEFAULT_API_PORT`, `ROLESYNC_POLL_INTERVAL_MS`,
    /// `ROLESYNC_COMPLETION_TIMEOUT_SECS` and `ROLESYNC_STATE_DIR`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> SyncResult<()> {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> SyncResult<T> {
            raw.trim()
                .parse()
                .map_err(|_| SyncError::Config(format!("{key}='{raw}' is not a valid value")))
        }

        if let Some(raw) = lookup("ROLESYNC_DEFAULT_API_PORT") {
            self.default_api_port = parsed("ROLESYNC_DEFAULT_API_PORT", raw)?;
        }
        if let Some(raw) = lookup("ROLESYNC_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parsed("ROLESYNC_POLL_INTERVAL_MS", raw)?;
        }
        if let Some(raw) = lookup("ROLESYNC_COMPLETION_TIMEOUT_SECS") {
            self.completion_timeout_secs = parsed("ROLESYNC_COMPLETION_TIMEOUT_SECS", raw)?;
        }
        if let Some(raw) = lookup(paths::STATE_DIR_ENV) {
            if !raw.trim().is_empty() {
                self.state_dir = Some(PathBuf::from(raw));
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.default_api_port == 0 {
            return Err(SyncError::Config("default_api_port must be non-zero".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(SyncError::Config("poll_interval_ms must be positive".into()));
        }
        for (name, value) in [
            ("heartbeat_timeout_secs", self.heartbeat_timeout_secs),
            ("state_confirmation_timeout_secs", self.state_confirmation_timeout_secs),
            ("completion_timeout_secs", self.completion_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value == 0 {
                return Err(SyncError::Config(format!("{name} must be positive")));
            }
        }
        for (name, retry) in [("file_retry", self.file_retry), ("workflow_retry", self.workflow_retry)] {
            if retry.max_attempts == 0 {
                return Err(SyncError::Config(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
        }
        if let Some((key, _)) = self.port_overrides.iter().find(|(_, port)| **port == 0) {
            return Err(SyncError::Config(format!("port override for '{key}' is zero")));
        }
        Ok(())
    }

    pub fn port_resolver(&self) -> PortResolver {
        self.port_overrides
            .iter()
            .fold(PortResolver::new(self.default_api_port), |resolver, (key, port)| {
                resolver.with_override(key, *port)
            })
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            state_confirmation_timeout: Duration::from_secs(self.state_confirmation_timeout_secs),
            completion_timeout: Duration::from_secs(self.completion_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            reset_before_dispatch: self.reset_before_dispatch,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn workflow_policy(&self) -> SyncResult<RetryPolicy<SyncError>> {
        policies::workflow(&self.workflow_retry).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(paths::default_state_dir)
    }
}
