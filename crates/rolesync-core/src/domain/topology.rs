//! Run topology: which agents take part in a run, in which role, and where
//! their APIs listen.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{SyncError, SyncResult};

/// A peer participating in the run. Immutable once the topology is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInstance {
    /// Unique, stable agent id
    pub name: String,
    /// Role name, e.g. "Client" or "Server"
    pub role: String,
    /// IP address or host name of the agent's API
    #[serde(alias = "ipAddress", alias = "host")]
    pub ip_address: String,
    /// Explicit API port; falls back to configured defaults when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl AgentInstance {
    pub fn new(name: impl Into<String>, role: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            ip_address: ip_address.into(),
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.eq_ignore_ascii_case(role)
    }
}

impl fmt::Display for AgentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.role, self.ip_address)
    }
}

/// Read access to the run topology.
pub trait TopologyReader: Send + Sync {
    /// Agents assigned to `role`, in topology order. Role match is case-insensitive.
    fn agents_for_role(&self, role: &str) -> Vec<AgentInstance>;
}

/// Validated run topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TopologyFile", into = "TopologyFile")]
pub struct Topology {
    agents: Vec<AgentInstance>,
}

#[derive(Serialize, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    agents: Vec<AgentInstance>,
}

impl TryFrom<TopologyFile> for Topology {
    type Error = SyncError;

    fn try_from(file: TopologyFile) -> SyncResult<Self> {
        Topology::new(file.agents)
    }
}

impl From<Topology> for TopologyFile {
    fn from(topology: Topology) -> Self {
        TopologyFile {
            agents: topology.agents,
        }
    }
}

impl Topology {
    /// Validate and build a topology. Names must be unique (case-insensitive)
    /// and every field non-empty.
    pub fn new(agents: Vec<AgentInstance>) -> SyncResult<Self> {
        let mut seen = HashSet::new();
        for agent in &agents {
            if agent.name.trim().is_empty() {
                return Err(SyncError::Topology("agent name must not be empty".into()));
            }
            if agent.role.trim().is_empty() {
                return Err(SyncError::Topology(format!(
                    "agent '{}' has no role",
                    agent.name
                )));
            }
            if agent.ip_address.trim().is_empty() {
                return Err(SyncError::Topology(format!(
                    "agent '{}' has no IP address or host",
                    agent.name
                )));
            }
            if !seen.insert(agent.name.to_lowercase()) {
                return Err(SyncError::Topology(format!(
                    "duplicate agent name '{}'",
                    agent.name
                )));
            }
        }
        Ok(Self { agents })
    }

    pub fn from_toml_str(content: &str) -> SyncResult<Self> {
        toml::from_str(content).map_err(|e| SyncError::Topology(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> SyncResult<Self> {
        serde_json::from_str(content).map_err(|e| SyncError::Topology(e.to_string()))
    }

    /// Load from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Topology(format!("cannot read {}: {e}", path.display())))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    pub fn agents(&self) -> &[AgentInstance] {
        &self.agents
    }

    pub fn find(&self, name: &str) -> Option<&AgentInstance> {
        self.agents.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Distinct role names in first-seen order.
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = Vec::new();
        for agent in &self.agents {
            if !roles.iter().any(|r| r.eq_ignore_ascii_case(&agent.role)) {
                roles.push(&agent.role);
            }
        }
        roles
    }
}

impl TopologyReader for Topology {
    fn agents_for_role(&self, role: &str) -> Vec<AgentInstance> {
        self.agents
            .iter()
            .filter(|a| a.has_role(role))
            .cloned()
            .collect()
    }
}
