//! Instruction envelopes sent from the coordinator to peers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{SyncError, SyncResult};

/// What the peer is being asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionsType {
    Undefined,
    Profiling,
    ClientServerReset,
    ClientServerStartExecution,
    ClientServerStartStopExecution,
    ClientServerExit,
}

/// Primitive parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    /// Parse a command-line style value: booleans, integers, floats, else text.
    pub fn parse(raw: &str) -> Self {
        if let Ok(b) = raw.parse::<bool>() {
            ParameterValue::Bool(b)
        } else if let Ok(i) = raw.parse::<i64>() {
            ParameterValue::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            ParameterValue::Float(f)
        } else {
            ParameterValue::Text(raw.to_string())
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(v) => write!(f, "{v}"),
            ParameterValue::Int(v) => write!(f, "{v}"),
            ParameterValue::Float(v) => write!(f, "{v}"),
            ParameterValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        ParameterValue::Int(v.into())
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        ParameterValue::Text(v)
    }
}

/// One component the peer should execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
}

impl Component {
    pub fn new(component_type: impl Into<String>) -> Self {
        Self {
            component_type: component_type.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Typed command envelope. Built right before dispatch and never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    #[serde(rename = "type")]
    pub instructions_type: InstructionsType,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl Instructions {
    pub fn new(instructions_type: InstructionsType) -> Self {
        Self {
            instructions_type,
            components: Vec::new(),
        }
    }

    pub fn start_execution(components: Vec<Component>) -> Self {
        Self {
            instructions_type: InstructionsType::ClientServerStartExecution,
            components,
        }
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    /// Reject envelopes a peer could never act on.
    pub fn validate(&self) -> SyncResult<()> {
        if self.instructions_type == InstructionsType::Undefined {
            return Err(SyncError::InvalidInstructions(
                "instructions type is undefined".into(),
            ));
        }

        let needs_components = matches!(
            self.instructions_type,
            InstructionsType::Profiling
                | InstructionsType::ClientServerStartExecution
                | InstructionsType::ClientServerStartStopExecution
        );
        if needs_components && self.components.is_empty() {
            return Err(SyncError::InvalidInstructions(format!(
                "{:?} instructions require at least one component",
                self.instructions_type
            )));
        }

        if let Some(blank) = self
            .components
            .iter()
            .position(|c| c.component_type.trim().is_empty())
        {
            return Err(SyncError::InvalidInstructions(format!(
                "component #{blank} has no type"
            )));
        }
        Ok(())
    }

    /// Short description used in logs and failure messages.
    pub fn describe(&self) -> String {
        if self.components.is_empty() {
            return format!("{:?}", self.instructions_type);
        }
        self.components
            .iter()
            .map(|c| c.component_type.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A peer's acknowledgment of received instructions: `{ "id": ..., ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionAck {
    pub id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InstructionAck {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extra: serde_json::Map::new(),
        }
    }
}
