//! Agent definitions, state, and result events.

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::message::Message;

/// Static description of an agent, usually read from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Identifier used for lookup and the `agent_<id>` delegation tool
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Provider override; the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model override; the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Names from the base tool set; all tools when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,

    /// Peer agents this agent may delegate to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_agents: Vec<String>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = Some(tools);
        self
    }

    pub fn with_allowed_agents(mut self, agents: Vec<String>) -> Self {
        self.allowed_agents = agents;
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Whether any session of an agent has a request in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEventKind {
    Response,
    Error,
}

/// The terminal event of a turn.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub kind: AgentEventKind,

    /// Final assistant message (Response only)
    pub message: Option<Message>,

    /// Why the turn failed (Error only)
    pub error: Option<AgentError>,

    /// Set on Response
    pub done: bool,
}

impl AgentEvent {
    pub fn response(message: Message) -> Self {
        Self {
            kind: AgentEventKind::Response,
            message: Some(message),
            error: None,
            done: true,
        }
    }

    pub fn error(error: AgentError) -> Self {
        Self {
            kind: AgentEventKind::Error,
            message: None,
            error: Some(error),
            done: false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(AgentError::is_cancelled)
    }
}
