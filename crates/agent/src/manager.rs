//! Agent directory and two-pass initialization from definitions.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use taskloom_core::error::{AgentError, ProviderError};
use taskloom_core::provider::Provider;
use taskloom_core::store::{MessageStore, SessionStore};
use taskloom_core::tool::ToolRegistry;
use taskloom_core::AgentDefinition;
use tracing::{debug, info, warn};

use crate::agent_tool::{AgentTool, DEFAULT_MAX_DELEGATION_DEPTH};
use crate::loop_runner::AgentLoop;

/// Maps agent ids to their loops and builds delegation tools between them.
pub struct AgentManager {
    agents: RwLock<HashMap<String, AgentLoop>>,
    sessions: Arc<dyn SessionStore>,
    max_delegation_depth: u32,
}

impl AgentManager {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            sessions,
            max_delegation_depth: DEFAULT_MAX_DELEGATION_DEPTH,
        }
    }

    pub fn with_max_delegation_depth(mut self, depth: u32) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    /// Register an agent, replacing any previous one with the same id.
    pub fn register(&self, id: impl Into<String>, agent: AgentLoop) {
        self.agents.write().insert(id.into(), agent);
    }

    pub fn get(&self, id: &str) -> Option<AgentLoop> {
        self.agents.read().get(id).cloned()
    }

    /// Registered agent ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wrap a registered agent as an `agent_<id>` tool.
    pub fn create_agent_tool(&self, agent_id: &str) -> Result<AgentTool, AgentError> {
        let agent = self
            .get(agent_id)
            .ok_or_else(|| AgentError::AgentNotFound(agent_id.to_string()))?;
        Ok(AgentTool::new(agent_id, agent, self.sessions.clone())
            .with_max_depth(self.max_delegation_depth))
    }

    /// Cancel every session of every agent.
    pub async fn cancel_all(&self) {
        let agents: Vec<AgentLoop> = self.agents.read().values().cloned().collect();
        for agent in agents {
            agent.cancel_all().await;
        }
    }
}

impl std::fmt::Debug for AgentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentManager")
            .field("agents", &self.list())
            .field("max_delegation_depth", &self.max_delegation_depth)
            .finish()
    }
}

/// Shared collaborators for every agent built by [`initialize_agents`].
#[derive(Clone)]
pub struct AgentResources {
    pub sessions: Arc<dyn SessionStore>,
    pub messages: Arc<dyn MessageStore>,
    /// Tools every agent may draw from, narrowed by `allowed_tools`
    pub base_tools: ToolRegistry,
    pub max_delegation_depth: u32,
}

fn build_agent(
    definition: &AgentDefinition,
    provider: Arc<dyn Provider>,
    resources: &AgentResources,
    agent_tools: Vec<AgentTool>,
) -> AgentLoop {
    let mut tools = match &definition.allowed_tools {
        Some(allowed) => resources.base_tools.filtered(allowed),
        None => resources.base_tools.clone(),
    };
    for tool in agent_tools {
        tools.register(Arc::new(tool));
    }

    let mut agent = AgentLoop::new(
        definition.id.clone(),
        provider,
        resources.sessions.clone(),
        resources.messages.clone(),
    )
    .with_name(definition.display_name())
    .with_tools(tools);
    if let Some(prompt) = &definition.system_prompt {
        agent = agent.with_system_prompt(prompt.clone());
    }
    if let Some(max_tokens) = definition.max_tokens {
        agent = agent.with_max_tokens(max_tokens);
    }
    agent
}

/// Build every enabled agent.
///
/// Pass one builds each agent without delegation tools. Pass two rebuilds
/// the agents that list `allowed_agents`, giving them an `agent_<id>` tool
/// for every first-pass peer they name. Unknown or disabled peers are
/// skipped with a warning.
pub fn initialize_agents<F>(
    definitions: &[AgentDefinition],
    resolve_provider: F,
    resources: &AgentResources,
) -> Result<AgentManager, AgentError>
where
    F: Fn(&AgentDefinition) -> Result<Arc<dyn Provider>, ProviderError>,
{
    let manager = AgentManager::new(resources.sessions.clone())
        .with_max_delegation_depth(resources.max_delegation_depth);

    let mut first_pass: HashMap<String, (AgentLoop, Arc<dyn Provider>)> = HashMap::new();
    for definition in definitions.iter().filter(|d| !d.disabled) {
        let provider = resolve_provider(definition)?;
        let agent = build_agent(definition, provider.clone(), resources, Vec::new());
        debug!(agent = %definition.id, model = %agent.model().id, "Built agent");
        manager.register(definition.id.clone(), agent.clone());
        first_pass.insert(definition.id.clone(), (agent, provider));
    }

    for definition in definitions.iter().filter(|d| !d.disabled) {
        if definition.allowed_agents.is_empty() {
            continue;
        }
        let mut agent_tools = Vec::new();
        for peer_id in &definition.allowed_agents {
            match first_pass.get(peer_id) {
                Some((peer, _)) => agent_tools.push(
                    AgentTool::new(peer_id.clone(), peer.clone(), resources.sessions.clone())
                        .with_max_depth(resources.max_delegation_depth),
                ),
                None => warn!(agent = %definition.id, peer = %peer_id, "Skipping unknown or disabled peer agent"),
            }
        }
        if agent_tools.is_empty() {
            continue;
        }
        let Some((_, provider)) = first_pass.get(&definition.id) else {
            continue;
        };
        let agent = build_agent(definition, provider.clone(), resources, agent_tools);
        manager.register(definition.id.clone(), agent);
    }

    info!(agents = ?manager.list(), "Agents initialized");
    Ok(manager)
}
