//! Wiring shared by the commands: stores, tools, providers and agents.

use std::sync::Arc;
use std::time::Duration;
use taskloom_agent::{AgentManager, AgentResources, initialize_agents};
use taskloom_config::{AppConfig, StoreBackend};
use taskloom_core::{AgentDefinition, MessageStore, SessionStore, StoreError, ToolRegistry};
use taskloom_providers::{ProviderRouter, build_from_config};
use taskloom_store::{InMemoryStore, SqliteStore};
use taskloom_telemetry::PricingTable;
use taskloom_tools::{ToolSettings, default_registry};
use tracing::debug;

/// Session and message stores, usually the same backend.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub messages: Arc<dyn MessageStore>,
}

pub async fn open_stores(config: &AppConfig) -> Result<Stores, StoreError> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            let path = config.store.database_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Storage(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
            let store = Arc::new(SqliteStore::new(&path.to_string_lossy()).await?);
            Ok(Stores {
                sessions: store.clone(),
                messages: store,
            })
        }
        StoreBackend::Memory => {
            let store = Arc::new(InMemoryStore::new());
            Ok(Stores {
                sessions: store.clone(),
                messages: store,
            })
        }
    }
}

pub fn router(config: &AppConfig) -> ProviderRouter {
    build_from_config(config, Arc::new(PricingTable::with_defaults()))
}

/// The built-in tools, rooted at the configured working directory.
pub fn base_tools(config: &AppConfig) -> std::io::Result<ToolRegistry> {
    let working_dir = match &config.tools.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let mut settings = ToolSettings::new(working_dir);
    settings.blocked_commands = config.tools.blocked_commands.clone();
    settings.bash_timeout = Duration::from_secs(config.tools.bash_timeout_secs);
    Ok(default_registry(&settings))
}

/// Agent definitions with each provider's system prompt prefix applied.
pub fn definitions(config: &AppConfig, router: &ProviderRouter) -> Vec<AgentDefinition> {
    config
        .agent_definitions()
        .into_iter()
        .map(|mut def| {
            let provider = def.provider.as_deref().unwrap_or(&config.default_provider);
            if let Some(prefix) = router.system_prompt_prefix(provider) {
                def.system_prompt = Some(match def.system_prompt.take() {
                    Some(prompt) => format!("{prefix}\n\n{prompt}"),
                    None => prefix.to_string(),
                });
            }
            def
        })
        .collect()
}

/// Everything `chat` needs.
pub struct Runtime {
    pub stores: Stores,
    pub manager: AgentManager,
}

impl Runtime {
    pub async fn build(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let router = router(config);
        let stores = open_stores(config).await?;
        let resources = AgentResources {
            sessions: stores.sessions.clone(),
            messages: stores.messages.clone(),
            base_tools: base_tools(config)?,
            max_delegation_depth: config.max_delegation_depth,
        };
        let definitions = definitions(config, &router);
        let manager = initialize_agents(
            &definitions,
            |def| router.resolve(def.provider.as_deref(), def.model.as_deref()),
            &resources,
        )?;
        debug!(agents = ?manager.list(), "Runtime ready");
        Ok(Self { stores, manager })
    }
}
