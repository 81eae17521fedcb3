//! Configuration loading, validation, and management for Taskloom.
//!
//! Loads configuration from `~/.taskloom/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use taskloom_core::AgentDefinition;

/// The root configuration structure.
///
/// Maps directly to `~/.taskloom/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Agent used by `chat` when none is given
    #[serde(default = "default_agent")]
    pub default_agent: String,

    /// How many nested sub-agent sessions a delegation chain may open
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Session and message persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Agent definitions keyed by id; built-in agents when empty
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,

    /// Pricing overrides
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_agent() -> String {
    "coder".into()
}
fn default_max_delegation_depth() -> u32 {
    4
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("max_tokens", &self.max_tokens)
            .field("default_agent", &self.default_agent)
            .field("max_delegation_depth", &self.max_delegation_depth)
            .field("providers", &self.providers)
            .field("tools", &self.tools)
            .field("store", &self.store)
            .field("agents", &self.agents)
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override (proxies, gateways)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra_headers: HashMap<String, String>,

    /// Prepended to every agent's system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_prefix: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .field("system_prompt_prefix", &self.system_prompt_prefix)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Root for file and shell tools; the process cwd when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Extra command prefixes the bash tool refuses, on top of the built-in list
    #[serde(default)]
    pub blocked_commands: Vec<String>,

    #[serde(default = "default_bash_timeout")]
    pub bash_timeout_secs: u64,
}

fn default_bash_timeout() -> u64 {
    60
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            blocked_commands: vec![],
            bash_timeout_secs: default_bash_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database file; `~/.taskloom/taskloom.db` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("taskloom.db"))
    }
}

/// One `[agents.<id>]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// All base tools when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_agents: Vec<String>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Pricing overrides layered over the built-in table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
    #[serde(default)]
    pub cache_write_per_m: f64,
    #[serde(default)]
    pub cache_read_per_m: f64,
}

const CODER_PROMPT: &str = "You are a software engineering agent working in the user's \
repository. Use the available tools to inspect and change files, run commands, and verify \
your work. Keep answers short and report what you changed.";

const TASK_PROMPT: &str = "You are a research sub-agent. Answer the delegated question using \
the read-only tools available to you, then reply with a concise, self-contained summary.";

impl AppConfig {
    /// Load configuration from the default path (~/.taskloom/config.toml).
    ///
    /// Also checks environment variables:
    /// - `TASKLOOM_API_KEY` (highest priority), then `ANTHROPIC_API_KEY`
    /// - `TASKLOOM_PROVIDER`
    /// - `TASKLOOM_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (std::env::var in production).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("TASKLOOM_API_KEY").or_else(|| {
            if self.api_key.is_none() {
                lookup("ANTHROPIC_API_KEY")
            } else {
                None
            }
        }) {
            self.api_key = Some(key);
        }

        if let Some(provider) = lookup("TASKLOOM_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("TASKLOOM_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskloom")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens must be greater than 0".into(),
            ));
        }

        if self.max_delegation_depth == 0 {
            return Err(ConfigError::ValidationError(
                "max_delegation_depth must be at least 1".into(),
            ));
        }

        if self.tools.bash_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tools.bash_timeout_secs must be greater than 0".into(),
            ));
        }

        let definitions = self.agent_definitions();
        for def in &definitions {
            for peer in &def.allowed_agents {
                if peer == &def.id {
                    return Err(ConfigError::ValidationError(format!(
                        "agent '{}' cannot delegate to itself",
                        def.id
                    )));
                }
                if !definitions.iter().any(|d| &d.id == peer) {
                    return Err(ConfigError::ValidationError(format!(
                        "agent '{}' delegates to unknown agent '{peer}'",
                        def.id
                    )));
                }
            }
        }

        if !definitions
            .iter()
            .any(|d| d.id == self.default_agent && !d.disabled)
        {
            return Err(ConfigError::ValidationError(format!(
                "default_agent '{}' is not defined or is disabled",
                self.default_agent
            )));
        }

        for (model, pricing) in &self.telemetry.custom_pricing {
            if pricing.input_per_m < 0.0 || pricing.output_per_m < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "pricing for '{model}' must be non-negative"
                )));
            }
        }

        Ok(())
    }

    /// API key for a provider: the provider table first, then the global key.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Check if an API key is available for the default provider.
    pub fn has_api_key(&self) -> bool {
        self.api_key_for(&self.default_provider).is_some()
    }

    /// Agent definitions, falling back to the built-in `coder` and `task`
    /// agents when none are configured. Sorted by id.
    pub fn agent_definitions(&self) -> Vec<AgentDefinition> {
        if self.agents.is_empty() {
            return builtin_agents();
        }

        self.agents
            .iter()
            .map(|(id, cfg)| AgentDefinition {
                id: id.clone(),
                name: cfg.name.clone().unwrap_or_else(|| id.clone()),
                provider: cfg.provider.clone(),
                model: cfg.model.clone(),
                system_prompt: cfg.system_prompt.clone(),
                allowed_tools: cfg.allowed_tools.clone(),
                allowed_agents: cfg.allowed_agents.clone(),
                disabled: cfg.disabled,
                max_tokens: cfg.max_tokens,
            })
            .collect()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config.agents = builtin_agents()
            .into_iter()
            .map(|d| {
                (
                    d.id.clone(),
                    AgentConfig {
                        name: Some(d.name),
                        system_prompt: d.system_prompt,
                        allowed_tools: d.allowed_tools,
                        allowed_agents: d.allowed_agents,
                        ..AgentConfig::default()
                    },
                )
            })
            .collect();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn builtin_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new("coder")
            .with_system_prompt(CODER_PROMPT)
            .with_allowed_agents(vec!["task".into()]),
        AgentDefinition::new("task")
            .with_system_prompt(TASK_PROMPT)
            .with_allowed_tools(
                ["view", "ls", "glob", "grep", "fetch"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            max_tokens: default_max_tokens(),
            default_agent: default_agent(),
            max_delegation_depth: default_max_delegation_depth(),
            providers: HashMap::new(),
            tools: ToolsConfig::default(),
            store: StoreConfig::default(),
            agents: BTreeMap::new(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "anthropic");
        assert_eq!(config.max_delegation_depth, 4);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_toml_roundtrips() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("anthropic"));
        assert!(toml_str.contains("[agents.coder]"));
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.agents.len(), 2);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_agent, "coder");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_agent = "lead"
max_delegation_depth = 2

[providers.anthropic]
api_key = "sk-file"

[tools]
blocked_commands = ["terraform"]

[store]
backend = "memory"

[agents.lead]
name = "Lead"
allowed_agents = ["helper"]

[agents.helper]
allowed_tools = ["view"]
max_tokens = 1024
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.tools.bash_timeout_secs, 60);
        assert_eq!(config.api_key_for("anthropic").as_deref(), Some("sk-file"));

        let defs = config.agent_definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].id, "helper");
        assert_eq!(defs[0].name, "helper");
        assert_eq!(defs[0].max_tokens, Some(1024));
        assert_eq!(defs[1].display_name(), "Lead");
        assert_eq!(defs[1].allowed_agents, vec!["helper".to_string()]);
    }

    #[test]
    fn parse_error_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_tokens = \"lots\"").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn unknown_peer_rejected() {
        let mut config = AppConfig::default();
        config.agents.insert(
            "coder".into(),
            AgentConfig {
                allowed_agents: vec!["ghost".into()],
                ..AgentConfig::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn self_delegation_rejected() {
        let mut config = AppConfig::default();
        config.agents.insert(
            "coder".into(),
            AgentConfig {
                allowed_agents: vec!["coder".into()],
                ..AgentConfig::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_depth_rejected() {
        let config = AppConfig {
            max_delegation_depth: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn disabled_default_agent_rejected() {
        let mut config = AppConfig::default();
        config.agents.insert(
            "coder".into(),
            AgentConfig {
                disabled: true,
                ..AgentConfig::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| match key {
            "ANTHROPIC_API_KEY" => Some("sk-env".into()),
            "TASKLOOM_MODEL" => Some("claude-3-5-haiku-latest".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.default_model, "claude-3-5-haiku-latest");
        assert_eq!(config.default_provider, "anthropic");
        assert!(config.has_api_key());
    }

    #[test]
    fn taskloom_key_beats_file_key() {
        let mut config = AppConfig {
            api_key: Some("sk-file".into()),
            ..AppConfig::default()
        };
        config.apply_env_overrides(|key| match key {
            "TASKLOOM_API_KEY" => Some("sk-taskloom".into()),
            "ANTHROPIC_API_KEY" => Some("sk-anthropic".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-taskloom"));
    }

    #[test]
    fn debug_redacts_keys() {
        let mut config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("sk-other".into()),
                ..ProviderConfig::default()
            },
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("sk-other"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn builtin_task_agent_is_read_only() {
        let defs = AppConfig::default().agent_definitions();
        let task = defs.iter().find(|d| d.id == "task").unwrap();
        let tools = task.allowed_tools.as_ref().unwrap();
        assert!(!tools.contains(&"bash".to_string()));
        assert!(tools.contains(&"view".to_string()));
    }
}
