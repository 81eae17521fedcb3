//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world:
//! execute shell commands, read/write files, search, fetch URLs, or
//! delegate to another agent.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool-use id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON document
    pub input: String,
}

impl ToolCall {
    /// Decode the JSON input into the tool's parameter type.
    /// An empty input is treated as `{}`.
    pub fn parse_input<T: DeserializeOwned>(&self) -> std::result::Result<T, ToolError> {
        let raw = if self.input.trim().is_empty() {
            "{}"
        } else {
            self.input.as_str()
        };
        serde_json::from_str(raw).map_err(|e| {
            ToolError::InvalidArguments(format!("error parsing parameters for {}: {e}", self.name))
        })
    }
}

/// The outcome of a tool execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// The output content shown to the model
    pub content: String,

    /// Optional structured data (JSON), not shown to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,

    /// The tool ran but reports a failure
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
            is_error: true,
        }
    }

    pub fn with_metadata<M: Serialize>(mut self, metadata: &M) -> Self {
        self.metadata = serde_json::to_string(metadata).ok();
        self
    }
}

/// Name, description and parameter schema advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// JSON Schema `properties` object
    pub parameters: serde_json::Value,
    pub required: Vec<String>,
}

impl ToolInfo {
    /// Convert into a ToolDefinition for sending to the LLM.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": self.parameters,
                "required": self.required,
            }),
        }
    }
}

/// Per-call context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Session the calling turn belongs to
    pub session_id: String,

    /// Assistant message that requested the call
    pub message_id: String,

    /// Fires when the turn is cancelled
    pub cancel: CancellationToken,
}

/// The core Tool trait.
///
/// Each tool (bash, view, edit, fetch, agent delegation, etc.) implements
/// this trait. Tools are registered in the ToolRegistry and made available
/// to the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "bash", "view").
    fn name(&self) -> &str;

    /// Schema and description sent to the LLM.
    fn info(&self) -> ToolInfo;

    /// Execute the call.
    ///
    /// `Ok` with `is_error` set is a recoverable failure reported back to
    /// the model. `Err(ToolError::PermissionDenied)` stops the turn.
    async fn run(
        &self,
        ctx: &ToolContext,
        call: ToolCall,
    ) -> std::result::Result<ToolResponse, ToolError>;
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up tools when the LLM requests them
///
/// Cheap to clone; tools are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All tool definitions, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.info().to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// A registry holding only the named tools. Unknown names are ignored.
    pub fn filtered(&self, allowed: &[String]) -> Self {
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| allowed.iter().any(|a| a == *name))
            .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
            .collect();
        Self { tools }
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[derive(Deserialize)]
    struct EchoParams {
        text: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn info(&self) -> ToolInfo {
            ToolInfo {
                name: "echo".into(),
                description: "Echoes back the input".into(),
                parameters: serde_json::json!({ "text": { "type": "string" } }),
                required: vec!["text".into()],
            }
        }

        async fn run(
            &self,
            _ctx: &ToolContext,
            call: ToolCall,
        ) -> std::result::Result<ToolResponse, ToolError> {
            let params: EchoParams = call.parse_input()?;
            Ok(ToolResponse::text(params.text))
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn info(&self) -> ToolInfo {
            ToolInfo {
                name: self.0.into(),
                description: String::new(),
                parameters: serde_json::json!({}),
                required: vec![],
            }
        }

        async fn run(
            &self,
            _ctx: &ToolContext,
            _call: ToolCall,
        ) -> std::result::Result<ToolResponse, ToolError> {
            Ok(ToolResponse::default())
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: "s".into(),
            message_id: "m".into(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = ToolRegistry::new().with(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn definitions_are_sorted_and_wrapped_in_object_schema() {
        let registry = ToolRegistry::new()
            .with(Arc::new(NamedTool("view")))
            .with(Arc::new(EchoTool))
            .with(Arc::new(NamedTool("bash")));
        let defs = registry.definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["bash", "echo", "view"]);
        assert_eq!(defs[1].parameters["type"], "object");
        assert_eq!(defs[1].parameters["required"][0], "text");
    }

    #[test]
    fn filtered_keeps_only_allowed() {
        let registry = ToolRegistry::new()
            .with(Arc::new(NamedTool("view")))
            .with(Arc::new(NamedTool("bash")));
        let only_view = registry.filtered(&["view".to_string(), "missing".to_string()]);
        assert_eq!(only_view.names(), vec!["view".to_string()]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn run_echo_tool() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            input: r#"{"text":"hello world"}"#.into(),
        };
        let resp = EchoTool.run(&ctx(), call).await.unwrap();
        assert!(!resp.is_error);
        assert_eq!(resp.content, "hello world");
    }

    #[tokio::test]
    async fn invalid_input_is_reported() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            input: "{not json".into(),
        };
        let err = EchoTool.run(&ctx(), call).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn response_metadata() {
        let resp = ToolResponse::text("ok").with_metadata(&serde_json::json!({"lines": 3}));
        assert_eq!(resp.metadata.as_deref(), Some(r#"{"lines":3}"#));
        assert!(ToolResponse::error("bad").is_error);
    }
}
