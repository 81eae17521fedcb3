//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and turn the
//! response into an ordered stream of incremental [`ProviderEvent`]s.
//! The agent loop consumes the stream without knowing which vendor sits
//! behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{FinishReason, Message, ToolCallPart};

/// Static description of the model a provider talks to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Vendor model id (e.g., "claude-sonnet-4-20250514")
    pub id: String,

    /// Display name
    pub name: String,

    /// Provider label persisted on assistant messages
    pub provider: String,

    /// USD per million input tokens
    pub cost_per_1m_in: f64,

    /// USD per million output tokens
    pub cost_per_1m_out: f64,

    /// USD per million cache-creation input tokens
    pub cost_per_1m_in_cached: f64,

    /// USD per million cache-read tokens
    pub cost_per_1m_out_cached: f64,

    pub context_window: u64,

    pub default_max_tokens: u32,

    /// Whether binary attachments (images) may be sent
    #[serde(default)]
    pub supports_attachments: bool,

    #[serde(default)]
    pub can_reason: bool,
}

/// Token usage reported with a completed response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// The authoritative summary of one streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,

    #[serde(default)]
    pub tool_calls: Vec<ToolCallPart>,

    #[serde(default)]
    pub usage: TokenUsage,

    pub finish_reason: FinishReason,
}

/// One incremental event in a provider stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    ThinkingDelta(String),
    SignatureDelta(String),
    ContentDelta(String),
    /// A tool call starts; `input` is usually empty at this point.
    ToolUseStart(ToolCallPart),
    ToolUseDelta { id: String, input: String },
    ToolUseStop { id: String },
    /// Final event of a successful stream.
    Complete(ProviderResponse),
    /// Final event of a failed stream.
    Error(ProviderError),
}

/// Configuration for a provider request.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// The conversation so far
    pub messages: Vec<Message>,

    /// Available tools the model can call
    pub tools: Vec<ToolDefinition>,

    pub system_prompt: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: u32,
}

/// The core Provider trait.
///
/// `stream` returns once the request is accepted; events then arrive on
/// the receiver in order, ending with `Complete` or `Error`. Dropping the
/// receiver stops the stream.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// The model this provider instance is bound to.
    fn model(&self) -> ModelInfo;

    /// Send a request and get a stream of response events.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<mpsc::Receiver<ProviderEvent>, ProviderError>;
}
