//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE, translated into [`ProviderEvent`]s
//! - Extended thinking with signatures
//! - Prompt-cache token accounting

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use taskloom_core::error::ProviderError;
use taskloom_core::message::{FinishReason, Message, Role, ToolCallPart};
use taskloom_core::provider::*;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const MAX_RETRIES: u32 = 3;
const EVENT_BUFFER: usize = 64;

/// Anthropic native Messages API provider bound to one model.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: ModelInfo,
    client: reqwest::Client,
    extra_headers: HashMap<String, String>,
    /// Budget tokens for extended thinking, when enabled.
    thinking_budget: Option<u32>,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider for `model`.
    pub fn new(api_key: impl Into<String>, model: ModelInfo) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300)) // Anthropic can be slow with thinking
            .build()
            .unwrap_or_default();

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model,
            client,
            extra_headers: HashMap::new(),
            thinking_budget: None,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = headers;
        self
    }

    /// Enable extended thinking.
    pub fn with_extended_thinking(mut self, budget_tokens: u32) -> Self {
        self.thinking_budget = Some(budget_tokens);
        self
    }

    /// Convert conversation history to Anthropic API messages.
    ///
    /// System messages are dropped (the prompt travels as a top-level field),
    /// tool results become `user` messages with `tool_result` blocks, and
    /// messages that would be empty are skipped.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        let mut result = Vec::new();

        for msg in messages {
            let blocks = match msg.role {
                Role::System => continue,
                Role::User => user_blocks(msg),
                Role::Assistant => assistant_blocks(msg),
                Role::Tool => msg
                    .tool_results()
                    .into_iter()
                    .map(|r| ContentBlock::ToolResult {
                        tool_use_id: r.tool_call_id,
                        content: r.content,
                        is_error: r.is_error,
                    })
                    .collect(),
            };
            if blocks.is_empty() {
                continue;
            }

            let role = if msg.role == Role::Assistant {
                "assistant"
            } else {
                "user"
            };
            result.push(AnthropicMessage {
                role: role.into(),
                content: blocks,
            });
        }

        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn request_body(&self, request: &ProviderRequest) -> serde_json::Value {
        let max_tokens = if request.max_tokens > 0 {
            request.max_tokens
        } else {
            self.model.default_max_tokens.max(1)
        };

        let mut body = serde_json::json!({
            "model": self.model.id,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": max_tokens,
            "stream": true,
        });

        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            body["system"] = serde_json::json!([{
                "type": "text",
                "text": system,
                "cache_control": { "type": "ephemeral" }
            }]);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if let Some(budget) = self.thinking_budget.filter(|_| self.model.can_reason) {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget
            });
        }

        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut builder = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .header("Accept", "text/event-stream");
            for (key, value) in &self.extra_headers {
                builder = builder.header(key, value);
            }

            let response = builder
                .json(body)
                .send()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;

            let status = response.status().as_u16();
            if status == 200 {
                return Ok(response);
            }

            // 429 rate limited, 529 overloaded
            if (status == 429 || status == 529) && attempt < MAX_RETRIES {
                let wait = retry_after(&response).unwrap_or(1 << attempt);
                warn!(status, attempt, wait_secs = wait, "Anthropic busy, retrying");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if status == 429 {
                return Err(ProviderError::RateLimited {
                    retry_after_secs: retry_after(&response).unwrap_or(5),
                });
            }
            if status == 401 || status == 403 {
                return Err(ProviderError::AuthenticationFailed(
                    "Invalid Anthropic API key".into(),
                ));
            }
            let error_body = response.text().await.unwrap_or_default();
            if status == 404 {
                return Err(ProviderError::ModelNotFound(self.model.id.clone()));
            }
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn user_blocks(msg: &Message) -> Vec<ContentBlock> {
    let mut blocks: Vec<ContentBlock> = msg
        .binary_content()
        .into_iter()
        .map(|b| ContentBlock::Image {
            source: ImageSource {
                kind: "base64".into(),
                media_type: b.mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(&b.data),
            },
        })
        .collect();
    if !msg.content().is_empty() {
        blocks.push(ContentBlock::Text {
            text: msg.content().to_string(),
        });
    }
    blocks
}

fn assistant_blocks(msg: &Message) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    // Thinking blocks are only replayable with their signature.
    if let Some(reasoning) = msg.reasoning().filter(|r| !r.signature.is_empty()) {
        blocks.push(ContentBlock::Thinking {
            thinking: reasoning.thinking.clone(),
            signature: reasoning.signature.clone(),
        });
    }
    if !msg.content().is_empty() {
        blocks.push(ContentBlock::Text {
            text: msg.content().to_string(),
        });
    }
    for call in msg.tool_calls() {
        let input = serde_json::from_str(&call.input)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
        blocks.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.name,
            input,
        });
    }
    blocks
}

fn finish_reason(stop_reason: Option<&str>) -> FinishReason {
    match stop_reason {
        Some("max_tokens") => FinishReason::MaxTokens,
        Some("tool_use") => FinishReason::ToolUse,
        _ => FinishReason::EndTurn,
    }
}

/// Splits the SSE byte stream into lines. Chunks may end inside a UTF-8
/// sequence, so only complete lines are decoded.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&line[..end]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }
}

/// Accumulates SSE events into [`ProviderEvent`]s.
#[derive(Debug, Default)]
struct StreamState {
    content: String,
    /// Block index → tool call being streamed.
    open_tools: HashMap<u64, ToolCallPart>,
    tool_calls: Vec<ToolCallPart>,
    usage: TokenUsage,
    stop_reason: Option<String>,
    done: bool,
}

impl StreamState {
    fn handle(&mut self, event: &serde_json::Value) -> Vec<ProviderEvent> {
        let index = event["index"].as_u64().unwrap_or(0);

        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.usage.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
                self.usage.cache_creation_tokens =
                    usage["cache_creation_input_tokens"].as_u64().unwrap_or(0);
                self.usage.cache_read_tokens =
                    usage["cache_read_input_tokens"].as_u64().unwrap_or(0);
                self.usage.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0);
                Vec::new()
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() != Some("tool_use") {
                    return Vec::new();
                }
                let call = ToolCallPart {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    input: String::new(),
                    finished: false,
                };
                self.open_tools.insert(index, call.clone());
                vec![ProviderEvent::ToolUseStart(call)]
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or_default();
                        self.content.push_str(text);
                        vec![ProviderEvent::ContentDelta(text.to_string())]
                    }
                    "thinking_delta" => {
                        let thinking = delta["thinking"].as_str().unwrap_or_default();
                        vec![ProviderEvent::ThinkingDelta(thinking.to_string())]
                    }
                    "signature_delta" => {
                        let signature = delta["signature"].as_str().unwrap_or_default();
                        vec![ProviderEvent::SignatureDelta(signature.to_string())]
                    }
                    "input_json_delta" => {
                        let partial = delta["partial_json"].as_str().unwrap_or_default();
                        match self.open_tools.get_mut(&index) {
                            Some(call) => {
                                call.input.push_str(partial);
                                vec![ProviderEvent::ToolUseDelta {
                                    id: call.id.clone(),
                                    input: partial.to_string(),
                                }]
                            }
                            None => Vec::new(),
                        }
                    }
                    _ => Vec::new(),
                }
            }
            "content_block_stop" => match self.open_tools.remove(&index) {
                Some(mut call) => {
                    call.finished = true;
                    let id = call.id.clone();
                    self.tool_calls.push(call);
                    vec![ProviderEvent::ToolUseStop { id }]
                }
                None => Vec::new(),
            },
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = out;
                }
                Vec::new()
            }
            "message_stop" => {
                self.done = true;
                vec![ProviderEvent::Complete(ProviderResponse {
                    content: std::mem::take(&mut self.content),
                    tool_calls: std::mem::take(&mut self.tool_calls),
                    usage: self.usage,
                    finish_reason: finish_reason(self.stop_reason.as_deref()),
                })]
            }
            "error" => {
                self.done = true;
                let error = &event["error"];
                let kind = error["type"].as_str().unwrap_or("error");
                let message = error["message"].as_str().unwrap_or_default();
                vec![ProviderEvent::Error(ProviderError::StreamInterrupted(
                    format!("{kind}: {message}"),
                ))]
            }
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> ModelInfo {
        self.model.clone()
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        let body = self.request_body(&request);
        debug!(provider = "anthropic", model = %self.model.id, "Sending streaming request");

        let response = self.send(&body).await?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::default();
            let mut state = StreamState::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(ProviderEvent::Error(ProviderError::StreamInterrupted(
                                e.to_string(),
                            )))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    // `event:` lines repeat the type carried in the data payload.
                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if data.is_empty() {
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    for out in state.handle(&event) {
                        if tx.send(out).await.is_err() {
                            // Receiver dropped: the caller stopped listening.
                            return;
                        }
                    }
                    if state.done {
                        return;
                    }
                }
            }

            let _ = tx
                .send(ProviderEvent::Error(ProviderError::StreamInterrupted(
                    "stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}
