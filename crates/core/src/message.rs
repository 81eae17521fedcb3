//! Message domain types.
//!
//! A message is an ordered list of typed content parts. Assistant messages
//! are built up incrementally while a provider streams: text is appended,
//! reasoning is accumulated and then "finished", tool calls are registered,
//! extended and finished, and a final `Finish` part closes the message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// Provider-side instructions
    System,
    /// Tool execution results
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Why an assistant message stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Canceled,
    Error,
    PermissionDenied,
}

/// Reasoning ("thinking") text with its opaque provider signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPart {
    pub thinking: String,
    #[serde(default)]
    pub signature: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    /// Opaque id, correlates the call with its result.
    pub id: String,
    pub name: String,
    /// JSON parameters; partial while `finished` is false.
    pub input: String,
    #[serde(default)]
    pub finished: bool,
}

/// The answer to a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPart {
    pub tool_call_id: String,
    #[serde(default)]
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

/// Binary attachment content (images, files).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryPart {
    pub path: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Terminal marker of an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishPart {
    pub reason: FinishReason,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: String,
    pub time: DateTime<Utc>,
}

/// One typed piece of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Reasoning(ReasoningPart),
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
    Binary(BinaryPart),
    Finish(FinishPart),
}

/// A file supplied by the user alongside their prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl From<Attachment> for ContentPart {
    fn from(attachment: Attachment) -> Self {
        ContentPart::Binary(BinaryPart {
            path: attachment.file_path,
            mime_type: attachment.mime_type,
            data: attachment.content,
        })
    }
}

/// Parameters for `MessageStore::create`.
#[derive(Debug, Clone)]
pub struct CreateMessageParams {
    pub role: Role,
    pub parts: Vec<ContentPart>,
    pub model: Option<String>,
    pub provider: Option<String>,
}

impl CreateMessageParams {
    pub fn new(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            parts,
            model: None,
            provider: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, provider: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self.provider = Some(provider.into());
        self
    }
}

/// A single message in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Owning session
    pub session_id: String,

    pub role: Role,

    /// Ordered content parts
    #[serde(default)]
    pub parts: Vec<ContentPart>,

    /// Model label (assistant messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Provider label (assistant and tool messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Build a fresh message for a session. Stores call this from `create`.
    pub fn new(session_id: impl Into<String>, params: CreateMessageParams) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role: params.role,
            parts: params.parts,
            model: params.model,
            provider: params.provider,
            created_at: now,
            updated_at: now,
        }
    }

    /// Convenience constructor for a plain-text message.
    pub fn text(session_id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self::new(
            session_id,
            CreateMessageParams::new(role, vec![ContentPart::Text { text: text.into() }]),
        )
    }

    /// The visible text of the message (empty if none).
    pub fn content(&self) -> &str {
        self.parts
            .iter()
            .find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or("")
    }

    pub fn reasoning(&self) -> Option<&ReasoningPart> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::Reasoning(r) => Some(r),
            _ => None,
        })
    }

    pub fn tool_calls(&self) -> Vec<ToolCallPart> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall(tc) => Some(tc.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_results(&self) -> Vec<ToolResultPart> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult(tr) => Some(tr.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn binary_content(&self) -> Vec<&BinaryPart> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Binary(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn finish_part(&self) -> Option<&FinishPart> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::Finish(f) => Some(f),
            _ => None,
        })
    }

    /// `None` means the message is still open.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_part().map(|f| f.reason)
    }

    pub fn is_finished(&self) -> bool {
        self.finish_part().is_some()
    }

    pub fn append_content(&mut self, delta: &str) {
        self.touch();
        for part in &mut self.parts {
            if let ContentPart::Text { text } = part {
                text.push_str(delta);
                return;
            }
        }
        self.parts.push(ContentPart::Text {
            text: delta.to_string(),
        });
    }

    pub fn append_reasoning_content(&mut self, delta: &str) {
        self.touch();
        match self.reasoning_mut() {
            Some(r) => r.thinking.push_str(delta),
            None => self.parts.push(ContentPart::Reasoning(ReasoningPart {
                thinking: delta.to_string(),
                started_at: Utc::now(),
                ..ReasoningPart::default()
            })),
        }
    }

    pub fn append_reasoning_signature(&mut self, delta: &str) {
        self.touch();
        match self.reasoning_mut() {
            Some(r) => r.signature.push_str(delta),
            None => self.parts.push(ContentPart::Reasoning(ReasoningPart {
                signature: delta.to_string(),
                started_at: Utc::now(),
                ..ReasoningPart::default()
            })),
        }
    }

    /// Close the reasoning block, if one is open.
    pub fn finish_thinking(&mut self) {
        if let Some(r) = self.reasoning_mut() {
            if r.finished_at.is_none() {
                r.finished_at = Some(Utc::now());
            }
        }
    }

    /// Register a tool call; a call with the same id is replaced.
    pub fn add_tool_call(&mut self, call: ToolCallPart) {
        self.touch();
        for part in &mut self.parts {
            if let ContentPart::ToolCall(existing) = part {
                if existing.id == call.id {
                    *existing = call;
                    return;
                }
            }
        }
        self.parts.push(ContentPart::ToolCall(call));
    }

    pub fn append_tool_call_input(&mut self, id: &str, delta: &str) {
        self.touch();
        if let Some(call) = self.tool_call_mut(id) {
            call.input.push_str(delta);
        }
    }

    pub fn finish_tool_call(&mut self, id: &str) {
        self.touch();
        if let Some(call) = self.tool_call_mut(id) {
            call.finished = true;
        }
    }

    /// Replace every tool call with `calls`, all marked finished.
    pub fn set_tool_calls(&mut self, calls: Vec<ToolCallPart>) {
        self.touch();
        self.parts.retain(|p| !matches!(p, ContentPart::ToolCall(_)));
        self.parts.extend(calls.into_iter().map(|mut c| {
            c.finished = true;
            ContentPart::ToolCall(c)
        }));
    }

    /// Close the message. A previous finish part is replaced.
    pub fn add_finish(&mut self, reason: FinishReason, message: &str, details: &str) {
        self.touch();
        self.parts.retain(|p| !matches!(p, ContentPart::Finish(_)));
        self.parts.push(ContentPart::Finish(FinishPart {
            reason,
            message: message.to_string(),
            details: details.to_string(),
            time: Utc::now(),
        }));
    }

    fn reasoning_mut(&mut self) -> Option<&mut ReasoningPart> {
        self.parts.iter_mut().find_map(|p| match p {
            ContentPart::Reasoning(r) => Some(r),
            _ => None,
        })
    }

    fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCallPart> {
        self.parts.iter_mut().find_map(|p| match p {
            ContentPart::ToolCall(tc) if tc.id == id => Some(tc),
            _ => None,
        })
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant() -> Message {
        Message::new(
            "s1",
            CreateMessageParams::new(Role::Assistant, vec![]).with_model("m", "p"),
        )
    }

    #[test]
    fn create_text_message() {
        let msg = Message::text("s1", Role::User, "Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content(), "Hello, agent!");
        assert!(msg.tool_calls().is_empty());
        assert!(!msg.is_finished());
    }

    #[test]
    fn content_deltas_accumulate_in_one_part() {
        let mut msg = assistant();
        msg.append_content("Hel");
        msg.append_content("lo");
        assert_eq!(msg.content(), "Hello");
        assert_eq!(msg.parts.len(), 1);
    }

    #[test]
    fn reasoning_then_finish_thinking() {
        let mut msg = assistant();
        msg.append_reasoning_content("let me ");
        msg.append_reasoning_content("think");
        msg.append_reasoning_signature("sig");
        assert!(msg.reasoning().unwrap().finished_at.is_none());

        msg.finish_thinking();
        let r = msg.reasoning().unwrap();
        assert_eq!(r.thinking, "let me think");
        assert_eq!(r.signature, "sig");
        assert!(r.finished_at.is_some());
    }

    #[test]
    fn tool_call_lifecycle() {
        let mut msg = assistant();
        msg.add_tool_call(ToolCallPart {
            id: "c1".into(),
            name: "ls".into(),
            input: String::new(),
            finished: false,
        });
        msg.append_tool_call_input("c1", "{\"path\":");
        msg.append_tool_call_input("c1", "\".\"}");
        msg.append_tool_call_input("unknown", "ignored");
        msg.finish_tool_call("c1");

        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, "{\"path\":\".\"}");
        assert!(calls[0].finished);
    }

    #[test]
    fn set_tool_calls_replaces_streamed_calls() {
        let mut msg = assistant();
        msg.add_tool_call(ToolCallPart {
            id: "c1".into(),
            name: "ls".into(),
            input: "{".into(),
            finished: false,
        });
        msg.set_tool_calls(vec![ToolCallPart {
            id: "c1".into(),
            name: "ls".into(),
            input: "{}".into(),
            finished: false,
        }]);
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, "{}");
        assert!(calls[0].finished);
    }

    #[test]
    fn add_finish_replaces_previous_finish() {
        let mut msg = assistant();
        msg.add_finish(FinishReason::ToolUse, "", "");
        msg.add_finish(FinishReason::Canceled, "Request cancelled", "");
        assert_eq!(msg.finish_reason(), Some(FinishReason::Canceled));
        assert_eq!(
            msg.parts
                .iter()
                .filter(|p| matches!(p, ContentPart::Finish(_)))
                .count(),
            1
        );
    }

    #[test]
    fn attachment_becomes_binary_part() {
        let part: ContentPart = Attachment {
            file_path: "/tmp/a.png".into(),
            file_name: "a.png".into(),
            mime_type: "image/png".into(),
            content: vec![1, 2, 3],
        }
        .into();
        let msg = Message::new("s1", CreateMessageParams::new(Role::User, vec![part]));
        assert_eq!(msg.binary_content().len(), 1);
        assert_eq!(msg.binary_content()[0].mime_type, "image/png");
    }

    #[test]
    fn message_serialization_roundtrip() {
        let mut msg = assistant();
        msg.append_content("done");
        msg.add_finish(FinishReason::EndTurn, "", "");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"text""#));
        assert!(json.contains(r#""reason":"end_turn""#));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn role_parsing() {
        assert_eq!("tool".parse::<Role>().unwrap(), Role::Tool);
        assert!("robot".parse::<Role>().is_err());
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }
}
