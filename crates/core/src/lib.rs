//! # Taskloom Core
//!
//! Domain types, traits, and error definitions for the Taskloom agent
//! orchestration layer. This crate has **no framework dependencies**: it
//! defines the model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is a trait here:
//! - [`Provider`] streams model output as ordered [`ProviderEvent`]s
//! - [`Tool`] is a named capability resolved through a typed [`ToolRegistry`]
//! - [`SessionStore`] / [`MessageStore`] own durability
//!
//! Implementations live in their respective crates, so tests can swap in
//! scripted providers and in-memory stores.

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod session;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentDefinition, AgentEvent, AgentEventKind, AgentState};
pub use error::{AgentError, Error, ProviderError, Result, StoreError, ToolError};
pub use event::{Broker, PubSubEvent, PubSubEventKind};
pub use message::{
    Attachment, BinaryPart, ContentPart, CreateMessageParams, FinishPart, FinishReason, Message,
    ReasoningPart, Role, ToolCallPart, ToolResultPart,
};
pub use provider::{
    ModelInfo, Provider, ProviderEvent, ProviderRequest, ProviderResponse, TokenUsage,
    ToolDefinition,
};
pub use session::Session;
pub use store::{MessageStore, SessionStore};
pub use tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolRegistry, ToolResponse};
