//! LLM provider implementations for Taskloom.
//!
//! Providers implement the `taskloom_core::Provider` trait and stream
//! [`taskloom_core::ProviderEvent`]s. The router builds the configured
//! provider for an agent's model.

pub mod anthropic;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use router::{ProviderRouter, build_from_config};
