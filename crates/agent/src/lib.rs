//! The agent loop, the heart of Taskloom.
//!
//! A turn follows a **stream → act → repeat** cycle:
//!
//! 1. **Receive** user content for a session (queued if the session is busy)
//! 2. **Load history** from the message store and persist the user message
//! 3. **Stream** an assistant message from the provider, persisting every delta
//! 4. **If tool calls**: run them in order, persist one tool-result message,
//!    pick up queued prompts and loop back to step 3
//! 5. **Otherwise**: return the final assistant message as the turn's single
//!    terminal event
//!
//! Cancellation, per-session queuing and cost accounting are handled by
//! [`AgentLoop`]; [`AgentManager`] wires agents together so one can
//! delegate to another through an `agent_<id>` tool.

pub mod agent_tool;
pub mod loop_runner;
pub mod manager;
pub mod tracker;
pub mod usage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent_tool::{AgentTool, DEFAULT_MAX_DELEGATION_DEPTH};
pub use loop_runner::AgentLoop;
pub use manager::{AgentManager, AgentResources, initialize_agents};
pub use tracker::RequestTracker;
