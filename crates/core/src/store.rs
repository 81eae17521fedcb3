//! Store traits: session and message durability.
//!
//! The agent loop persists every streamed delta through
//! [`MessageStore::update`], so implementations must tolerate frequent
//! small writes.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::{CreateMessageParams, Message};
use crate::session::Session;

/// Title given to sessions created implicitly.
pub const DEFAULT_SESSION_TITLE: &str = "New Session";

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session with a fresh id.
    async fn create(&self, title: &str) -> Result<Session, StoreError>;

    /// Create the session a delegated sub-agent runs in. Its id is the
    /// tool-call id that spawned it.
    async fn create_task_session(
        &self,
        tool_call_id: &str,
        parent_session_id: &str,
        title: &str,
    ) -> Result<Session, StoreError>;

    /// Fetch a session. An unknown id is created on first use.
    async fn get(&self, id: &str) -> Result<Session, StoreError>;

    /// Persist title, usage counters, cost and summary pointer.
    async fn save(&self, session: Session) -> Result<Session, StoreError>;

    /// All sessions, most recently updated first.
    async fn list(&self) -> Result<Vec<Session>, StoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(
        &self,
        session_id: &str,
        params: CreateMessageParams,
    ) -> Result<Message, StoreError>;

    /// Overwrite an existing message's parts.
    async fn update(&self, message: &Message) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Message, StoreError>;

    /// Messages of a session in creation order.
    async fn list(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;

    async fn delete_session_messages(&self, session_id: &str) -> Result<(), StoreError>;
}
