//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use taskloom_core::store::DEFAULT_SESSION_TITLE;
use taskloom_core::{
    Broker, CreateMessageParams, Message, MessageStore, PubSubEventKind, Session, SessionStore,
    StoreError,
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Keeps sessions in a map and messages in insertion order.
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    messages: Arc<RwLock<Vec<Message>>>,
    broker: Broker<Message>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            messages: Arc::new(RwLock::new(Vec::new())),
            broker: Broker::default(),
        }
    }

    /// Message Created/Updated/Deleted events.
    pub fn messages_broker(&self) -> &Broker<Message> {
        &self.broker
    }

    async fn with_count(&self, mut session: Session) -> Session {
        let messages = self.messages.read().await;
        session.message_count = messages
            .iter()
            .filter(|m| m.session_id == session.id)
            .count() as u64;
        session
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create(&self, title: &str) -> Result<Session, StoreError> {
        let session = Session::new(Uuid::new_v4().to_string(), title);
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn create_task_session(
        &self,
        tool_call_id: &str,
        parent_session_id: &str,
        title: &str,
    ) -> Result<Session, StoreError> {
        let session = self
            .sessions
            .write()
            .await
            .entry(tool_call_id.to_string())
            .or_insert_with(|| Session::task(tool_call_id, parent_session_id, title))
            .clone();
        Ok(self.with_count(session).await)
    }

    async fn get(&self, id: &str) -> Result<Session, StoreError> {
        let session = self
            .sessions
            .write()
            .await
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id, DEFAULT_SESSION_TITLE))
            .clone();
        Ok(self.with_count(session).await)
    }

    async fn save(&self, mut session: Session) -> Result<Session, StoreError> {
        session.updated_at = Utc::now();
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(self.with_count(session).await)
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let mut counted = Vec::with_capacity(sessions.len());
        for s in sessions {
            counted.push(self.with_count(s).await);
        }
        Ok(counted)
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn create(
        &self,
        session_id: &str,
        params: CreateMessageParams,
    ) -> Result<Message, StoreError> {
        let message = Message::new(session_id, params);
        self.messages.write().await.push(message.clone());
        self.broker.publish(PubSubEventKind::Created, message.clone());
        Ok(message)
    }

    async fn update(&self, message: &Message) -> Result<(), StoreError> {
        let mut messages = self.messages.write().await;
        let slot = messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| StoreError::MessageNotFound(message.id.clone()))?;
        *slot = message.clone();
        slot.updated_at = Utc::now();
        self.broker.publish(PubSubEventKind::Updated, slot.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Message, StoreError> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| StoreError::MessageNotFound(id.to_string()))
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn delete_session_messages(&self, session_id: &str) -> Result<(), StoreError> {
        let mut messages = self.messages.write().await;
        let (removed, kept): (Vec<Message>, Vec<Message>) = messages
            .drain(..)
            .partition(|m| m.session_id == session_id);
        *messages = kept;
        for message in removed {
            self.broker.publish(PubSubEventKind::Deleted, message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloom_core::{ContentPart, Role};

    fn user_text(text: &str) -> CreateMessageParams {
        CreateMessageParams::new(
            Role::User,
            vec![ContentPart::Text { text: text.into() }],
        )
    }

    #[tokio::test]
    async fn get_creates_unknown_session() {
        let store = InMemoryStore::new();
        let session = SessionStore::get(&store, "s1").await.unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
        assert_eq!(SessionStore::list(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn message_count_is_derived() {
        let store = InMemoryStore::new();
        MessageStore::create(&store, "s1", user_text("a")).await.unwrap();
        MessageStore::create(&store, "s1", user_text("b")).await.unwrap();
        MessageStore::create(&store, "s2", user_text("c")).await.unwrap();

        let s1 = SessionStore::get(&store, "s1").await.unwrap();
        assert_eq!(s1.message_count, 2);
    }

    #[tokio::test]
    async fn save_persists_cost() {
        let store = InMemoryStore::new();
        let mut session = SessionStore::get(&store, "s1").await.unwrap();
        session.cost += 0.25;
        session.prompt_tokens += 10;
        store.save(session).await.unwrap();

        let reloaded = SessionStore::get(&store, "s1").await.unwrap();
        assert!((reloaded.cost - 0.25).abs() < 1e-12);
        assert_eq!(reloaded.prompt_tokens, 10);
    }

    #[tokio::test]
    async fn task_session_is_idempotent() {
        let store = InMemoryStore::new();
        let a = store.create_task_session("call_1", "s1", "task").await.unwrap();
        let b = store.create_task_session("call_1", "other", "again").await.unwrap();
        assert_eq!(a.parent_session_id.as_deref(), Some("s1"));
        assert_eq!(b.parent_session_id.as_deref(), Some("s1"));
        assert_eq!(b.title, "task");
    }

    #[tokio::test]
    async fn update_and_publish() {
        let store = InMemoryStore::new();
        let mut rx = store.messages_broker().subscribe();

        let mut msg = MessageStore::create(&store, "s1", user_text("hi")).await.unwrap();
        msg.append_content(" there");
        store.update(&msg).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, PubSubEventKind::Created);
        let updated = rx.recv().await.unwrap();
        assert_eq!(updated.kind, PubSubEventKind::Updated);
        assert_eq!(updated.payload.content(), "hi there");

        let fetched = MessageStore::get(&store, &msg.id).await.unwrap();
        assert_eq!(fetched.content(), "hi there");
    }

    #[tokio::test]
    async fn update_unknown_message_fails() {
        let store = InMemoryStore::new();
        let msg = Message::text("s1", Role::User, "ghost");
        let err = store.update(&msg).await.unwrap_err();
        assert!(matches!(err, StoreError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn list_keeps_creation_order() {
        let store = InMemoryStore::new();
        for text in ["one", "two", "three"] {
            MessageStore::create(&store, "s1", user_text(text)).await.unwrap();
        }
        let texts: Vec<String> = MessageStore::list(&store, "s1")
            .await
            .unwrap()
            .iter()
            .map(|m| m.content().to_string())
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn delete_session_messages_only_touches_that_session() {
        let store = InMemoryStore::new();
        MessageStore::create(&store, "s1", user_text("a")).await.unwrap();
        MessageStore::create(&store, "s2", user_text("b")).await.unwrap();
        store.delete_session_messages("s1").await.unwrap();
        assert!(MessageStore::list(&store, "s1").await.unwrap().is_empty());
        assert_eq!(MessageStore::list(&store, "s2").await.unwrap().len(), 1);
    }
}
