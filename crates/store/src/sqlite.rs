//! SQLite store.
//!
//! Uses a single SQLite database file with two tables:
//! - `sessions`  one row per conversation, including usage counters and cost
//! - `messages`  one row per message, content parts stored as JSON
//!
//! Messages keep an integer rowid so listing preserves insertion order even
//! when timestamps collide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use taskloom_core::store::DEFAULT_SESSION_TITLE;
use taskloom_core::{
    Broker, ContentPart, CreateMessageParams, Message, MessageStore, PubSubEventKind, Role,
    Session, SessionStore, StoreError,
};
use tracing::{debug, info};
use uuid::Uuid;

const SESSION_COLUMNS: &str = r#"
    s.id, s.parent_session_id, s.title, s.prompt_tokens, s.completion_tokens,
    s.summary_message_id, s.cost, s.created_at, s.updated_at,
    (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS message_count
"#;

/// A production SQLite store.
pub struct SqliteStore {
    pool: SqlitePool,
    broker: Broker<Message>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite://{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database exists per connection, so keep exactly one.
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            broker: Broker::default(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Message Created/Updated/Deleted events.
    pub fn messages_broker(&self) -> &Broker<Message> {
        &self.broker
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id                 TEXT PRIMARY KEY,
                parent_session_id  TEXT,
                title              TEXT NOT NULL,
                prompt_tokens      INTEGER NOT NULL DEFAULT 0,
                completion_tokens  INTEGER NOT NULL DEFAULT 0,
                summary_message_id TEXT,
                cost               REAL NOT NULL DEFAULT 0.0,
                created_at         TEXT NOT NULL,
                updated_at         TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                iid         INTEGER PRIMARY KEY AUTOINCREMENT,
                id          TEXT UNIQUE NOT NULL,
                session_id  TEXT NOT NULL,
                role        TEXT NOT NULL,
                parts       TEXT NOT NULL DEFAULT '[]',
                model       TEXT,
                provider    TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, iid)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("messages index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_time(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StoreError>
    where
        T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        row.try_get(name)
            .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, StoreError> {
        let prompt_tokens: i64 = Self::column(row, "prompt_tokens")?;
        let completion_tokens: i64 = Self::column(row, "completion_tokens")?;
        let message_count: i64 = Self::column(row, "message_count")?;
        let created_at: String = Self::column(row, "created_at")?;
        let updated_at: String = Self::column(row, "updated_at")?;

        Ok(Session {
            id: Self::column(row, "id")?,
            parent_session_id: Self::column(row, "parent_session_id")?,
            title: Self::column(row, "title")?,
            message_count: message_count.max(0) as u64,
            prompt_tokens: prompt_tokens.max(0) as u64,
            completion_tokens: completion_tokens.max(0) as u64,
            summary_message_id: Self::column(row, "summary_message_id")?,
            cost: Self::column(row, "cost")?,
            created_at: Self::parse_time(&created_at),
            updated_at: Self::parse_time(&updated_at),
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let role: String = Self::column(row, "role")?;
        let parts_json: String = Self::column(row, "parts")?;
        let created_at: String = Self::column(row, "created_at")?;
        let updated_at: String = Self::column(row, "updated_at")?;

        let parts: Vec<ContentPart> = serde_json::from_str(&parts_json)
            .map_err(|e| StoreError::QueryFailed(format!("parts column: {e}")))?;

        Ok(Message {
            id: Self::column(row, "id")?,
            session_id: Self::column(row, "session_id")?,
            role: Role::from_str(&role).map_err(StoreError::QueryFailed)?,
            parts,
            model: Self::column(row, "model")?,
            provider: Self::column(row, "provider")?,
            created_at: Self::parse_time(&created_at),
            updated_at: Self::parse_time(&updated_at),
        })
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, parent_session_id, title, prompt_tokens, completion_tokens,
                                  summary_message_id, cost, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&session.id)
        .bind(&session.parent_session_id)
        .bind(&session.title)
        .bind(session.prompt_tokens as i64)
        .bind(session.completion_tokens as i64)
        .bind(&session.summary_message_id)
        .bind(session.cost)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT session failed: {e}")))?;
        Ok(())
    }

    async fn fetch_session(&self, id: &str) -> Result<Session, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s WHERE s.id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT session failed: {e}")))?
        .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        Self::row_to_session(&row)
    }

    fn parts_json(message: &Message) -> Result<String, StoreError> {
        serde_json::to_string(&message.parts)
            .map_err(|e| StoreError::Storage(format!("parts serialization: {e}")))
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create(&self, title: &str) -> Result<Session, StoreError> {
        let session = Session::new(Uuid::new_v4().to_string(), title);
        self.insert_session(&session).await?;
        Ok(session)
    }

    async fn create_task_session(
        &self,
        tool_call_id: &str,
        parent_session_id: &str,
        title: &str,
    ) -> Result<Session, StoreError> {
        self.insert_session(&Session::task(tool_call_id, parent_session_id, title))
            .await?;
        self.fetch_session(tool_call_id).await
    }

    async fn get(&self, id: &str) -> Result<Session, StoreError> {
        self.insert_session(&Session::new(id, DEFAULT_SESSION_TITLE))
            .await?;
        self.fetch_session(id).await
    }

    async fn save(&self, session: Session) -> Result<Session, StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO sessions (id, parent_session_id, title, prompt_tokens, completion_tokens,
                                  summary_message_id, cost, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                prompt_tokens = excluded.prompt_tokens,
                completion_tokens = excluded.completion_tokens,
                summary_message_id = excluded.summary_message_id,
                cost = excluded.cost,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.id)
        .bind(&session.parent_session_id)
        .bind(&session.title)
        .bind(session.prompt_tokens as i64)
        .bind(session.completion_tokens as i64)
        .bind(&session.summary_message_id)
        .bind(session.cost)
        .bind(session.created_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT session failed: {e}")))?;

        self.fetch_session(&session.id).await
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s ORDER BY s.updated_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT sessions failed: {e}")))?;
        rows.iter().map(Self::row_to_session).collect()
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create(
        &self,
        session_id: &str,
        params: CreateMessageParams,
    ) -> Result<Message, StoreError> {
        let message = Message::new(session_id, params);
        let parts = Self::parts_json(&message)?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, role, parts, model, provider, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&parts)
        .bind(&message.model)
        .bind(&message.provider)
        .bind(message.created_at.to_rfc3339())
        .bind(message.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT message failed: {e}")))?;

        self.broker.publish(PubSubEventKind::Created, message.clone());
        Ok(message)
    }

    async fn update(&self, message: &Message) -> Result<(), StoreError> {
        let parts = Self::parts_json(message)?;
        let result = sqlx::query(
            "UPDATE messages SET parts = ?1, model = ?2, provider = ?3, updated_at = ?4 WHERE id = ?5",
        )
        .bind(&parts)
        .bind(&message.model)
        .bind(&message.provider)
        .bind(Utc::now().to_rfc3339())
        .bind(&message.id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE message failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MessageNotFound(message.id.clone()));
        }
        self.broker.publish(PubSubEventKind::Updated, message.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Message, StoreError> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT message failed: {e}")))?
            .ok_or_else(|| StoreError::MessageNotFound(id.to_string()))?;
        Self::row_to_message(&row)
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query("SELECT * FROM messages WHERE session_id = ?1 ORDER BY iid ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT messages failed: {e}")))?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn delete_session_messages(&self, session_id: &str) -> Result<(), StoreError> {
        let removed = MessageStore::list(self, session_id).await?;
        sqlx::query("DELETE FROM messages WHERE session_id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE messages failed: {e}")))?;
        for message in removed {
            self.broker.publish(PubSubEventKind::Deleted, message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloom_core::{FinishReason, ToolCallPart};

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn user_text(text: &str) -> CreateMessageParams {
        CreateMessageParams::new(Role::User, vec![ContentPart::Text { text: text.into() }])
    }

    #[tokio::test]
    async fn get_creates_and_reloads_session() {
        let db = test_store().await;
        let session = SessionStore::get(&db, "s1").await.unwrap();
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
        assert_eq!(session.message_count, 0);

        let again = SessionStore::get(&db, "s1").await.unwrap();
        assert_eq!(again.created_at.timestamp(), session.created_at.timestamp());
    }

    #[tokio::test]
    async fn save_updates_usage() {
        let db = test_store().await;
        let mut session = SessionStore::get(&db, "s1").await.unwrap();
        session.cost = 1.5;
        session.prompt_tokens = 100;
        session.completion_tokens = 40;
        session.summary_message_id = Some("m9".into());
        db.save(session).await.unwrap();

        let reloaded = SessionStore::get(&db, "s1").await.unwrap();
        assert!((reloaded.cost - 1.5).abs() < 1e-12);
        assert_eq!(reloaded.prompt_tokens, 100);
        assert_eq!(reloaded.completion_tokens, 40);
        assert_eq!(reloaded.summary_message_id.as_deref(), Some("m9"));
    }

    #[tokio::test]
    async fn task_session_round_trip() {
        let db = test_store().await;
        let task = db.create_task_session("call_1", "parent", "Task").await.unwrap();
        assert_eq!(task.id, "call_1");
        assert_eq!(task.parent_session_id.as_deref(), Some("parent"));
    }

    #[tokio::test]
    async fn message_parts_round_trip() {
        let db = test_store().await;
        let mut msg = MessageStore::create(
            &db,
            "s1",
            CreateMessageParams::new(Role::Assistant, vec![]).with_model("m", "anthropic"),
        )
        .await
        .unwrap();
        msg.append_reasoning_content("hmm");
        msg.finish_thinking();
        msg.append_content("Listing files");
        msg.add_tool_call(ToolCallPart {
            id: "c1".into(),
            name: "ls".into(),
            input: "{}".into(),
            finished: true,
        });
        msg.add_finish(FinishReason::ToolUse, "", "");
        db.update(&msg).await.unwrap();

        let loaded = MessageStore::get(&db, &msg.id).await.unwrap();
        assert_eq!(loaded.parts, msg.parts);
        assert_eq!(loaded.role, Role::Assistant);
        assert_eq!(loaded.provider.as_deref(), Some("anthropic"));
        assert_eq!(loaded.finish_reason(), Some(FinishReason::ToolUse));
    }

    #[tokio::test]
    async fn list_in_insertion_order_with_count() {
        let db = test_store().await;
        for text in ["first", "second", "third"] {
            MessageStore::create(&db, "s1", user_text(text)).await.unwrap();
        }
        let listed = MessageStore::list(&db, "s1").await.unwrap();
        let texts: Vec<&str> = listed.iter().map(|m| m.content()).collect();
        assert_eq!(texts, ["first", "second", "third"]);

        let session = SessionStore::get(&db, "s1").await.unwrap();
        assert_eq!(session.message_count, 3);
    }

    #[tokio::test]
    async fn update_missing_message() {
        let db = test_store().await;
        let ghost = Message::text("s1", Role::User, "ghost");
        let err = db.update(&ghost).await.unwrap_err();
        assert!(matches!(err, StoreError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn delete_session_messages_publishes() {
        let db = test_store().await;
        MessageStore::create(&db, "s1", user_text("a")).await.unwrap();
        let mut rx = db.messages_broker().subscribe();
        db.delete_session_messages("s1").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, PubSubEventKind::Deleted);
        assert!(MessageStore::list(&db, "s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskloom.db");
        let path = path.to_string_lossy().to_string();
        {
            let db = SqliteStore::new(&path).await.unwrap();
            MessageStore::create(&db, "s1", user_text("kept")).await.unwrap();
        }
        let db = SqliteStore::new(&path).await.unwrap();
        let listed = MessageStore::list(&db, "s1").await.unwrap();
        assert_eq!(listed[0].content(), "kept");
    }
}
