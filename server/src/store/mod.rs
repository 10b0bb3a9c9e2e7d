use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found")]
    NotFound,
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn from_db(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(StoreError::Corrupt(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(rename = "date")]
    pub created_at: DateTime<Utc>,
    pub first_message: String,
}

/// Gateway to the conversation history store. The server only requires that
/// `append_exchange` returns a stable id that later `get` calls resolve to
/// the same ordered message sequence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Messages of one conversation in append order.
    async fn get(&self, id: &str) -> Result<Vec<Message>, StoreError>;

    /// Append one question/answer exchange. With `id = None` the conversation
    /// is created in the same transaction as the first append, so a failure
    /// leaves neither behind. Returns the conversation id.
    async fn append_exchange(
        &self,
        id: Option<&str>,
        question: &str,
        answer: &str,
    ) -> Result<String, StoreError>;

    /// All conversations, newest first, with their opening message.
    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError>;
}

/// Open the SQLite database, creating the file and its parent directory
/// when missing. Handles both "sqlite:./foo.db" and bare path forms.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let file_path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

    let abs_path = std::env::current_dir()?.join(file_path);
    if let Some(parent) = abs_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let pool = sqlx::SqlitePool::connect_with(
        sqlx::sqlite::SqliteConnectOptions::new()
            .filename(&abs_path)
            .create_if_missing(true),
    )
    .await?;
    Ok(pool)
}

/// SQLite-backed conversation history and document registry.
///
/// Schema (created on [`SqliteStore::migrate`]):
/// ```sql
/// CREATE TABLE IF NOT EXISTS conversations (
///     id         TEXT PRIMARY KEY,
///     created_at TEXT NOT NULL           -- RFC 3339
/// );
/// CREATE TABLE IF NOT EXISTS messages (
///     id              INTEGER PRIMARY KEY AUTOINCREMENT,
///     conversation_id TEXT NOT NULL REFERENCES conversations(id),
///     role            TEXT NOT NULL,     -- user | assistant
///     content         TEXT NOT NULL,
///     created_at      TEXT NOT NULL
/// );
/// CREATE TABLE IF NOT EXISTS documents (
///     filename    TEXT PRIMARY KEY,
///     status      TEXT NOT NULL,         -- staged | indexed
///     uploaded_at TEXT NOT NULL,
///     indexed_at  TEXT
/// );
/// ```
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id         TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS messages_conversation
             ON messages (conversation_id, id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                filename    TEXT PRIMARY KEY,
                status      TEXT NOT NULL,
                uploaded_at TEXT NOT NULL,
                indexed_at  TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record an accepted upload. Re-uploading replaces the staged entry and
    /// clears any previous index mark.
    pub async fn stage_document(&self, filename: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO documents (filename, status, uploaded_at) VALUES (?, 'staged', ?)
             ON CONFLICT(filename) DO UPDATE
             SET status = 'staged', uploaded_at = excluded.uploaded_at, indexed_at = NULL",
        )
        .bind(filename)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(log_backend)?;
        Ok(())
    }

    /// Mark a staged document as indexed. Indexing is replaceable, so marking
    /// an already-indexed document again is fine.
    pub async fn mark_indexed(&self, filename: &str) -> Result<(), StoreError> {
        let rows = sqlx::query(
            "UPDATE documents SET status = 'indexed', indexed_at = ? WHERE filename = ?",
        )
        .bind(Utc::now())
        .bind(filename)
        .execute(&self.pool)
        .await
        .map_err(log_backend)?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Whether an upload with this filename has been accepted.
    pub async fn document_exists(&self, filename: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM documents WHERE filename = ?")
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_backend)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn get(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        let exists = sqlx::query("SELECT 1 FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_backend)?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        let rows = sqlx::query(
            "SELECT role, content, created_at FROM messages
             WHERE conversation_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(log_backend)?;

        rows.into_iter()
            .map(|row| {
                let role: String = row.try_get("role")?;
                Ok(Message {
                    role: Role::from_db(&role)?,
                    content: row.try_get("content")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn append_exchange(
        &self,
        id: Option<&str>,
        question: &str,
        answer: &str,
    ) -> Result<String, StoreError> {
        let mut tx = self.pool.begin().await.map_err(log_backend)?;
        let now = Utc::now();

        let conversation_id = match id {
            Some(existing) => {
                let found = sqlx::query("SELECT 1 FROM conversations WHERE id = ?")
                    .bind(existing)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(log_backend)?;
                if found.is_none() {
                    return Err(StoreError::NotFound);
                }
                existing.to_string()
            }
            None => {
                let fresh = Uuid::new_v4().to_string();
                sqlx::query("INSERT INTO conversations (id, created_at) VALUES (?, ?)")
                    .bind(&fresh)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(log_backend)?;
                fresh
            }
        };

        for (role, content) in [(Role::User, question), (Role::Assistant, answer)] {
            sqlx::query(
                "INSERT INTO messages (conversation_id, role, content, created_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&conversation_id)
            .bind(role.as_str())
            .bind(content)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(log_backend)?;
        }

        tx.commit().await.map_err(log_backend)?;
        Ok(conversation_id)
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT c.id, c.created_at,
                    (SELECT content FROM messages m
                     WHERE m.conversation_id = c.id ORDER BY m.id LIMIT 1) AS first_message
             FROM conversations c
             ORDER BY c.created_at DESC, c.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(log_backend)?;

        rows.into_iter()
            .map(|row| {
                let first_message: Option<String> = row.try_get("first_message")?;
                Ok(ConversationSummary {
                    id: row.try_get("id")?,
                    created_at: row.try_get("created_at")?,
                    first_message: first_message.unwrap_or_default(),
                })
            })
            .collect()
    }
}

fn log_backend(e: sqlx::Error) -> StoreError {
    error!("conversation store: {e}");
    StoreError::Backend(e)
}
