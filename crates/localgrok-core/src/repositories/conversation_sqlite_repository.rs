use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::conversation_repository::{
    BoxFuture, CHANGE_CHANNEL_CAPACITY, ConversationStore, StoreChange,
};
use super::error::{RepositoryError, RepositoryResult};
use crate::models::{Chat, ChatId, Message, MessageId, Role, now_millis};

/// Migrations applied in order. Each entry is (version, sql).
/// To add a new migration: append a tuple with the next version number and its SQL.
/// Never edit or remove existing entries; existing databases depend on them.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS chats (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        title      TEXT    NOT NULL,
        model      TEXT    NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_chats_updated_at ON chats (updated_at DESC);
    CREATE TABLE IF NOT EXISTS messages (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id           INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        role              TEXT    NOT NULL,
        content           TEXT    NOT NULL,
        created_at        INTEGER NOT NULL,
        is_streaming      INTEGER NOT NULL DEFAULT 0,
        is_thinking       INTEGER NOT NULL DEFAULT 0,
        reasoning_content TEXT    NOT NULL DEFAULT '',
        tool_used         INTEGER NOT NULL DEFAULT 0,
        tool_display_name TEXT    NOT NULL DEFAULT ''
    );
    CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages (chat_id)",
)];

const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, created_at, is_streaming, is_thinking,
     reasoning_content, tool_used, tool_display_name";

/// SQLite-backed conversation store.
///
/// Uses WAL journal mode so subscribers can read while a turn writes.
/// `SqlitePool` is internally reference-counted and cheap to clone.
#[derive(Clone)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteConversationStore {
    /// Open (or create) the database at the platform-specific data path.
    pub async fn new() -> RepositoryResult<Self> {
        Self::open(&Self::db_path()?).await
    }

    /// Open (or create) the database at `db_path`.
    pub async fn open(db_path: &Path) -> RepositoryResult<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        Self::finalize_interrupted(&pool).await?;

        info!(path = %db_path.display(), "Opened SQLite conversation database");

        Ok(Self::from_pool(pool))
    }

    /// Private in-memory database, mainly for tests.
    pub async fn in_memory() -> RepositoryResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // A single connection: every connection to :memory: is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;

        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    /// Create the schema_version table if absent, then apply any pending migrations.
    async fn run_migrations(pool: &SqlitePool) -> RepositoryResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // Seed version 0 if the table is empty (fresh database).
        sqlx::query("INSERT INTO schema_version (version) SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM schema_version)")
            .execute(pool)
            .await?;

        let current: i64 = sqlx::query_scalar("SELECT version FROM schema_version")
            .fetch_one(pool)
            .await?;

        for (version, sql) in MIGRATIONS {
            if *version > current {
                info!(version, "Applying schema migration");
                // sqlx doesn't support multiple statements in a single query call,
                // so split on ';' and execute each statement individually.
                for statement in sql.split(';') {
                    let trimmed = statement.trim();
                    if !trimmed.is_empty() {
                        sqlx::query(trimmed).execute(pool).await?;
                    }
                }
                sqlx::query("UPDATE schema_version SET version = ?")
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(())
    }

    /// Rows still marked streaming belong to a process that died mid-turn.
    /// Nothing will ever finish them, so keep their partial text as final.
    async fn finalize_interrupted(pool: &SqlitePool) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE messages SET is_streaming = 0, is_thinking = 0 WHERE is_streaming = 1",
        )
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            warn!(
                count = result.rows_affected(),
                "Finalized messages left streaming by an interrupted session"
            );
        }
        Ok(())
    }

    fn db_path() -> RepositoryResult<PathBuf> {
        dirs::data_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Cannot find data directory".into(),
            })
            .map(|p| p.join("localgrok").join("chats.db"))
    }

    fn notify(&self, change: StoreChange) {
        let _ = self.changes.send(change);
    }
}

fn chat_from_row(row: &SqliteRow) -> Chat {
    Chat {
        id: row.get("id"),
        title: row.get("title"),
        model: row.get("model"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &SqliteRow) -> RepositoryResult<Message> {
    let role: String = row.get("role");
    let role = Role::try_from(role.as_str())
        .map_err(|message| RepositoryError::InvalidData { message })?;

    Ok(Message {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        role,
        content: row.get("content"),
        created_at: row.get("created_at"),
        is_streaming: row.get("is_streaming"),
        is_thinking: row.get("is_thinking"),
        reasoning_content: row.get("reasoning_content"),
        tool_used: row.get("tool_used"),
        tool_display_name: row.get("tool_display_name"),
    })
}

impl ConversationStore for SqliteConversationStore {
    fn create_chat(&self, chat: Chat) -> BoxFuture<'static, RepositoryResult<Chat>> {
        let this = self.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO chats (title, model, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&chat.title)
            .bind(&chat.model)
            .bind(chat.created_at)
            .bind(chat.updated_at)
            .execute(&this.pool)
            .await?;

            this.notify(StoreChange::ChatsChanged);
            Ok(Chat {
                id: result.last_insert_rowid(),
                ..chat
            })
        })
    }

    fn get_chat(&self, id: ChatId) -> BoxFuture<'static, RepositoryResult<Option<Chat>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, title, model, created_at, updated_at FROM chats WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&pool)
            .await?;

            Ok(row.as_ref().map(chat_from_row))
        })
    }

    fn list_chats(&self) -> BoxFuture<'static, RepositoryResult<Vec<Chat>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, title, model, created_at, updated_at
                 FROM chats
                 ORDER BY updated_at DESC, id DESC",
            )
            .fetch_all(&pool)
            .await?;

            Ok(rows.iter().map(chat_from_row).collect())
        })
    }

    fn rename_chat(&self, id: ChatId, title: String) -> BoxFuture<'static, RepositoryResult<()>> {
        let this = self.clone();
        Box::pin(async move {
            let result = sqlx::query("UPDATE chats SET title = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(&title)
                .bind(now_millis())
                .bind(id)
                .execute(&this.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound { entity: "chat", id });
            }
            this.notify(StoreChange::ChatsChanged);
            Ok(())
        })
    }

    fn delete_chat(&self, id: ChatId) -> BoxFuture<'static, RepositoryResult<()>> {
        let this = self.clone();
        Box::pin(async move {
            sqlx::query("DELETE FROM chats WHERE id = ?")
                .bind(id)
                .execute(&this.pool)
                .await?;

            this.notify(StoreChange::MessagesChanged { chat_id: id });
            this.notify(StoreChange::ChatsChanged);
            Ok(())
        })
    }

    fn delete_all_chats(&self) -> BoxFuture<'static, RepositoryResult<()>> {
        let this = self.clone();
        Box::pin(async move {
            let ids: Vec<ChatId> = sqlx::query_scalar("SELECT id FROM chats")
                .fetch_all(&this.pool)
                .await?;

            let mut tx = this.pool.begin().await?;
            sqlx::query("DELETE FROM messages").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM chats").execute(&mut *tx).await?;
            tx.commit().await?;

            for chat_id in ids {
                this.notify(StoreChange::MessagesChanged { chat_id });
            }
            this.notify(StoreChange::ChatsChanged);
            Ok(())
        })
    }

    fn insert_message(&self, message: Message) -> BoxFuture<'static, RepositoryResult<Message>> {
        let this = self.clone();
        Box::pin(async move {
            let mut tx = this.pool.begin().await?;

            let bumped = sqlx::query("UPDATE chats SET updated_at = ?1 WHERE id = ?2")
                .bind(now_millis())
                .bind(message.chat_id)
                .execute(&mut *tx)
                .await?;
            if bumped.rows_affected() == 0 {
                return Err(RepositoryError::NotFound {
                    entity: "chat",
                    id: message.chat_id,
                });
            }

            let result = sqlx::query(
                "INSERT INTO messages
                    (chat_id, role, content, created_at, is_streaming, is_thinking,
                     reasoning_content, tool_used, tool_display_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(message.chat_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.created_at)
            .bind(message.is_streaming)
            .bind(message.is_thinking)
            .bind(&message.reasoning_content)
            .bind(message.tool_used)
            .bind(&message.tool_display_name)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            this.notify(StoreChange::MessagesChanged {
                chat_id: message.chat_id,
            });
            Ok(Message {
                id: result.last_insert_rowid(),
                ..message
            })
        })
    }

    fn update_message(&self, message: Message) -> BoxFuture<'static, RepositoryResult<()>> {
        let this = self.clone();
        Box::pin(async move {
            let mut tx = this.pool.begin().await?;

            let result = sqlx::query(
                "UPDATE messages SET
                    content           = ?1,
                    is_streaming      = ?2,
                    is_thinking       = ?3,
                    reasoning_content = ?4,
                    tool_used         = ?5,
                    tool_display_name = ?6
                 WHERE id = ?7",
            )
            .bind(&message.content)
            .bind(message.is_streaming)
            .bind(message.is_thinking)
            .bind(&message.reasoning_content)
            .bind(message.tool_used)
            .bind(&message.tool_display_name)
            .bind(message.id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound {
                    entity: "message",
                    id: message.id,
                });
            }

            sqlx::query("UPDATE chats SET updated_at = ?1 WHERE id = ?2")
                .bind(now_millis())
                .bind(message.chat_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            this.notify(StoreChange::MessagesChanged {
                chat_id: message.chat_id,
            });
            Ok(())
        })
    }

    fn get_message(&self, id: MessageId) -> BoxFuture<'static, RepositoryResult<Option<Message>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"))
                .bind(id)
                .fetch_optional(&pool)
                .await?;

            row.as_ref().map(message_from_row).transpose()
        })
    }

    fn messages_for_chat(
        &self,
        chat_id: ChatId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Message>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ? ORDER BY created_at ASC, id ASC"
            ))
            .bind(chat_id)
            .fetch_all(&pool)
            .await?;

            rows.iter().map(message_from_row).collect()
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
