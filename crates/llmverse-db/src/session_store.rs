use std::path::Path;

use async_trait::async_trait;
use llmverse_common::{ConversationKey, Error, Result, Role, Turn};
use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{ConversationStore, storable, trim_to_budget};

/// Persisted history row.
#[derive(Debug, Clone)]
pub struct StoredTurn {
    pub id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Conversation history kept in SQLite so it survives restarts.
pub struct SqliteConversationStore {
    max_tokens: usize,
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    pub fn open(db_path: &Path, max_tokens: usize) -> Result<Self> {
        info!("opening conversation store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        run_migrations(&conn)?;
        Ok(Self {
            max_tokens,
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory(max_tokens: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        run_migrations(&conn)?;
        Ok(Self {
            max_tokens,
            conn: Mutex::new(conn),
        })
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_turns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_turns_conversation
            ON conversation_turns(user_id, provider, id);",
    )
    .map_err(|e| Error::Database(format!("migration failed: {e}")))
}

fn load_rows(conn: &Connection, key: &ConversationKey) -> Result<Vec<StoredTurn>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, role, content, created_at
             FROM conversation_turns
             WHERE user_id = ?1 AND provider = ?2
             ORDER BY id ASC",
        )
        .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;

    let rows = stmt
        .query_map(params![key.user, key.provider], |row| {
            let role_raw: String = row.get(1)?;
            let created_raw: String = row.get(3)?;
            Ok((row.get::<_, i64>(0)?, role_raw, row.get::<_, String>(2)?, created_raw))
        })
        .map_err(|e| Error::Database(format!("failed to load history: {e}")))?;

    let mut turns = Vec::new();
    for row in rows {
        let (id, role_raw, content, created_raw) =
            row.map_err(|e| Error::Database(format!("failed to read history row: {e}")))?;
        let Some(role) = Role::parse(&role_raw) else {
            warn!("skipping history row {id} with unknown role '{role_raw}'");
            continue;
        };
        turns.push(StoredTurn {
            id,
            role,
            content,
            created_at: parse_timestamp(&created_raw),
        });
    }
    Ok(turns)
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn load(&self, key: &ConversationKey) -> Result<Vec<Turn>> {
        let conn = self.conn.lock().await;
        let rows = load_rows(&conn, key)?;
        Ok(rows
            .into_iter()
            .map(|row| Turn::text(row.role, row.content))
            .collect())
    }

    async fn append(&self, key: &ConversationKey, turns: &[Turn]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        let now = chrono::Utc::now().to_rfc3339();
        for (role, content) in turns.iter().filter_map(storable) {
            tx.execute(
                "INSERT INTO conversation_turns (user_id, provider, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key.user, key.provider, role.as_str(), content, now],
            )
            .map_err(|e| Error::Database(format!("failed to append turn: {e}")))?;
        }

        let rows = load_rows(&tx, key)?;
        let mut history: Vec<Turn> = rows
            .iter()
            .map(|row| Turn::text(row.role, row.content.clone()))
            .collect();
        let dropped = trim_to_budget(&mut history, self.max_tokens);
        if dropped > 0 {
            let first_kept = rows[dropped].id;
            tx.execute(
                "DELETE FROM conversation_turns
                 WHERE user_id = ?1 AND provider = ?2 AND id < ?3",
                params![key.user, key.provider, first_kept],
            )
            .map_err(|e| Error::Database(format!("failed to trim history: {e}")))?;
            debug!("trimmed {dropped} turn(s) from history {key}");
        }

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit history: {e}")))?;
        Ok(())
    }

    async fn clear(&self, key: &ConversationKey) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM conversation_turns WHERE user_id = ?1 AND provider = ?2",
            params![key.user, key.provider],
        )
        .map_err(|e| Error::Database(format!("failed to clear history: {e}")))?;
        Ok(())
    }

    async fn clear_user(&self, user: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        let providers: usize = conn
            .query_row(
                "SELECT COUNT(DISTINCT provider) FROM conversation_turns WHERE user_id = ?1",
                params![user],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|e| Error::Database(format!("failed to count histories: {e}")))?
            as usize;
        conn.execute(
            "DELETE FROM conversation_turns WHERE user_id = ?1",
            params![user],
        )
        .map_err(|e| Error::Database(format!("failed to clear histories: {e}")))?;
        Ok(providers)
    }
}

fn parse_timestamp(value: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            warn!("failed to parse timestamp '{value}': {e}, falling back to now");
            chrono::Utc::now()
        })
}
