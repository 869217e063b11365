//! SQLite-based session store.

use super::{now_string, HistoryEntry, SessionStore};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS session_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_messages_session ON session_messages(session_id, id);
"#;

pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// Open (or create) the database at `db_path`.
    pub async fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create session store dir: {}", e))?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| format!("Failed to open SQLite database: {}", e))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| format!("Failed to run schema: {}", e))?;
            Ok::<_, String>(conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn append(
        &self,
        session_id: &str,
        user_id: &str,
        entries: &[HistoryEntry],
    ) -> Result<(), String> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();
        let user_id = user_id.to_string();
        let entries = entries.to_vec();
        let now = now_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(|e| e.to_string())?;
            for entry in &entries {
                tx.execute(
                    "INSERT INTO session_messages (session_id, user_id, role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![session_id, user_id, entry.role, entry.content, now],
                )
                .map_err(|e| e.to_string())?;
            }
            tx.commit().map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())?
    }

    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, String> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT role, content FROM (
                         SELECT id, role, content FROM session_messages
                         WHERE session_id = ?1
                         ORDER BY id DESC
                         LIMIT ?2
                     ) ORDER BY id ASC",
                )
                .map_err(|e| e.to_string())?;

            let entries = stmt
                .query_map(params![session_id, limit as i64], |row| {
                    Ok(HistoryEntry {
                        role: row.get(0)?,
                        content: row.get(1)?,
                    })
                })
                .map_err(|e| e.to_string())?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;

            Ok(entries)
        })
        .await
        .map_err(|e| e.to_string())?
    }
}
