//! Conversation history storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database keyed by session

mod memory;
mod sqlite;

pub use memory::InMemorySessionStore;
pub use sqlite::SqliteSessionStore;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// One message in a session's conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// `user` or `assistant`
    pub role: String,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Get current timestamp as RFC3339 string.
pub fn now_string() -> String {
    Utc::now().to_rfc3339()
}

/// Session store trait - implemented by all storage backends.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Append entries to a session's history, in order.
    async fn append(
        &self,
        session_id: &str,
        user_id: &str,
        entries: &[HistoryEntry],
    ) -> Result<(), String>;

    /// The last `limit` entries of a session, oldest first.
    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, String>;
}

/// Open the configured store: SQLite at `path`, or in-memory when `None`.
pub async fn open_store(path: Option<PathBuf>) -> Result<Arc<dyn SessionStore>, String> {
    match path {
        Some(path) => {
            tracing::info!("Using SQLite session store at {}", path.display());
            Ok(Arc::new(SqliteSessionStore::new(path).await?))
        }
        None => {
            tracing::info!("Using in-memory session store");
            Ok(Arc::new(InMemorySessionStore::new()))
        }
    }
}
