//! In-memory session store (non-persistent).

use super::{HistoryEntry, SessionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Vec<HistoryEntry>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(
        &self,
        session_id: &str,
        _user_id: &str,
        entries: &[HistoryEntry],
    ) -> Result<(), String> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }

    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, String> {
        let sessions = self.sessions.read().await;
        let entries = sessions.get(session_id).map(Vec::as_slice).unwrap_or(&[]);
        let skip = entries.len().saturating_sub(limit);
        Ok(entries[skip..].to_vec())
    }
}
