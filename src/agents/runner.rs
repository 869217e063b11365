//! Per-request task execution: tool lifecycle, history and normalization.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use super::result::NormalizedRunResult;
use super::{ConversationModel, RunError};
use crate::config::ToolsConfig;
use crate::mcp::{ToolClient, ToolProcessHandle, ToolSessionSupervisor};
use crate::recordings::ArtifactStore;
use crate::session_store::{HistoryEntry, SessionStore};
use crate::util::is_safe_path_segment;

/// Produces fresh, unconnected tool handles for one request.
pub trait ToolLauncher: Send + Sync {
    /// Handles in connection order. `recording_dir` is where the browser
    /// tool should write this session's videos.
    fn launch(&self, recording_dir: &Path) -> Vec<Box<dyn ToolClient>>;
}

/// Spawns the configured stdio tool processes: thinking first, then browser.
pub struct ProcessToolLauncher {
    config: ToolsConfig,
}

impl ProcessToolLauncher {
    pub fn new(config: ToolsConfig) -> Self {
        Self { config }
    }
}

impl ToolLauncher for ProcessToolLauncher {
    fn launch(&self, recording_dir: &Path) -> Vec<Box<dyn ToolClient>> {
        let connect = self.config.connect_timeout;
        let shutdown = self.config.shutdown_timeout;
        vec![
            Box::new(ToolProcessHandle::new(
                self.config.thinking.clone(),
                connect,
                shutdown,
            )),
            Box::new(ToolProcessHandle::new(
                self.config.browser.with_video_dir(recording_dir),
                connect,
                shutdown,
            )),
        ]
    }
}

/// Runs tasks for sessions, one at a time per session.
pub struct AgentRunner {
    model: Arc<dyn ConversationModel>,
    store: Arc<dyn SessionStore>,
    launcher: Arc<dyn ToolLauncher>,
    artifacts: ArtifactStore,
    history_limit: usize,
    session_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentRunner {
    pub fn new(
        model: Arc<dyn ConversationModel>,
        store: Arc<dyn SessionStore>,
        launcher: Arc<dyn ToolLauncher>,
        artifacts: ArtifactStore,
        history_limit: usize,
    ) -> Self {
        Self {
            model,
            store,
            launcher,
            artifacts,
            history_limit,
            session_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Run `task` for a session and return the normalized result.
    ///
    /// Inputs are validated before any process is spawned. The run itself
    /// executes on a spawned task, so dropping this future (client
    /// disconnect) does not interrupt tool teardown.
    pub async fn run(
        self: &Arc<Self>,
        session_id: &str,
        user_id: &str,
        task: &str,
    ) -> Result<NormalizedRunResult, RunError> {
        if task.trim().is_empty() {
            return Err(RunError::EmptyTask);
        }
        for (field, value) in [("session_id", session_id), ("user_id", user_id)] {
            if !is_safe_path_segment(value) {
                return Err(RunError::InvalidIdentifier {
                    field,
                    value: value.to_string(),
                });
            }
        }

        let runner = Arc::clone(self);
        let session_id = session_id.to_string();
        let user_id = user_id.to_string();
        let task = task.to_string();
        tokio::spawn(async move { runner.run_serialized(session_id, user_id, task).await })
            .await
            .map_err(|e| RunError::Aborted(e.to_string()))?
    }

    async fn run_serialized(
        &self,
        session_id: String,
        user_id: String,
        task: String,
    ) -> Result<NormalizedRunResult, RunError> {
        let guard = self.lock_session(&session_id).await;
        let outcome = self.run_locked(&session_id, &user_id, task).await;
        drop(guard);
        self.release_session(&session_id);
        outcome
    }

    async fn run_locked(
        &self,
        session_id: &str,
        user_id: &str,
        task: String,
    ) -> Result<NormalizedRunResult, RunError> {
        let history = match self.store.history(session_id, self.history_limit).await {
            Ok(history) => history,
            Err(e) => {
                warn!(session_id, "Failed to load session history: {}", e);
                Vec::new()
            }
        };

        let handles = self
            .launcher
            .launch(&self.artifacts.session_dir(session_id));
        info!(session_id, tools = handles.len(), "Starting agent run");

        let model = Arc::clone(&self.model);
        let work_task = task.clone();
        let raw = ToolSessionSupervisor::new(handles)
            .run(move |tools| async move {
                model
                    .run(&work_task, &history, &tools)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await?;

        let result = NormalizedRunResult::from(raw);
        info!(
            session_id,
            run_id = %result.response.run_id,
            tool_calls = result.response.tools.len(),
            "Agent run finished"
        );

        let entries = [
            HistoryEntry::user(task),
            HistoryEntry::assistant(result.response.content.clone()),
        ];
        if let Err(e) = self.store.append(session_id, user_id, &entries).await {
            warn!(session_id, "Failed to append session history: {}", e);
        }

        Ok(result)
    }

    async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .session_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Forget the session's lock once nobody holds or awaits it.
    fn release_session(&self, session_id: &str) {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }
}
