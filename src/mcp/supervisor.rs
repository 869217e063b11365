//! Per-request ownership of the tool processes a task runs against.
//!
//! Handles are connected in declaration order and disconnected in reverse,
//! on every exit path of [`ToolSessionSupervisor::run`]. Teardown failures
//! are logged per handle and never replace the primary outcome.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::{ToolInvocationError, ToolSessionError};
use super::handle::ToolClient;
use super::types::{McpToolDescriptor, ToolCallOutput};

/// Outcome of a teardown pass, for logging only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    pub attempted: usize,
    pub failed: usize,
}

async fn disconnect_logged(handle: &mut Box<dyn ToolClient>, report: &mut TeardownReport) {
    report.attempted += 1;
    if let Err(e) = handle.disconnect().await {
        report.failed += 1;
        warn!(tool = %handle.name(), error = %e, "Tool teardown failed");
    }
}

/// The connected tools of one request, routed by tool name.
pub struct ToolSet {
    handles: Vec<Mutex<Box<dyn ToolClient>>>,
    names: Vec<String>,
    descriptors: Vec<McpToolDescriptor>,
    routes: HashMap<String, usize>,
}

impl ToolSet {
    fn new(connected: Vec<Box<dyn ToolClient>>) -> Self {
        let mut descriptors = Vec::new();
        let mut routes: HashMap<String, usize> = HashMap::new();
        let mut names = Vec::with_capacity(connected.len());

        for (index, handle) in connected.iter().enumerate() {
            names.push(handle.name().to_string());
            for tool in handle.tools() {
                if let Some(&owner) = routes.get(&tool.name) {
                    warn!(
                        tool = %tool.name,
                        kept = %names[owner],
                        dropped = %handle.name(),
                        "Duplicate tool name, keeping first provider"
                    );
                    continue;
                }
                routes.insert(tool.name.clone(), index);
                descriptors.push(tool.clone());
            }
        }

        Self {
            handles: connected.into_iter().map(Mutex::new).collect(),
            names,
            descriptors,
            routes,
        }
    }

    /// Every tool offered by the connected processes.
    pub fn descriptors(&self) -> &[McpToolDescriptor] {
        &self.descriptors
    }

    /// Names of the connected handles, in connection order.
    pub fn handle_names(&self) -> &[String] {
        &self.names
    }

    /// Name of the handle that serves `tool`.
    pub fn provider_of(&self, tool: &str) -> Option<&str> {
        self.routes.get(tool).map(|&i| self.names[i].as_str())
    }

    /// Forward a tool call to the process that provides it.
    pub async fn invoke(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallOutput, ToolInvocationError> {
        let index = *self
            .routes
            .get(tool)
            .ok_or_else(|| ToolInvocationError::UnknownTool(tool.to_string()))?;
        debug!(tool, provider = %self.names[index], "Invoking tool");
        self.handles[index].lock().await.invoke(tool, arguments).await
    }

    /// Disconnect every handle in reverse connection order.
    async fn teardown(&self) -> TeardownReport {
        let mut report = TeardownReport::default();
        for handle in self.handles.iter().rev() {
            let mut handle = handle.lock().await;
            disconnect_logged(&mut handle, &mut report).await;
        }
        report
    }
}

/// Owns the tool handles of one in-flight request.
pub struct ToolSessionSupervisor {
    handles: Vec<Box<dyn ToolClient>>,
}

impl ToolSessionSupervisor {
    /// Handles are connected in the order given.
    pub fn new(handles: Vec<Box<dyn ToolClient>>) -> Self {
        Self { handles }
    }

    /// Connect all handles, run `work` against them, then tear down.
    ///
    /// A connect failure stops further connects and rolls back the handles
    /// that already connected. Teardown runs after `work` whether it
    /// succeeds, fails or panics. Dropping the returned future before it
    /// completes skips teardown (processes still die through
    /// `kill_on_drop`), so callers that may be cancelled should drive it
    /// from a spawned task.
    pub async fn run<F, Fut, T>(self, work: F) -> Result<T, ToolSessionError>
    where
        F: FnOnce(Arc<ToolSet>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut connected: Vec<Box<dyn ToolClient>> = Vec::with_capacity(self.handles.len());

        for mut handle in self.handles {
            if let Err(e) = handle.connect().await {
                warn!(
                    tool = %e.tool,
                    rollback = connected.len(),
                    "Tool connect failed, rolling back connected tools"
                );
                let mut report = TeardownReport::default();
                for handle in connected.iter_mut().rev() {
                    disconnect_logged(handle, &mut report).await;
                }
                debug!(?report, "Rollback complete");
                return Err(ToolSessionError::Connect(e));
            }
            connected.push(handle);
        }

        info!(tools = connected.len(), "All tools connected");
        let set = Arc::new(ToolSet::new(connected));
        let work_set = Arc::clone(&set);
        let outcome = AssertUnwindSafe(async move { work(work_set).await })
            .catch_unwind()
            .await;

        let report = set.teardown().await;
        if report.failed > 0 {
            warn!(?report, "Tool session teardown finished with failures");
        } else {
            debug!(?report, "Tool session teardown complete");
        }

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ToolSessionError::Work(e)),
            Err(panic) => Err(ToolSessionError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
