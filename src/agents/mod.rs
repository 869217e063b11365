//! Agents module - task execution against supervised tools.
//!
//! # Components
//! - **AgentRunner**: validates a request, owns the tool session for it,
//!   serializes runs per session and records history
//! - **ChatAgent**: the conversation model, a tool-calling loop over an
//!   OpenAI-compatible chat endpoint
//! - **NormalizedRunResult**: the stable result shape returned to callers

mod chat;
mod error;
pub mod result;
mod runner;

pub use chat::ChatAgent;
pub use error::RunError;
pub use result::{NormalizedRunResult, RawRunOutput, ToolExecution};
pub use runner::{AgentRunner, ProcessToolLauncher, ToolLauncher};

use async_trait::async_trait;

use crate::mcp::ToolSet;
use crate::session_store::HistoryEntry;

/// Something that can carry a task to completion with connected tools.
///
/// Implementations may leave any part of [`RawRunOutput`] unset; the runner
/// fills in defaults.
#[async_trait]
pub trait ConversationModel: Send + Sync {
    async fn run(
        &self,
        task: &str,
        history: &[HistoryEntry],
        tools: &ToolSet,
    ) -> Result<RawRunOutput, RunError>;
}
