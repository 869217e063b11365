//! Tool lifecycle error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Spawning or handshaking with a tool process failed. Fatal to the request.
#[derive(Debug, Error)]
#[error("failed to connect tool '{tool}': {reason}")]
pub struct ToolConnectError {
    pub tool: String,
    pub reason: String,
}

impl ToolConnectError {
    pub fn new(tool: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }
}

/// A tool call failed mid-task.
#[derive(Debug, Error)]
pub enum ToolInvocationError {
    #[error("tool '{tool}' is not connected")]
    NotConnected { tool: String },

    #[error("no connected tool provides '{0}'")]
    UnknownTool(String),

    #[error("tool '{tool}' timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("tool '{tool}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        tool: String,
        code: i64,
        message: String,
    },

    #[error("tool '{tool}' channel failed: {reason}")]
    Channel { tool: String, reason: String },
}

/// Tearing a tool process down failed. Logged by the supervisor, never
/// surfaced to callers.
#[derive(Debug, Error)]
#[error("failed to tear down tool '{tool}': {reason}")]
pub struct TeardownError {
    pub tool: String,
    pub reason: String,
}

/// Failure of a supervised tool session.
#[derive(Debug, Error)]
pub enum ToolSessionError {
    #[error(transparent)]
    Connect(#[from] ToolConnectError),

    #[error(transparent)]
    Work(anyhow::Error),

    #[error("tool session work panicked: {0}")]
    Panicked(String),
}
