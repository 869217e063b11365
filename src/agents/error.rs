use thiserror::Error;

use crate::mcp::{ToolConnectError, ToolInvocationError, ToolSessionError};

/// Why a task run produced no result.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task must not be empty")]
    EmptyTask,

    #[error("Invalid {field}: {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error(transparent)]
    ToolConnect(ToolConnectError),

    #[error(transparent)]
    ToolInvocation(ToolInvocationError),

    #[error("Model error: {0}")]
    Model(anyhow::Error),

    #[error("Max iterations ({0}) reached before a final answer")]
    MaxIterations(usize),

    #[error("Run aborted: {0}")]
    Aborted(String),
}

impl From<ToolSessionError> for RunError {
    fn from(e: ToolSessionError) -> Self {
        match e {
            ToolSessionError::Connect(e) => RunError::ToolConnect(e),
            ToolSessionError::Work(e) => match e.downcast::<RunError>() {
                Ok(run_error) => run_error,
                Err(other) => RunError::Model(other),
            },
            ToolSessionError::Panicked(message) => RunError::Aborted(message),
        }
    }
}
