//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::agents::NormalizedRunResult;
use crate::recordings::RecordingArtifact;

/// Request to run a task in a session.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentRequest {
    /// The task description / user prompt
    pub task: String,

    /// Caller identity recorded with the session history
    pub user_id: String,
}

/// Outcome of `POST /agent/:session_id`. Both variants are sent with
/// status 200; callers tell them apart by shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AgentRunResponse {
    Completed(NormalizedRunResult),
    Failed(ErrorResponse),
}

/// Recordings of a session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VideoListResponse {
    pub videos: Vec<RecordingArtifact>,
    pub is_recording: bool,
    pub total_count: usize,
    /// Why the listing degraded to empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VideoListResponse {
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
