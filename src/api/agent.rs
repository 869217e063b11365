//! Task execution endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use super::routes::AppState;
use super::types::{AgentRequest, AgentRunResponse, ErrorResponse};

/// Run a task for a session. Failures are reported in the body, not the
/// status code.
pub async fn run_agent(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<AgentRequest>,
) -> Json<AgentRunResponse> {
    match state
        .runner
        .run(&session_id, &req.user_id, &req.task)
        .await
    {
        Ok(result) => Json(AgentRunResponse::Completed(result)),
        Err(e) => {
            tracing::error!(session_id = %session_id, "Agent run failed: {}", e);
            Json(AgentRunResponse::Failed(ErrorResponse::new(e.to_string())))
        }
    }
}
