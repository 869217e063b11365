//! HTTP API for browser-pilot.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `POST /agent/{session_id}` - Run a task in a session
//! - `GET /api/videos/{session_id}` - List a session's recordings
//! - `GET /videos/{session_id}/{timestamp}/{filename}` - Download a recording

mod agent;
mod routes;
pub mod types;
mod videos;

pub use routes::{router, serve, AppState};
pub use types::*;
