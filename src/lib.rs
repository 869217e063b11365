//! # browser-pilot
//!
//! HTTP service that runs browser-automation tasks with a language model
//! driving externally spawned MCP tool processes, and exposes the screen
//! recordings those tools write.
//!
//! ## Request Flow
//! 1. `POST /agent/{session_id}` reaches the [`agents::AgentRunner`]
//! 2. A [`mcp::ToolSessionSupervisor`] spawns and handshakes the thinking
//!    and browser tools for this request only
//! 3. The [`agents::ChatAgent`] loops model calls and tool calls until the
//!    model answers
//! 4. Tools are torn down in reverse order, whatever the outcome
//! 5. The result is normalized and the exchange appended to session history
//!
//! Independently, the browser tool writes `.webm` recordings under
//! `<videos_dir>/<session_id>/`, which [`recordings::RecordingMonitor`]
//! lists and serves.
//!
//! ## Modules
//! - `mcp`: tool process lifecycle and stdio JSON-RPC
//! - `agents`: task execution and result normalization
//! - `llm`: chat-completions client
//! - `session_store`: conversation history
//! - `recordings`: recording discovery and serving
//! - `api`: HTTP surface

pub mod agents;
pub mod api;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod recordings;
pub mod session_store;
#[cfg(test)]
pub(crate) mod testing;
pub mod util;

pub use config::Config;
