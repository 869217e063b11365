//! MCP tool processes: spawning, handshake, invocation and teardown.
//!
//! - `handle`: one stdio tool process (`ToolProcessHandle`) behind the
//!   `ToolClient` trait
//! - `supervisor`: per-request connect / run / teardown of an ordered set of
//!   handles
//! - `types`: JSON-RPC 2.0 and MCP payloads
//! - `error`: connect / invocation / teardown errors

mod error;
mod handle;
mod supervisor;
mod types;

pub use error::{TeardownError, ToolConnectError, ToolInvocationError, ToolSessionError};
pub use handle::{ToolClient, ToolProcessHandle};
pub use supervisor::{TeardownReport, ToolSessionSupervisor, ToolSet};
pub use types::{McpToolDescriptor, ToolCallOutput, ToolState, MCP_PROTOCOL_VERSION};
