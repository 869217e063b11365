//! A single externally spawned MCP tool process and its stdio channel.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{TeardownError, ToolConnectError, ToolInvocationError};
use super::types::*;
use crate::config::ToolCommand;

/// Lifecycle operations of one tool connection.
///
/// `ToolProcessHandle` is the production implementation; the supervisor only
/// depends on this trait.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Display name used in logs and errors.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> ToolState;

    /// Tools discovered during the handshake (empty until connected).
    fn tools(&self) -> &[McpToolDescriptor];

    /// Spawn and handshake. On failure the handle ends up `Failed` with
    /// nothing left running.
    async fn connect(&mut self) -> Result<(), ToolConnectError>;

    /// Call one tool. Only valid while `Connected`.
    async fn invoke(
        &mut self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallOutput, ToolInvocationError>;

    /// Stop and reap the process. A no-op unless `Connected`.
    async fn disconnect(&mut self) -> Result<(), TeardownError>;
}

#[derive(Debug, Error)]
enum ChannelError {
    #[error("JSON-RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("tool process closed its output")]
    Closed,

    #[error("stdin is closed")]
    StdinClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Running child process plus the framed channel over its stdio.
struct ToolProcess {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
    next_request_id: u64,
}

impl ToolProcess {
    fn spawn(command: &ToolCommand) -> Result<Self, ToolConnectError> {
        let (program, args) = command
            .argv
            .split_first()
            .ok_or_else(|| ToolConnectError::new(&command.name, "empty command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so launcher wrappers (npx, node) go down together.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            ToolConnectError::new(&command.name, format!("failed to spawn '{}': {}", program, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolConnectError::new(&command.name, "failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolConnectError::new(&command.name, "failed to capture stdout"))?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(command.name.clone(), stderr)));

        info!(tool = %command.name, pid = ?child.id(), "Spawned tool process");

        Ok(Self {
            name: command.name.clone(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            stderr_task,
            next_request_id: 1,
        })
    }

    async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ChannelError> {
        let stdin = self.stdin.as_mut().ok_or(ChannelError::StdinClosed)?;
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a request and wait for the response with the same id.
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ChannelError> {
        let id = self.next_request_id;
        self.next_request_id += 1;
        self.send(&JsonRpcRequest::new(id, method, params)).await?;

        loop {
            let line = self.stdout.next_line().await?.ok_or(ChannelError::Closed)?;
            if line.trim().is_empty() {
                continue;
            }
            let message: JsonRpcMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    debug!(tool = %self.name, error = %e, "Skipping non JSON-RPC output line");
                    continue;
                }
            };

            if message.is_response_to(id) {
                if let Some(error) = message.error {
                    return Err(ChannelError::Rpc(error));
                }
                return Ok(message.result.unwrap_or(serde_json::Value::Null));
            }

            match (message.method.as_deref(), message.id) {
                // Server-initiated request: we expose no client capabilities.
                (Some(method), Some(request_id)) => {
                    debug!(tool = %self.name, method, "Rejecting server request");
                    self.send(&serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": request_id,
                        "error": { "code": -32601, "message": "Method not found" }
                    }))
                    .await?;
                }
                (Some(method), None) => {
                    debug!(tool = %self.name, method, "Tool notification");
                }
                _ => {
                    debug!(tool = %self.name, expected = id, "Ignoring stale response");
                }
            }
        }
    }

    /// MCP initialize + initialized + tools/list.
    async fn handshake(&mut self) -> Result<Vec<McpToolDescriptor>, ChannelError> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let result = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)?;
        if let Some(server) = &init.server_info {
            debug!(
                tool = %self.name,
                server = %server.name,
                version = ?server.version,
                protocol = ?init.protocol_version,
                "Tool handshake accepted"
            );
        }

        self.send(&JsonRpcNotification::new("notifications/initialized"))
            .await?;

        let result = self.request("tools/list", None).await?;
        let tools: McpToolsResponse = serde_json::from_value(result)?;
        Ok(tools.tools)
    }

    /// Close stdin, SIGTERM the group, wait up to `grace`, then SIGKILL and reap.
    /// The group is swept with SIGKILL even when the leader exits in time.
    async fn terminate(mut self, grace: Duration) -> Result<(), String> {
        drop(self.stdin.take());
        let pid = self.child.id();
        if let Some(pid) = pid {
            signal_group(pid, Signal::Terminate);
        }

        let outcome = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(tool = %self.name, %status, "Tool process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(format!("failed to wait for process: {}", e)),
            Err(_) => {
                warn!(tool = %self.name, ?grace, "Tool process did not exit in time, killing");
                if let Some(pid) = pid {
                    signal_group(pid, Signal::Kill);
                }
                self.child
                    .kill()
                    .await
                    .map_err(|e| format!("failed to kill process: {}", e))
            }
        };

        // Descendants that ignored SIGTERM keep the group alive after the
        // leader is reaped.
        if let Some(pid) = pid {
            signal_group(pid, Signal::Kill);
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        outcome
    }
}

impl Drop for ToolProcess {
    fn drop(&mut self) {
        // Only reached with a live pid when the owning future was dropped
        // before teardown; `kill_on_drop` covers the direct child only.
        if let Some(pid) = self.child.id() {
            signal_group(pid, Signal::Kill);
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

async fn drain_stderr(tool: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(tool = %tool, "stderr: {}", line);
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    unsafe {
        libc::kill(-(pid as i32), sig);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}

/// Handle to one MCP tool process, created per request and never reused.
pub struct ToolProcessHandle {
    command: ToolCommand,
    connect_timeout: Duration,
    shutdown_timeout: Duration,
    state: ToolState,
    process: Option<ToolProcess>,
    tools: Vec<McpToolDescriptor>,
}

impl ToolProcessHandle {
    pub fn new(
        command: ToolCommand,
        connect_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            command,
            connect_timeout,
            shutdown_timeout,
            state: ToolState::Unconnected,
            process: None,
            tools: Vec::new(),
        }
    }

    /// OS process id while the process is alive.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.id())
    }
}

#[async_trait]
impl ToolClient for ToolProcessHandle {
    fn name(&self) -> &str {
        &self.command.name
    }

    fn state(&self) -> ToolState {
        self.state
    }

    fn tools(&self) -> &[McpToolDescriptor] {
        &self.tools
    }

    async fn connect(&mut self) -> Result<(), ToolConnectError> {
        if self.state != ToolState::Unconnected {
            return Err(ToolConnectError::new(
                &self.command.name,
                format!("cannot connect from state {:?}", self.state),
            ));
        }
        self.state = ToolState::Connecting;

        let mut process = match ToolProcess::spawn(&self.command) {
            Ok(process) => process,
            Err(e) => {
                error!(tool = %self.command.name, error = %e, "Tool spawn failed");
                self.state = ToolState::Failed;
                return Err(e);
            }
        };

        let handshake = tokio::time::timeout(self.connect_timeout, process.handshake()).await;
        let reason = match handshake {
            Ok(Ok(tools)) => {
                info!(
                    tool = %self.command.name,
                    tools = tools.len(),
                    "Tool connected"
                );
                self.tools = tools;
                self.process = Some(process);
                self.state = ToolState::Connected;
                return Ok(());
            }
            Ok(Err(e)) => format!("handshake failed: {}", e),
            Err(_) => format!("handshake timed out after {:?}", self.connect_timeout),
        };

        error!(tool = %self.command.name, %reason, "Tool connect failed");
        self.state = ToolState::Failed;
        if let Err(e) = process.terminate(Duration::ZERO).await {
            warn!(
                tool = %self.command.name,
                error = %e,
                "Failed to reap tool after connect failure"
            );
        }
        Err(ToolConnectError::new(&self.command.name, reason))
    }

    async fn invoke(
        &mut self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallOutput, ToolInvocationError> {
        let name = self.command.name.clone();
        let process = match (self.state, self.process.as_mut()) {
            (ToolState::Connected, Some(process)) => process,
            _ => return Err(ToolInvocationError::NotConnected { tool: name }),
        };

        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        let timeout = self.command.invoke_timeout;
        let response =
            tokio::time::timeout(timeout, process.request("tools/call", Some(params))).await;
        let result = match response {
            Ok(Ok(result)) => result,
            Ok(Err(ChannelError::Rpc(e))) => {
                return Err(ToolInvocationError::Rpc {
                    tool: name,
                    code: e.code,
                    message: e.message,
                })
            }
            Ok(Err(e)) => {
                return Err(ToolInvocationError::Channel {
                    tool: name,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(ToolInvocationError::Timeout { tool: name, timeout }),
        };

        serde_json::from_value::<McpCallToolResponse>(result)
            .map(ToolCallOutput::from)
            .map_err(|e| ToolInvocationError::Channel {
                tool: name,
                reason: format!("invalid tools/call result: {}", e),
            })
    }

    async fn disconnect(&mut self) -> Result<(), TeardownError> {
        if self.state != ToolState::Connected {
            return Ok(());
        }
        self.state = ToolState::Closed;

        let Some(process) = self.process.take() else {
            return Ok(());
        };
        process
            .terminate(self.shutdown_timeout)
            .await
            .map_err(|reason| TeardownError {
                tool: self.command.name.clone(),
                reason,
            })?;
        info!(tool = %self.command.name, "Tool disconnected");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    const HANDSHAKE: &str = r#"
read -r _init
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.1.0"}}}'
read -r _initialized
read -r _list
printf '%s\n' 'starting up...'
printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info","data":"ready"}}'
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo text","inputSchema":{"type":"object"}}]}}'
"#;

    fn script_handle(name: &str, script: String, shutdown: Duration) -> ToolProcessHandle {
        ToolProcessHandle::new(
            ToolCommand {
                name: name.to_string(),
                argv: vec!["/bin/sh".to_string(), "-c".to_string(), script],
                invoke_timeout: Duration::from_secs(5),
            },
            Duration::from_secs(5),
            shutdown,
        )
    }

    fn fake_server() -> ToolProcessHandle {
        let script = format!(
            "{}\nwhile read -r _call; do printf '%s\\n' '{}'; done\n",
            HANDSHAKE,
            r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"pong"}],"isError":false}}"#
        );
        script_handle("fake", script, Duration::from_secs(5))
    }

    fn process_alive(pid: u32) -> bool {
        if unsafe { libc::kill(pid as i32, 0) } != 0 {
            return false;
        }
        // A killed process may linger as a zombie until its new parent reaps it.
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(true),
            Err(_) => true,
        }
    }

    async fn wait_until_dead(pid: u32) -> bool {
        for _ in 0..50 {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    #[tokio::test]
    async fn connect_discovers_tools_and_invokes() {
        let mut handle = fake_server();
        handle.connect().await.expect("connect");
        assert_eq!(handle.state(), ToolState::Connected);
        assert_eq!(handle.tools().len(), 1);
        assert_eq!(handle.tools()[0].name, "echo");

        let output = handle
            .invoke("echo", serde_json::json!({ "text": "ping" }))
            .await
            .expect("invoke");
        assert_eq!(output.text, "pong");
        assert!(!output.is_error);

        handle.disconnect().await.expect("disconnect");
        assert_eq!(handle.state(), ToolState::Closed);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut handle = fake_server();
        handle.connect().await.expect("connect");
        let pid = handle.pid().expect("pid");

        handle.disconnect().await.expect("first disconnect");
        assert!(!process_alive(pid));
        assert!(handle.pid().is_none());

        handle.disconnect().await.expect("second disconnect is a no-op");
        assert_eq!(handle.state(), ToolState::Closed);
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_noop() {
        let mut handle = fake_server();
        handle.disconnect().await.expect("noop");
        assert_eq!(handle.state(), ToolState::Unconnected);
    }

    #[tokio::test]
    async fn invoke_requires_connection() {
        let mut handle = fake_server();
        let err = handle
            .invoke("echo", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolInvocationError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn spawn_failure_marks_failed() {
        let mut handle = ToolProcessHandle::new(
            ToolCommand {
                name: "missing".to_string(),
                argv: vec!["/definitely/not/a/binary".to_string()],
                invoke_timeout: Duration::from_secs(1),
            },
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let err = handle.connect().await.unwrap_err();
        assert_eq!(err.tool, "missing");
        assert_eq!(handle.state(), ToolState::Failed);
        handle.disconnect().await.expect("disconnect after failure is a no-op");
        assert_eq!(handle.state(), ToolState::Failed);
    }

    #[tokio::test]
    async fn early_exit_fails_handshake() {
        let mut handle = script_handle("quitter", "exit 0".to_string(), Duration::from_secs(1));
        let err = handle.connect().await.unwrap_err();
        assert!(err.reason.contains("handshake failed"), "{}", err.reason);
        assert_eq!(handle.state(), ToolState::Failed);
    }

    #[tokio::test]
    async fn handshake_timeout_reaps_process() {
        let mut handle = ToolProcessHandle::new(
            ToolCommand {
                name: "sleeper".to_string(),
                argv: vec!["/bin/sh".into(), "-c".into(), "sleep 30".into()],
                invoke_timeout: Duration::from_secs(1),
            },
            Duration::from_millis(200),
            Duration::from_secs(1),
        );
        let started = Instant::now();
        let err = handle.connect().await.unwrap_err();
        assert!(err.reason.contains("timed out"), "{}", err.reason);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(handle.state(), ToolState::Failed);
        assert!(handle.pid().is_none());
    }

    #[tokio::test]
    async fn unresponsive_process_is_force_killed() {
        let script = format!("{}\ntrap '' TERM\nwhile :; do sleep 1; done\n", HANDSHAKE);
        let mut handle = script_handle("stubborn", script, Duration::from_millis(300));
        handle.connect().await.expect("connect");
        let pid = handle.pid().expect("pid");

        let started = Instant::now();
        handle.disconnect().await.expect("forced disconnect still succeeds");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!process_alive(pid));
        assert_eq!(handle.state(), ToolState::Closed);
    }

    #[tokio::test]
    async fn descendants_ignoring_sigterm_are_killed_with_the_group() {
        let temp = tempfile::TempDir::new().unwrap();
        let pid_file = temp.path().join("descendant.pid");
        let script = format!(
            "{}
(trap '' TERM; exec sleep 300) &
echo $! > '{}'
while read -r _call; do :; done
",
            HANDSHAKE,
            pid_file.display()
        );
        let mut handle = script_handle("spawner", script, Duration::from_secs(2));
        handle.connect().await.expect("connect");

        let mut descendant = None;
        for _ in 0..50 {
            if let Ok(text) = std::fs::read_to_string(&pid_file) {
                if let Ok(pid) = text.trim().parse::<u32>() {
                    descendant = Some(pid);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let descendant = descendant.expect("descendant pid written");
        assert!(process_alive(descendant));

        handle.disconnect().await.expect("disconnect");
        assert_eq!(handle.state(), ToolState::Closed);
        assert!(wait_until_dead(descendant).await, "descendant {} survived", descendant);
    }

    #[tokio::test]
    async fn rpc_error_surfaces_as_invocation_error() {
        let script = format!(
            "{}\nwhile read -r _call; do printf '%s\\n' '{}'; done\n",
            HANDSHAKE,
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32602,"message":"unknown tool"}}"#
        );
        let mut handle = script_handle("erroring", script, Duration::from_secs(5));
        handle.connect().await.expect("connect");
        let err = handle
            .invoke("nope", serde_json::json!({}))
            .await
            .unwrap_err();
        match err {
            ToolInvocationError::Rpc { code, message, .. } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "unknown tool");
            }
            other => panic!("expected Rpc error, got {:?}", other),
        }
        handle.disconnect().await.expect("disconnect");
    }
}
