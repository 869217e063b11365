//! Scripted tool clients shared by the supervisor, agent and API tests.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use crate::mcp::{
    McpToolDescriptor, TeardownError, ToolCallOutput, ToolClient, ToolConnectError,
    ToolInvocationError, ToolState,
};

/// Ordered log of `event:tool` strings.
#[derive(Clone, Default)]
pub struct ToolEvents(Arc<StdMutex<Vec<String>>>);

impl ToolEvents {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

pub struct MockTool {
    name: String,
    tools: Vec<McpToolDescriptor>,
    state: ToolState,
    events: ToolEvents,
    pub fail_connect: bool,
    pub fail_invoke: bool,
    /// Report a teardown failure after closing
    pub fail_disconnect: bool,
    /// Answer every call with an `isError` result
    pub tool_error: bool,
}

impl MockTool {
    pub fn new(name: &str, tools: &[&str], events: &ToolEvents) -> Self {
        Self {
            name: name.to_string(),
            tools: tools
                .iter()
                .map(|t| McpToolDescriptor {
                    name: t.to_string(),
                    description: Some(format!("{} tool", t)),
                    input_schema: serde_json::json!({ "type": "object" }),
                })
                .collect(),
            state: ToolState::Unconnected,
            events: events.clone(),
            fail_connect: false,
            fail_invoke: false,
            fail_disconnect: false,
            tool_error: false,
        }
    }

    pub fn boxed(name: &str, tools: &[&str], events: &ToolEvents) -> Box<dyn ToolClient> {
        Box::new(Self::new(name, tools, events))
    }

    fn record(&self, event: &str) {
        self.events.push(format!("{}:{}", event, self.name));
    }
}

#[async_trait]
impl ToolClient for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ToolState {
        self.state
    }

    fn tools(&self) -> &[McpToolDescriptor] {
        &self.tools
    }

    async fn connect(&mut self) -> Result<(), ToolConnectError> {
        self.record("connect");
        if self.fail_connect {
            self.state = ToolState::Failed;
            return Err(ToolConnectError::new(&self.name, "spawn failed"));
        }
        self.state = ToolState::Connected;
        Ok(())
    }

    async fn invoke(
        &mut self,
        tool: &str,
        _arguments: serde_json::Value,
    ) -> Result<ToolCallOutput, ToolInvocationError> {
        self.record(&format!("invoke {}", tool));
        if self.fail_invoke {
            return Err(ToolInvocationError::Channel {
                tool: self.name.clone(),
                reason: "broken pipe".to_string(),
            });
        }
        Ok(ToolCallOutput {
            text: format!("{} handled {}", self.name, tool),
            is_error: self.tool_error,
        })
    }

    async fn disconnect(&mut self) -> Result<(), TeardownError> {
        if self.state != ToolState::Connected {
            return Ok(());
        }
        self.record("disconnect");
        self.state = ToolState::Closed;
        if self.fail_disconnect {
            return Err(TeardownError {
                tool: self.name.clone(),
                reason: "stuck".to_string(),
            });
        }
        Ok(())
    }
}
