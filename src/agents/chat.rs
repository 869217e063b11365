//! Tool-calling conversation loop over a chat-completions model.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use uuid::Uuid;

use super::result::{format_tool_call, RawRunOutput, ToolExecution};
use super::{ConversationModel, RunError};
use crate::llm::{ChatMessage, LlmClient, Role, TokenUsage, ToolCall, ToolDefinition};
use crate::mcp::{ToolInvocationError, ToolSet};
use crate::session_store::HistoryEntry;

const INSTRUCTIONS: &str = r#"You are a browser automation tool. Your task is to assist the user
in automating web tasks using a Playwright-driven browser.

You have access to the following tools:
- Browser: A headless browser instance for web interaction automation
- Sequential Thinking: A tool for structured sequential thinking

Always carefully analyze web pages before interacting with them.
Look for specific elements and navigate intelligently.

Always respond in markdown format: code blocks for code snippets, bold for
important terms, headers for titles and subtitles, and tables when useful."#;

/// Drives one task through repeated model calls and tool invocations.
///
/// # Algorithm
/// 1. Send instructions, session history and the task
/// 2. If the model requests tool calls: run them, feed back results
/// 3. Repeat until the model answers without tool calls or
///    `max_iterations` is exhausted
pub struct ChatAgent {
    llm: Arc<dyn LlmClient>,
    model: String,
    max_iterations: usize,
}

impl ChatAgent {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            llm,
            model: model.into(),
            max_iterations,
        }
    }

    fn initial_messages(task: &str, history: &[HistoryEntry]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new(Role::System, INSTRUCTIONS));
        for entry in history {
            let role = match entry.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                other => {
                    tracing::debug!(role = other, "Skipping history entry with unknown role");
                    continue;
                }
            };
            messages.push(ChatMessage::new(role, entry.content.clone()));
        }
        messages.push(ChatMessage::new(Role::User, task));
        messages
    }

    fn tool_definitions(tools: &ToolSet) -> Vec<ToolDefinition> {
        tools
            .descriptors()
            .iter()
            .map(|d| {
                ToolDefinition::function(
                    d.name.clone(),
                    d.description.clone().unwrap_or_default(),
                    d.input_schema.clone(),
                )
            })
            .collect()
    }

    /// Run one tool call. Failures the model can react to (bad arguments,
    /// unknown tool, `isError` results) become error text; transport
    /// failures end the run.
    async fn execute_tool_call(
        &self,
        call: &ToolCall,
        tools: &ToolSet,
    ) -> Result<ToolExecution, RunError> {
        let started = Instant::now();
        let name = call.function.name.as_str();
        let raw_args = call.function.arguments.trim();

        let parsed = if raw_args.is_empty() {
            Ok(serde_json::json!({}))
        } else {
            serde_json::from_str::<serde_json::Value>(raw_args)
        };

        let (tool_args, result, tool_call_error) = match parsed {
            Err(e) => (
                serde_json::Value::String(raw_args.to_string()),
                format!("Error: invalid JSON arguments: {}", e),
                true,
            ),
            Ok(args) => match tools.invoke(name, args.clone()).await {
                Ok(output) => (args, output.text, output.is_error),
                Err(ToolInvocationError::UnknownTool(tool)) => {
                    (args, format!("Error: no tool named '{}'", tool), true)
                }
                Err(e) => {
                    tracing::error!(tool = name, "Tool invocation failed: {}", e);
                    return Err(RunError::ToolInvocation(e));
                }
            },
        };

        if tool_call_error {
            tracing::debug!(tool = name, "Tool reported an error: {}", result);
        }

        Ok(ToolExecution {
            tool_call_id: call.id.clone(),
            tool_name: name.to_string(),
            tool_args,
            result,
            tool_call_error,
            duration: started.elapsed().as_secs_f64(),
        })
    }
}

#[async_trait]
impl ConversationModel for ChatAgent {
    async fn run(
        &self,
        task: &str,
        history: &[HistoryEntry],
        tools: &ToolSet,
    ) -> Result<RawRunOutput, RunError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let definitions = Self::tool_definitions(tools);
        let mut messages = Self::initial_messages(task, history);

        let mut usage = TokenUsage::default();
        let mut model_name: Option<String> = None;
        let mut executions = Vec::new();
        let mut formatted = Vec::new();

        for iteration in 0..self.max_iterations {
            tracing::debug!(run_id = %run_id, "ChatAgent iteration {}", iteration + 1);

            let response = self
                .llm
                .chat_completion(&self.model, &messages, Some(&definitions))
                .await
                .map_err(RunError::Model)?;

            if let Some(step_usage) = &response.usage {
                usage.add(step_usage);
            }
            if response.model.is_some() {
                model_name = response.model.clone();
            }

            let calls = match response.tool_calls {
                Some(calls) if !calls.is_empty() => calls,
                _ => {
                    return Ok(RawRunOutput {
                        content: response.content,
                        model: model_name.or_else(|| Some(self.model.clone())),
                        run_id: Some(run_id),
                        input_tokens: Some(usage.prompt_tokens),
                        output_tokens: Some(usage.completion_tokens),
                        reasoning_tokens: Some(usage.reasoning_tokens),
                        elapsed: Some(started.elapsed()),
                        formatted_tool_calls: Some(formatted),
                        tools: Some(executions),
                    });
                }
            };

            messages.push(ChatMessage::assistant_tool_calls(
                response.content,
                calls.clone(),
            ));
            for call in &calls {
                let execution = self.execute_tool_call(call, tools).await?;
                formatted.push(format_tool_call(&execution.tool_name, &execution.tool_args));
                messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    execution.result.clone(),
                ));
                executions.push(execution);
            }
        }

        Err(RunError::MaxIterations(self.max_iterations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTool, ToolEvents};
    use crate::llm::{ChatResponse, FunctionCall};
    use crate::mcp::{ToolClient, ToolSessionSupervisor};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Replays canned responses and records every request.
    struct ScriptedLlm {
        responses: StdMutex<VecDeque<ChatResponse>>,
        requests: StdMutex<Vec<Vec<ChatMessage>>>,
        repeat_last: bool,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: StdMutex::new(responses.into()),
                requests: StdMutex::new(Vec::new()),
                repeat_last: false,
            }
        }

        fn repeating(response: ChatResponse) -> Self {
            Self {
                repeat_last: true,
                ..Self::new(vec![response])
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
        ) -> anyhow::Result<ChatResponse> {
            self.requests.lock().unwrap().push(messages.to_vec());
            let mut responses = self.responses.lock().unwrap();
            if self.repeat_last && responses.len() == 1 {
                return Ok(responses[0].clone());
            }
            responses
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn tool_response(
        calls: Vec<ToolCall>,
        prompt: u64,
        completion: u64,
        reasoning: u64,
    ) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: Some(calls),
            finish_reason: Some("tool_calls".to_string()),
            usage: Some(TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                reasoning_tokens: reasoning,
            }),
            model: Some("gpt-5-mini-2025-08-07".to_string()),
        }
    }

    fn final_response(content: &str, prompt: u64, completion: u64) -> ChatResponse {
        ChatResponse {
            content: Some(content.to_string()),
            tool_calls: None,
            finish_reason: Some("stop".to_string()),
            usage: Some(TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                reasoning_tokens: 0,
            }),
            model: Some("gpt-5-mini-2025-08-07".to_string()),
        }
    }

    async fn run_with_tools(
        agent: &ChatAgent,
        tools: Vec<Box<dyn ToolClient>>,
        task: &str,
        history: Vec<HistoryEntry>,
    ) -> Result<RawRunOutput, RunError> {
        let task = task.to_string();
        ToolSessionSupervisor::new(tools)
            .run(|set| async move {
                agent
                    .run(&task, &history, &set)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await
            .map_err(RunError::from)
    }

    #[tokio::test]
    async fn tool_round_trip_then_final_answer() {
        let events = ToolEvents::default();
        let llm = Arc::new(ScriptedLlm::new(vec![
            tool_response(
                vec![call("call_1", "browser_navigate", r#"{"url":"https://example.com"}"#)],
                100,
                20,
                8,
            ),
            final_response("# Done", 150, 30),
        ]));
        let agent = ChatAgent::new(llm.clone(), "gpt-5-mini", 10);

        let output = run_with_tools(
            &agent,
            vec![MockTool::boxed("browser", &["browser_navigate"], &events)],
            "open example.com",
            vec![],
        )
        .await
        .unwrap();

        assert_eq!(output.content.as_deref(), Some("# Done"));
        assert_eq!(output.model.as_deref(), Some("gpt-5-mini-2025-08-07"));
        assert_eq!(output.input_tokens, Some(250));
        assert_eq!(output.output_tokens, Some(50));
        assert_eq!(output.reasoning_tokens, Some(8));
        assert!(output.run_id.is_some_and(|id| !id.is_empty()));
        assert_eq!(
            output.formatted_tool_calls,
            Some(vec!["browser_navigate(url=https://example.com)".to_string()])
        );

        let tools = output.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_call_id, "call_1");
        assert_eq!(tools[0].result, "browser handled browser_navigate");
        assert!(!tools[0].tool_call_error);

        // Second request carries the assistant tool call and its result.
        let requests = llm.requests.lock().unwrap();
        let second = &requests[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[3].role, Role::Tool);
        assert_eq!(second[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(
            events.snapshot(),
            vec![
                "connect:browser",
                "invoke browser_navigate:browser",
                "disconnect:browser"
            ]
        );
    }

    #[tokio::test]
    async fn history_precedes_task() {
        let llm = Arc::new(ScriptedLlm::new(vec![final_response("ok", 1, 1)]));
        let agent = ChatAgent::new(llm.clone(), "gpt-5-mini", 3);
        let history = vec![
            HistoryEntry::user("log in"),
            HistoryEntry::assistant("logged in"),
            HistoryEntry {
                role: "system-note".to_string(),
                content: "ignored".to_string(),
            },
        ];

        run_with_tools(&agent, vec![], "now log out", history)
            .await
            .unwrap();

        let requests = llm.requests.lock().unwrap();
        let contents: Vec<_> = requests[0]
            .iter()
            .skip(1)
            .map(|m| (m.role.clone(), m.content.clone().unwrap_or_default()))
            .collect();
        assert_eq!(
            contents,
            vec![
                (Role::User, "log in".to_string()),
                (Role::Assistant, "logged in".to_string()),
                (Role::User, "now log out".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn tool_errors_are_fed_back_to_the_model() {
        let events = ToolEvents::default();
        let llm = Arc::new(ScriptedLlm::new(vec![
            tool_response(
                vec![
                    call("call_1", "browser_click", r#"{"ref":"e12"}"#),
                    call("call_2", "no_such_tool", "{}"),
                    call("call_3", "browser_click", "{not json"),
                ],
                10,
                5,
                0,
            ),
            final_response("Could not click", 10, 5),
        ]));
        let agent = ChatAgent::new(llm, "gpt-5-mini", 5);

        let mut browser = MockTool::new("browser", &["browser_click"], &events);
        browser.tool_error = true;
        let output = run_with_tools(&agent, vec![Box::new(browser)], "click it", vec![])
            .await
            .unwrap();

        let tools = output.tools.unwrap();
        assert_eq!(tools.len(), 3);
        assert!(tools.iter().all(|t| t.tool_call_error));
        assert!(tools[1].result.contains("no tool named 'no_such_tool'"));
        assert!(tools[2].result.contains("invalid JSON arguments"));
        assert_eq!(output.content.as_deref(), Some("Could not click"));
    }

    #[tokio::test]
    async fn transport_failure_ends_the_run() {
        let events = ToolEvents::default();
        let llm = Arc::new(ScriptedLlm::new(vec![tool_response(
            vec![call("call_1", "browser_click", "{}")],
            1,
            1,
            0,
        )]));
        let agent = ChatAgent::new(llm, "gpt-5-mini", 5);

        let mut browser = MockTool::new("browser", &["browser_click"], &events);
        browser.fail_invoke = true;
        let err = run_with_tools(&agent, vec![Box::new(browser)], "click", vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::ToolInvocation(_)));
        assert_eq!(events.count("disconnect:browser"), 1);
    }

    #[tokio::test]
    async fn stops_after_max_iterations() {
        let events = ToolEvents::default();
        let llm = Arc::new(ScriptedLlm::repeating(tool_response(
            vec![call("call_1", "think", "{}")],
            1,
            1,
            0,
        )));
        let agent = ChatAgent::new(llm.clone(), "gpt-5-mini", 3);

        let err = run_with_tools(
            &agent,
            vec![MockTool::boxed("thinking", &["think"], &events)],
            "loop forever",
            vec![],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RunError::MaxIterations(3)));
        assert_eq!(llm.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn model_failure_is_reported() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let agent = ChatAgent::new(llm, "gpt-5-mini", 3);
        let err = run_with_tools(&agent, vec![], "task", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Model(_)));
    }
}
