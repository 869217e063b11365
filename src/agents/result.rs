//! Caller-facing shape of a completed run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One tool call made during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub tool_name: String,
    pub tool_args: serde_json::Value,
    pub result: String,
    /// The tool reported failure and the model saw the error text
    pub tool_call_error: bool,
    /// Wall-clock seconds spent in the call
    pub duration: f64,
}

/// Whatever a conversation model reports about a run. Any field may be
/// missing.
#[derive(Debug, Clone, Default)]
pub struct RawRunOutput {
    pub content: Option<String>,
    pub model: Option<String>,
    pub run_id: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
    pub elapsed: Option<Duration>,
    pub formatted_tool_calls: Option<Vec<String>>,
    pub tools: Option<Vec<ToolExecution>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    /// Elapsed seconds
    pub time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub content: String,
    pub model: String,
    pub run_id: String,
    pub formatted_tool_calls: Vec<String>,
    pub tools: Vec<ToolExecution>,
}

/// Result of a completed run. Every field is always present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRunResult {
    pub metrics: RunMetrics,
    pub response: RunResponse,
}

impl From<RawRunOutput> for NormalizedRunResult {
    fn from(raw: RawRunOutput) -> Self {
        Self {
            metrics: RunMetrics {
                input_tokens: raw.input_tokens.unwrap_or(0),
                output_tokens: raw.output_tokens.unwrap_or(0),
                reasoning_tokens: raw.reasoning_tokens.unwrap_or(0),
                time: raw.elapsed.map(|d| d.as_secs_f64()).unwrap_or(0.0),
            },
            response: RunResponse {
                content: raw.content.unwrap_or_default(),
                model: raw.model.unwrap_or_default(),
                run_id: raw.run_id.unwrap_or_default(),
                formatted_tool_calls: raw.formatted_tool_calls.unwrap_or_default(),
                tools: raw.tools.unwrap_or_default(),
            },
        }
    }
}

/// Render a tool call as `name(key=value, ...)`.
///
/// Keys are sorted. String arguments are shown bare, other JSON values compact.
pub fn format_tool_call(name: &str, arguments: &serde_json::Value) -> String {
    let rendered = match arguments {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<String> = map
                .iter()
                .map(|(key, value)| match value {
                    serde_json::Value::String(s) => format!("{}={}", key, s),
                    other => format!("{}={}", key, other),
                })
                .collect();
            pairs.sort();
            pairs.join(", ")
        }
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    format!("{}({})", name, rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_fields_default_to_zero_and_empty() {
        let result = NormalizedRunResult::from(RawRunOutput {
            content: Some("Done".into()),
            input_tokens: Some(12),
            ..Default::default()
        });

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            json!({
                "metrics": {
                    "input_tokens": 12,
                    "output_tokens": 0,
                    "reasoning_tokens": 0,
                    "time": 0.0
                },
                "response": {
                    "content": "Done",
                    "model": "",
                    "run_id": "",
                    "formatted_tool_calls": [],
                    "tools": []
                }
            })
        );
    }

    #[test]
    fn elapsed_is_reported_in_seconds() {
        let result = NormalizedRunResult::from(RawRunOutput {
            elapsed: Some(Duration::from_millis(2500)),
            ..Default::default()
        });
        assert_eq!(result.metrics.time, 2.5);
    }

    #[test]
    fn tool_calls_are_formatted_with_arguments() {
        assert_eq!(
            format_tool_call(
                "browser_navigate",
                &json!({ "url": "https://example.com" })
            ),
            "browser_navigate(url=https://example.com)"
        );
        assert_eq!(
            format_tool_call("sequentialthinking", &json!({ "thought": "plan", "step": 2 })),
            "sequentialthinking(step=2, thought=plan)"
        );
        assert_eq!(format_tool_call("browser_snapshot", &json!(null)), "browser_snapshot()");
    }
}
