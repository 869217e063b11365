//! Configuration management for browser-pilot.
//!
//! Configuration is read from environment variables (a `.env` file in the
//! working directory is loaded first, if present):
//! - `OPENAI_API_KEY` - Required. API key for the chat-completions endpoint.
//! - `OPENAI_BASE_URL` - Optional. Defaults to `https://api.openai.com/v1`.
//! - `AGENT_MODEL` - Optional. Model identifier. Defaults to `gpt-5-mini`.
//! - `LLM_REQUEST_TIMEOUT_SECS` - Optional. Bound on one completion request. Defaults to `300`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `MAX_ITERATIONS` - Optional. Maximum model/tool round trips per task. Defaults to `50`.
//! - `HISTORY_LIMIT` - Optional. Previous session messages sent to the model. Defaults to `6`.
//! - `VIDEOS_DIR` - Optional. Root of the per-session recording directories. Defaults to `videos`.
//! - `SESSION_DB_PATH` - Optional. SQLite file for session history. Defaults to `tmp/data.db`;
//!   an empty value keeps history in memory.
//! - `THINKING_TOOL_COMMAND` / `THINKING_TOOL_TIMEOUT_SECS` - Sequential-thinking tool process.
//! - `BROWSER_TOOL_COMMAND` / `BROWSER_TOOL_TIMEOUT_SECS` - Browser tool process. The command may
//!   contain `{video_dir}`, replaced with the session's recording directory.
//! - `TOOL_CONNECT_TIMEOUT_SECS` - Optional. Handshake timeout per tool. Defaults to `60`.
//! - `TOOL_SHUTDOWN_TIMEOUT_SECS` - Optional. Grace period before force-killing a tool. Defaults to `5`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Placeholder in the browser tool command that receives the recording directory.
pub const VIDEO_DIR_PLACEHOLDER: &str = "{video_dir}";

const DEFAULT_THINKING_COMMAND: &str = "npx -y @modelcontextprotocol/server-sequential-thinking";
const DEFAULT_BROWSER_COMMAND: &str = "npx -y @playwright/mcp@latest --no-sandbox --save-trace \
     --save-video=1920x1080 --output-dir={video_dir} --viewport-size=1920,1080 --headless --isolated";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Launch settings for one external tool process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Display name used in logs and errors
    pub name: String,
    /// Program followed by its arguments
    pub argv: Vec<String>,
    /// Upper bound for a single tool invocation
    pub invoke_timeout: Duration,
}

impl ToolCommand {
    /// Parse a shell-style command line into a tool command.
    pub fn parse(
        name: &str,
        command_line: &str,
        invoke_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let argv = shlex::split(command_line)
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| {
                ConfigError::InvalidValue(name.to_string(), command_line.to_string())
            })?;
        Ok(Self {
            name: name.to_string(),
            argv,
            invoke_timeout,
        })
    }

    /// Substitute `{video_dir}` in every argument.
    pub fn with_video_dir(&self, video_dir: &std::path::Path) -> Self {
        let dir = video_dir.to_string_lossy();
        Self {
            name: self.name.clone(),
            argv: self
                .argv
                .iter()
                .map(|arg| arg.replace(VIDEO_DIR_PLACEHOLDER, &dir))
                .collect(),
            invoke_timeout: self.invoke_timeout,
        }
    }
}

/// Tool process configuration shared by every request.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Structured-reasoning helper (connected first)
    pub thinking: ToolCommand,
    /// Browser-automation driver (connected second)
    pub browser: ToolCommand,
    /// Handshake timeout for each tool
    pub connect_timeout: Duration,
    /// How long a tool may take to exit after being asked to stop
    pub shutdown_timeout: Duration,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the chat-completions endpoint
    pub api_key: String,

    /// Base URL of the OpenAI-compatible API
    pub api_base_url: String,

    /// Model identifier used for every run
    pub model: String,

    /// Bound on a single chat-completion request
    pub llm_request_timeout: Duration,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum model/tool round trips for one task
    pub max_iterations: usize,

    /// Number of previous session messages replayed to the model
    pub history_limit: usize,

    /// Root directory for session recordings
    pub videos_dir: PathBuf,

    /// SQLite database for session history (`None` = in-memory)
    pub session_db_path: Option<PathBuf>,

    /// External tool processes
    pub tools: ToolsConfig,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &str, default: u64) -> Result<Duration, ConfigError> {
    env_parse(name, default).map(Duration::from_secs)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENAI_API_KEY` is not set, and
    /// `ConfigError::InvalidValue` for unparsable numbers or tool commands.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        let session_db_path = match std::env::var("SESSION_DB_PATH") {
            Ok(path) if path.trim().is_empty() => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => Some(PathBuf::from("tmp/data.db")),
        };

        let tools = ToolsConfig {
            thinking: ToolCommand::parse(
                "sequential-thinking",
                &env_or("THINKING_TOOL_COMMAND", DEFAULT_THINKING_COMMAND),
                env_secs("THINKING_TOOL_TIMEOUT_SECS", 120)?,
            )?,
            browser: ToolCommand::parse(
                "browser",
                &env_or("BROWSER_TOOL_COMMAND", DEFAULT_BROWSER_COMMAND),
                env_secs("BROWSER_TOOL_TIMEOUT_SECS", 600)?,
            )?,
            connect_timeout: env_secs("TOOL_CONNECT_TIMEOUT_SECS", 60)?,
            shutdown_timeout: env_secs("TOOL_SHUTDOWN_TIMEOUT_SECS", 5)?,
        };

        Ok(Self {
            api_key,
            api_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            model: env_or("AGENT_MODEL", "gpt-5-mini"),
            llm_request_timeout: env_secs("LLM_REQUEST_TIMEOUT_SECS", 300)?,
            host: env_or("HOST", "127.0.0.1"),
            port: env_parse("PORT", 8000)?,
            max_iterations: env_parse("MAX_ITERATIONS", 50)?,
            history_limit: env_parse("HISTORY_LIMIT", 6)?,
            videos_dir: PathBuf::from(env_or("VIDEOS_DIR", "videos")),
            session_db_path,
            tools,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, model: String, videos_dir: PathBuf) -> Self {
        Self {
            api_key,
            api_base_url: "https://api.openai.com/v1".to_string(),
            model,
            llm_request_timeout: Duration::from_secs(300),
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_iterations: 50,
            history_limit: 6,
            videos_dir,
            session_db_path: None,
            tools: ToolsConfig {
                thinking: ToolCommand {
                    name: "sequential-thinking".to_string(),
                    argv: vec![
                        "npx".into(),
                        "-y".into(),
                        "@modelcontextprotocol/server-sequential-thinking".into(),
                    ],
                    invoke_timeout: Duration::from_secs(120),
                },
                browser: ToolCommand {
                    name: "browser".to_string(),
                    argv: vec!["npx".into(), "-y".into(), "@playwright/mcp@latest".into()],
                    invoke_timeout: Duration::from_secs(600),
                },
                connect_timeout: Duration::from_secs(60),
                shutdown_timeout: Duration::from_secs(5),
            },
        }
    }
}
