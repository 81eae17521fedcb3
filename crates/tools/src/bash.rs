//! Bash tool: execute shell commands in the working directory.
//!
//! Commands on the banned list are refused with `PermissionDenied`, which
//! stops the agent's turn. Output is truncated and each run has a timeout.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::paths::truncate_chars;

pub const BASH_TOOL_NAME: &str = "bash";

const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1000;
const MAX_OUTPUT_LENGTH: usize = 30_000;
const NO_OUTPUT: &str = "no output";

/// Command prefixes refused for security reasons.
pub const BANNED_COMMANDS: &[&str] = &[
    "curl", "wget", "nc", "netcat", "telnet", "ssh", "scp", "sftp", "ftp", "rsync", "nmap",
    "sudo", "su", "doas",
    "chmod", "chown", "chgrp",
    "rm -rf /", "rm -rf /*", "dd if=/dev/zero", "dd if=/dev/random",
    "shutdown", "reboot", "halt", "poweroff", "init",
    "kill -9 -1", "pkill -9", "killall -9",
    "mkfs", "fdisk", "parted", "format",
    "apt install", "apt-get install", "yum install", "brew install", "pip install --system",
    "npm install -g", "gem install",
];

const DESCRIPTION: &str = "Execute bash commands in a shell environment.

WHEN TO USE THIS TOOL:
- Use when you need to run shell commands or scripts
- Helpful for running build commands, tests, or other CLI tools

HOW TO USE:
- Provide the command you want to execute
- Optionally specify a timeout in milliseconds (max 600000)

LIMITATIONS:
- Some commands are blocked for security (like curl, wget, sudo)
- Cannot run interactive commands
- Output is truncated if it exceeds 30000 characters";

#[derive(Debug, Deserialize)]
struct BashParams {
    #[serde(default)]
    command: String,
    /// Milliseconds
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
struct BashMetadata {
    start_time: i64,
    end_time: i64,
    working_directory: String,
}

/// Execute shell commands with safety constraints.
pub struct BashTool {
    working_dir: PathBuf,
    /// Extra banned prefixes from configuration.
    blocked_commands: Vec<String>,
    default_timeout: Duration,
}

impl BashTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            blocked_commands: Vec::new(),
            default_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_blocked_commands(mut self, blocked: Vec<String>) -> Self {
        self.blocked_commands = blocked;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The banned prefix a command starts with, checked per pipeline segment.
    fn banned_prefix(&self, command: &str) -> Option<String> {
        let lowered = command.to_lowercase();
        let segments = lowered
            .split(['\n', ';', '|', '&', '(', ')', '`'])
            .map(str::trim)
            .filter(|s| !s.is_empty());

        for segment in segments {
            let candidates = BANNED_COMMANDS
                .iter()
                .map(|b| b.to_string())
                .chain(self.blocked_commands.iter().map(|b| b.to_lowercase()));
            for banned in candidates {
                let hit = segment == banned
                    || segment
                        .strip_prefix(banned.as_str())
                        .is_some_and(|rest| rest.starts_with(char::is_whitespace));
                if hit {
                    return Some(banned);
                }
            }
        }
        None
    }

    fn timeout_for(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms.min(MAX_TIMEOUT_MS)),
            _ => self.default_timeout,
        }
    }

    fn metadata(&self, start_time: i64) -> BashMetadata {
        BashMetadata {
            start_time,
            end_time: Utc::now().timestamp_millis(),
            working_directory: self.working_dir.display().to_string(),
        }
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut output = String::from_utf8_lossy(stdout).to_string();
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&String::from_utf8_lossy(stderr));
    }

    if let Some(head) = truncate_chars(&output, MAX_OUTPUT_LENGTH) {
        output = format!("{head}\n... (output truncated)");
    }
    if output.is_empty() {
        output = NO_OUTPUT.to_string();
    }
    output
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        BASH_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: BASH_TOOL_NAME.into(),
            description: DESCRIPTION.into(),
            parameters: serde_json::json!({
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in milliseconds (max 600000)"
                }
            }),
            required: vec!["command".into()],
        }
    }

    async fn run(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: BashParams = call.parse_input()?;
        if params.command.trim().is_empty() {
            return Ok(ToolResponse::error("command is required"));
        }

        if let Some(banned) = self.banned_prefix(&params.command) {
            warn!(command = %params.command, banned = %banned, "Refusing banned command");
            return Err(ToolError::PermissionDenied {
                tool_name: BASH_TOOL_NAME.into(),
                reason: format!("command '{banned}' is not allowed for security reasons"),
            });
        }

        let timeout = self.timeout_for(params.timeout);
        debug!(command = %params.command, timeout_ms = timeout.as_millis() as u64, "Executing shell command");

        let start_time = Utc::now().timestamp_millis();
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&params.command)
            .current_dir(&self.working_dir)
            .kill_on_drop(true);

        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            outcome = tokio::time::timeout(timeout, command.output()) => outcome,
        };

        let output = match outcome {
            Err(_) => {
                return Ok(ToolResponse::error(format!(
                    "Command timed out after {} ms",
                    timeout.as_millis()
                ))
                .with_metadata(&self.metadata(start_time)));
            }
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: BASH_TOOL_NAME.into(),
                    reason: format!("failed to execute command: {e}"),
                });
            }
            Ok(Ok(output)) => output,
        };

        let text = combine_output(&output.stdout, &output.stderr);
        let metadata = self.metadata(start_time);

        if output.status.success() {
            Ok(ToolResponse::text(text).with_metadata(&metadata))
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %params.command, exit_code = code, "Command failed");
            Ok(ToolResponse::error(format!("{text}\n\nExit code: {code}")).with_metadata(&metadata))
        }
    }
}
