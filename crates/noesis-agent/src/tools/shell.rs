use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use noesis_core::tool::{Tool, ToolContext, ToolResult};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variable name fragments never forwarded to the child process, and
/// scrubbed from captured output (§4.1 "sensitive environment variables redacted").
const SENSITIVE_ENV_FRAGMENTS: &[&str] = &[
    "KEY", "TOKEN", "SECRET", "PASSWORD", "CREDENTIAL", "_PAT", "AUTH",
];

fn is_sensitive_env_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    SENSITIVE_ENV_FRAGMENTS.iter().any(|f| upper.contains(f))
}

fn redact_env_values(text: &str) -> String {
    let mut out = text.to_string();
    for (name, value) in std::env::vars() {
        if is_sensitive_env_name(&name) && value.len() >= 4 {
            out = out.replace(&value, "***REDACTED***");
        }
    }
    out
}

/// Runs a command in a bash-like interpreter, with a clamped timeout, a working
/// directory restricted to the sandbox, a denylist of dangerous patterns, and
/// sensitive environment variables redacted from the child's environment and
/// from captured output (§4.1). Directly adapted from the teacher's `ExecTool`.
pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. Commands run in the workspace directory with a timeout."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30, max: 300)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("shell: missing 'command' argument"))?;

        if let Some(blocked) = ctx.sandbox.is_command_blocked(command) {
            return Ok(ToolResult::error(format!(
                "command blocked by sandbox policy: contains '{blocked}'"
            )));
        }

        let timeout_secs = args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let timeout_secs = ctx.sandbox.clamp_timeout(timeout_secs);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&ctx.workspace_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (name, _) in std::env::vars() {
            if is_sensitive_env_name(&name) {
                cmd.env_remove(&name);
            }
        }

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            cmd.output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
                stdout = redact_env_values(&stdout);
                stderr = redact_env_values(&stderr);
                let exit_code = output.status.code().unwrap_or(-1);

                if stdout.len() > ctx.sandbox.max_output_bytes {
                    stdout.truncate(ctx.sandbox.max_output_bytes);
                    stdout.push_str("\n... (output truncated)");
                }

                let mut text = stdout;
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str("[stderr] ");
                    text.push_str(&stderr);
                }

                if exit_code == 0 {
                    if text.is_empty() {
                        text = "(no output)".to_string();
                    }
                    Ok(ToolResult::success(text))
                } else {
                    text.push_str(&format!("\nExit code: {exit_code}"));
                    Ok(ToolResult::error(text))
                }
            }
            Ok(Err(e)) => Ok(ToolResult::error(format!("shell failed to start: {e}"))),
            Err(_) => Ok(ToolResult::error(format!(
                "shell timed out after {timeout_secs}s"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> ToolContext {
        ToolContext {
            workspace_dir: "/tmp".to_string(),
            ..ToolContext::default()
        }
    }

    #[tokio::test]
    async fn test_shell_echo_succeeds() {
        let tool = ShellTool;
        let result = tool
            .execute(serde_json::json!({"command": "echo hello"}), &test_ctx())
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.output.contains("hello"));
    }

    #[tokio::test]
    async fn test_shell_nonzero_exit_is_failure_with_code() {
        let tool = ShellTool;
        let result = tool
            .execute(serde_json::json!({"command": "exit 7"}), &test_ctx())
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.output.contains("Exit code: 7"));
    }

    #[tokio::test]
    async fn test_shell_blocked_command() {
        let tool = ShellTool;
        let result = tool
            .execute(serde_json::json!({"command": "rm -rf /"}), &test_ctx())
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.output.contains("blocked"));
    }

    #[tokio::test]
    async fn test_shell_timeout() {
        let tool = ShellTool;
        let result = tool
            .execute(
                serde_json::json!({"command": "sleep 5", "timeout_secs": 1}),
                &test_ctx(),
            )
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.output.contains("timed out"));
    }

    #[test]
    fn test_is_sensitive_env_name() {
        assert!(is_sensitive_env_name("OPENAI_API_KEY"));
        assert!(is_sensitive_env_name("GITHUB_TOKEN"));
        assert!(!is_sensitive_env_name("PATH"));
    }
}
