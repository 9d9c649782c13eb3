use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use noesis_core::tool::{Tool, ToolContext, ToolResult};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn interpreter_for(language: &str) -> Option<(&'static str, &'static str, &'static str)> {
    match language {
        "python" => Some(("python3", ".py", "")),
        "javascript" => Some(("node", ".js", "")),
        "bash" => Some(("bash", ".sh", "")),
        _ => None,
    }
}

/// Executes a snippet in one of {python, javascript, bash} by materializing it to a
/// temp file and spawning the interpreter with a timeout (§4.1). Grounded on the
/// teacher's `ExecTool` for the timeout/output-capture pattern, since the teacher has
/// no equivalent "run this snippet" tool of its own.
pub struct CodeTool;

#[async_trait]
impl Tool for CodeTool {
    fn name(&self) -> &str {
        "code"
    }

    fn description(&self) -> &str {
        "Run a short code snippet in python, javascript, or bash and return combined stdout+stderr."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "language": {
                    "type": "string",
                    "enum": ["python", "javascript", "bash"],
                    "description": "Interpreter to run the snippet with"
                },
                "code": {
                    "type": "string",
                    "description": "The source code to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30, max: 300)"
                }
            },
            "required": ["language", "code"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let language = args
            .get("language")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("code: missing 'language' argument"))?;
        let code = args
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("code: missing 'code' argument"))?;

        let Some((interpreter, ext, _)) = interpreter_for(language) else {
            return Ok(ToolResult::error(format!(
                "unsupported language '{language}'. use python/javascript/bash."
            )));
        };

        let timeout_secs = args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let timeout_secs = ctx.sandbox.clamp_timeout(timeout_secs);

        let file_name = format!("noesis-snippet-{}{ext}", uuid::Uuid::new_v4());
        let path = std::env::temp_dir().join(file_name);
        if let Err(e) = tokio::fs::write(&path, code).await {
            return Ok(ToolResult::error(format!("failed to write snippet: {e}")));
        }

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            Command::new(interpreter)
                .arg(&path)
                .current_dir(&ctx.workspace_dir)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await;

        let _ = tokio::fs::remove_file(&path).await;

        match result {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str("[stderr] ");
                    text.push_str(&stderr);
                }
                if text.len() > ctx.sandbox.max_output_bytes {
                    text.truncate(ctx.sandbox.max_output_bytes);
                    text.push_str("\n... (output truncated)");
                }

                let exit_code = output.status.code().unwrap_or(-1);
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
            Ok(Err(e)) => Ok(ToolResult::error(format!(
                "failed to start {interpreter}: {e}"
            ))),
            Err(_) => Ok(ToolResult::error(format!(
                "code execution timed out after {timeout_secs}s"
            ))),
        }
    }
}
