use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use noesis_core::event::FileDescriptor;
use noesis_core::sandbox::SandboxPolicy;
use noesis_core::tool::{Tool, ToolContext, ToolResult};

const MAX_FILE_BYTES: usize = 128 * 1024;
const MAX_LIST_ENTRIES: usize = 500;

/// Resolve `path` against the workspace, rejecting traversal and sensitive names up
/// front, then enforcing the sandbox's read/write allow-lists. Adapted from the
/// teacher's `read.rs`/`write.rs` path-safety checks, consolidated into one helper
/// shared by every action.
fn resolve(ctx: &ToolContext, path: &str, for_write: bool) -> Result<PathBuf, String> {
    if SandboxPolicy::has_traversal(path) {
        return Err(format!("path traversal denied: {path}"));
    }
    if ctx.sandbox.is_sensitive_name(path) {
        return Err(format!("access to sensitive path denied: {path}"));
    }

    let target = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        PathBuf::from(&ctx.workspace_dir).join(path)
    };

    let allowed = if for_write {
        ctx.sandbox.can_write(&target.to_string_lossy())
    } else {
        ctx.sandbox.can_read(&target.to_string_lossy())
    };
    if !allowed {
        return Err(format!("path outside sandbox allow-list: {path}"));
    }

    Ok(target)
}

/// File actions {read, write, append, list, delete, exists, stat, send} (§4.1).
/// `send` is a pure descriptor — it hands the file off as a `FileDescriptor` for a
/// downstream chat surface to deliver; this crate has no opinion on how that happens
/// (Open Question (b)).
pub struct FileTool;

#[async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        "file"
    }

    fn description(&self) -> &str {
        "Read, write, append, list, delete, check existence/stat, or send a file. Paths resolve inside the workspace allow-list; traversal and sensitive names are always rejected."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["read", "write", "append", "list", "delete", "exists", "stat", "send"],
                    "description": "The file operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "Path, relative to the workspace unless absolute"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write/append (required for write/append)"
                }
            },
            "required": ["action", "path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("file: missing 'action' argument"))?;
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("file: missing 'path' argument"))?;

        let for_write = matches!(action, "write" | "append" | "delete");
        let target = match resolve(ctx, path, for_write) {
            Ok(p) => p,
            Err(msg) => return Ok(ToolResult::error(msg)),
        };

        match action {
            "read" => read_action(&target, path).await,
            "write" | "append" => {
                let content = args
                    .get("content")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("file: missing 'content' for {action}"))?;
                write_action(&target, path, content, action == "append").await
            }
            "list" => list_action(&target, path).await,
            "delete" => delete_action(&target, path).await,
            "exists" => Ok(ToolResult::success(format!("{}", target.exists()))),
            "stat" => stat_action(&target, path).await,
            "send" => send_action(&target, path),
            _ => Ok(ToolResult::error(format!(
                "unknown action '{action}'. use read/write/append/list/delete/exists/stat/send."
            ))),
        }
    }
}

async fn read_action(target: &Path, path: &str) -> Result<ToolResult> {
    let content = match tokio::fs::read_to_string(target).await {
        Ok(c) => c,
        Err(e) => return Ok(ToolResult::error(format!("failed to read {path}: {e}"))),
    };
    if content.len() > MAX_FILE_BYTES {
        return Ok(ToolResult::error(format!(
            "file too large ({} bytes, max {MAX_FILE_BYTES})",
            content.len()
        )));
    }
    Ok(ToolResult::success(content))
}

async fn write_action(target: &Path, path: &str, content: &str, append: bool) -> Result<ToolResult> {
    if let Some(parent) = target.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return Ok(ToolResult::error(format!("failed to create directories: {e}")));
        }
    }

    let result = if append {
        use tokio::io::AsyncWriteExt;
        match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(target)
            .await
        {
            Ok(mut f) => f.write_all(content.as_bytes()).await,
            Err(e) => Err(e),
        }
    } else {
        tokio::fs::write(target, content).await
    };

    match result {
        Ok(()) => {
            let verb = if append { "appended to" } else { "wrote" };
            Ok(ToolResult::success(format!(
                "{verb} {path} ({} bytes)",
                content.len()
            )))
        }
        Err(e) => Ok(ToolResult::error(format!("failed to write {path}: {e}"))),
    }
}

async fn list_action(target: &Path, path: &str) -> Result<ToolResult> {
    if !target.exists() {
        return Ok(ToolResult::error(format!("directory not found: {path}")));
    }
    if !target.is_dir() {
        return Ok(ToolResult::error(format!("not a directory: {path}")));
    }

    let mut entries: Vec<_> = match std::fs::read_dir(target) {
        Ok(rd) => rd.filter_map(|e| e.ok()).collect(),
        Err(e) => return Ok(ToolResult::error(format!("failed to list {path}: {e}"))),
    };
    entries.sort_by_key(|e| e.file_name());

    let truncated = entries.len() > MAX_LIST_ENTRIES;
    entries.truncate(MAX_LIST_ENTRIES);

    let mut lines: Vec<String> = entries
        .iter()
        .map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            if e.path().is_dir() {
                format!("[DIR]  {name}/")
            } else {
                let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                format!("[FILE] {name} ({size} bytes)")
            }
        })
        .collect();

    if lines.is_empty() {
        return Ok(ToolResult::success("(empty directory)"));
    }
    if truncated {
        lines.push(format!("... (truncated at {MAX_LIST_ENTRIES} entries)"));
    }
    Ok(ToolResult::success(lines.join("\n")))
}

async fn delete_action(target: &Path, path: &str) -> Result<ToolResult> {
    if !target.exists() {
        return Ok(ToolResult::success(format!("nothing to delete at {path}")));
    }
    let result = if target.is_dir() {
        tokio::fs::remove_dir_all(target).await
    } else {
        tokio::fs::remove_file(target).await
    };
    match result {
        Ok(()) => Ok(ToolResult::success(format!("deleted {path}"))),
        Err(e) => Ok(ToolResult::error(format!("failed to delete {path}: {e}"))),
    }
}

async fn stat_action(target: &Path, path: &str) -> Result<ToolResult> {
    match tokio::fs::metadata(target).await {
        Ok(meta) => Ok(ToolResult::success(format!(
            "{{\"path\":\"{path}\",\"size\":{},\"is_dir\":{}}}",
            meta.len(),
            meta.is_dir()
        ))),
        Err(e) => Ok(ToolResult::error(format!("failed to stat {path}: {e}"))),
    }
}

fn send_action(target: &Path, path: &str) -> Result<ToolResult> {
    if !target.exists() {
        return Ok(ToolResult::error(format!("file not found: {path}")));
    }
    let mime = mime_guess(path);
    let descriptor = FileDescriptor {
        path: target.to_string_lossy().to_string(),
        mime: mime.clone(),
    };
    Ok(ToolResult::success(format!(
        "prepared {path} for delivery ({mime})"
    ))
    .with_file(descriptor))
}

fn mime_guess(path: &str) -> String {
    match path.rsplit('.').next().unwrap_or("") {
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
    .to_string()
}
