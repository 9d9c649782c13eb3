use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use noesis_core::tool::{Tool, ToolContext, ToolResult};

const MIN_SECS: u64 = 1;
const MAX_SECS: u64 = 60;

/// Sleeps `s ∈ [1,60]` seconds (§4.1). Useful for giving an external process time to
/// finish before the next tool call.
pub struct WaitTool;

#[async_trait]
impl Tool for WaitTool {
    fn name(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Pause for a number of seconds (1-60) before continuing."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "seconds": {
                    "type": "integer",
                    "description": "How long to wait, in seconds (1-60)"
                }
            },
            "required": ["seconds"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let requested = args
            .get("seconds")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow::anyhow!("wait: missing 'seconds' argument"))?;

        let seconds = requested.clamp(MIN_SECS, MAX_SECS);
        tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;

        Ok(ToolResult::success(format!("waited {seconds}s")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_clamps_to_range() {
        let tool = WaitTool;
        let ctx = ToolContext::default();
        let result = tool
            .execute(serde_json::json!({"seconds": 0}), &ctx)
            .await
            .unwrap();
        assert!(result.output.contains("waited 1s"));
    }

    #[tokio::test]
    async fn test_wait_missing_seconds_errors() {
        let tool = WaitTool;
        let ctx = ToolContext::default();
        let result = tool.execute(serde_json::json!({}), &ctx).await;
        assert!(result.is_err());
    }
}
