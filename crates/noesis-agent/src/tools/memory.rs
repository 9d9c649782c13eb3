use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use noesis_core::tool::{Tool, ToolContext, ToolResult};
use noesis_store::Store;

/// Thin wrapper over the state store's memory KV (§4.1). Unlike the teacher's
/// `MemoryTool`, this does not own a JSON file — reads and writes go straight through
/// `noesis_store::memory`, which is the single source of truth C4 and C8 both see.
pub struct MemoryTool {
    store: Arc<Store>,
}

impl MemoryTool {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Persistent memory: store, search, or delete key-value notes that persist across sessions. \
         Use 'set' to remember something, 'search' to recall by relevance, 'delete' to forget."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["set", "search", "delete"],
                    "description": "The memory operation to perform"
                },
                "key": {
                    "type": "string",
                    "description": "The memory key (required for set/delete)"
                },
                "value": {
                    "type": "string",
                    "description": "The value to store (required for set)"
                },
                "query": {
                    "type": "string",
                    "description": "Free-text query (required for search)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("memory: missing 'action' argument"))?;

        match action {
            "set" => {
                let key = args
                    .get("key")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("memory: missing 'key' for set"))?;
                let value = args
                    .get("value")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("memory: missing 'value' for set"))?;

                self.store.memory_set(key, value, "note", 5)?;
                info!(agent = %ctx.agent_name, key, "memory set");
                Ok(ToolResult::success(format!("stored '{key}'")))
            }
            "search" => {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("memory: missing 'query' for search"))?;

                let hits = self.store.memory_search(query, 5)?;
                if hits.is_empty() {
                    Ok(ToolResult::success("no matching memories"))
                } else {
                    let lines: Vec<String> = hits
                        .iter()
                        .map(|h| format!("{}: {}", h.row.key, h.row.value))
                        .collect();
                    Ok(ToolResult::success(lines.join("\n")))
                }
            }
            "delete" => {
                let key = args
                    .get("key")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("memory: missing 'key' for delete"))?;

                let deleted = self.store.memory_delete(key)?;
                if deleted {
                    Ok(ToolResult::success(format!("deleted '{key}'")))
                } else {
                    Ok(ToolResult::success(format!("no memory found for '{key}'")))
                }
            }
            _ => Ok(ToolResult::error(format!(
                "unknown action '{action}'. use set/search/delete."
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> ToolContext {
        ToolContext {
            session_key: "s1".to_string(),
            ..ToolContext::default()
        }
    }

    #[tokio::test]
    async fn test_set_then_search() {
        let store = Arc::new(Store::open_memory().unwrap());
        let tool = MemoryTool::new(store);
        let ctx = test_ctx();

        let result = tool
            .execute(
                serde_json::json!({"action": "set", "key": "favorite-color", "value": "teal"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);

        let result = tool
            .execute(serde_json::json!({"action": "search", "query": "color"}), &ctx)
            .await
            .unwrap();
        assert!(result.output.contains("teal"));
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_not_an_error() {
        let store = Arc::new(Store::open_memory().unwrap());
        let tool = MemoryTool::new(store);
        let ctx = test_ctx();

        let result = tool
            .execute(serde_json::json!({"action": "delete", "key": "nope"}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.output.contains("no memory found"));
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let store = Arc::new(Store::open_memory().unwrap());
        let tool = MemoryTool::new(store);
        let ctx = test_ctx();

        let result = tool
            .execute(serde_json::json!({"action": "list"}), &ctx)
            .await
            .unwrap();
        assert!(result.is_error);
    }
}
