use anyhow::Result;
use rusqlite::params;

use crate::store::{now_ms, Store};

#[derive(Debug, Clone)]
pub struct ToolCallRow {
    pub id: i64,
    pub task_id: i64,
    pub tool_name: String,
    pub input_json: String,
    pub output_truncated: String,
    pub success: bool,
    pub execution_time_ms: i64,
    pub created_at: i64,
}

/// Replace base64 image payloads embedded in a JSON value with a short placeholder
/// before it is persisted, per §4.6's "base64 image payloads replaced by a
/// placeholder" and the ToolCall log's append-only contract (§3).
pub fn scrub_image_payloads(input_json: &serde_json::Value) -> serde_json::Value {
    match input_json {
        serde_json::Value::String(s) if s.starts_with("data:image/") => {
            serde_json::Value::String("[image omitted]".to_string())
        }
        serde_json::Value::Object(map) => {
            let scrubbed = map
                .iter()
                .map(|(k, v)| (k.clone(), scrub_image_payloads(v)))
                .collect();
            serde_json::Value::Object(scrubbed)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(scrub_image_payloads).collect())
        }
        other => other.clone(),
    }
}

impl Store {
    /// Append a ToolCall row. Every ToolCall row has a parent Task row by
    /// construction (the foreign key + this being the only write path), satisfying
    /// the §8 universal invariant.
    pub fn tool_call_log(
        &self,
        task_id: i64,
        tool_name: &str,
        input_json: &serde_json::Value,
        output_truncated: &str,
        success: bool,
        execution_time_ms: i64,
    ) -> Result<i64> {
        let scrubbed = scrub_image_payloads(input_json);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tool_call (task_id, tool_name, input_json, output_truncated, success, execution_time_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task_id,
                tool_name,
                scrubbed.to_string(),
                output_truncated,
                success,
                execution_time_ms,
                now_ms()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn tool_call_for_task(&self, task_id: i64) -> Result<Vec<ToolCallRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, tool_name, input_json, output_truncated, success, execution_time_ms, created_at
             FROM tool_call WHERE task_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok(ToolCallRow {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    tool_name: row.get(2)?,
                    input_json: row.get(3)?,
                    output_truncated: row.get(4)?,
                    success: row.get(5)?,
                    execution_time_ms: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_and_fetch() {
        let store = Store::open_memory().unwrap();
        let task_id = store.task_create("sess-1", "x").unwrap();
        store
            .tool_call_log(task_id, "shell", &serde_json::json!({"command": "ls"}), "file1\nfile2", true, 42)
            .unwrap();
        let calls = store.tool_call_for_task(task_id).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "shell");
        assert!(calls[0].success);
    }

    #[test]
    fn test_scrub_image_payloads() {
        let input = serde_json::json!({
            "screenshot": "data:image/png;base64,AAAA",
            "path": "/tmp/x.png"
        });
        let scrubbed = scrub_image_payloads(&input);
        assert_eq!(scrubbed["screenshot"], "[image omitted]");
        assert_eq!(scrubbed["path"], "/tmp/x.png");
    }
}
