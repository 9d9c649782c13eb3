use serde::Serialize;
use serde_json::Value;

/// One event of an agent run's stream (§4.6). The teacher's own `streaming.rs` refers
/// to a `StreamEvent` type it never actually defines (confirmed absent anywhere in its
/// source); this is the well-formed replacement built directly off the contract §4.6
/// and §6.2 specify.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Thinking { text: String },
    Text { text: String },
    ToolCall { name: String, args: Value },
    ToolResult { name: String, result: ToolResultPayload },
    StuckWarning { message: String },
    Error { message: String },
    Done { summary: String },
    /// Not part of the §4.6 event set proper, but emitted on the same stream per
    /// §6.2's "plus periodic heartbeat messages".
    Heartbeat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageDescriptor {
    pub mime: String,
    pub data: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDescriptor {
    pub path: String,
    pub mime: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResultPayload {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let e = Event::Done {
            summary: "ok".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["summary"], "ok");
    }

    #[test]
    fn test_tool_call_event_shape() {
        let e = Event::ToolCall {
            name: "shell".into(),
            args: serde_json::json!({"command": "ls"}),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["name"], "shell");
    }
}
