use serde::{Deserialize, Serialize};

/// Conversation roles used on the LLM client contract's message list (§6.1) and on the
/// Conversation row (§3, `role ∈ {user, model}`). `System` and `Tool` round out the
/// roles a chat-completions-shaped wire format actually needs; only `User`/`Assistant`
/// rows are ever persisted to the Conversation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_conversation_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant | Role::System | Role::Tool => "model",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("role", &self.role)?;

        if !self.image_urls.is_empty() {
            let mut parts: Vec<serde_json::Value> = Vec::new();
            if let Some(ref text) = self.content {
                parts.push(serde_json::json!({"type": "text", "text": text}));
            }
            for url in &self.image_urls {
                parts.push(serde_json::json!({"type": "image_url", "image_url": {"url": url}}));
            }
            map.serialize_entry("content", &parts)?;
        } else if let Some(ref content) = self.content {
            map.serialize_entry("content", content)?;
        }

        if let Some(ref rc) = self.reasoning_content {
            map.serialize_entry("reasoning_content", rc)?;
        }
        if let Some(ref id) = self.tool_call_id {
            map.serialize_entry("tool_call_id", id)?;
        }
        if let Some(ref calls) = self.tool_calls {
            map.serialize_entry("tool_calls", calls)?;
        }

        map.end()
    }
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: Some(content.to_string()),
            reasoning_content: None,
            tool_call_id: None,
            tool_calls: None,
            image_urls: Vec::new(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: Some(content.to_string()),
            reasoning_content: None,
            tool_call_id: None,
            tool_calls: None,
            image_urls: Vec::new(),
        }
    }

    pub fn user_with_images(content: &str, image_urls: Vec<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.to_string()),
            reasoning_content: None,
            tool_call_id: None,
            tool_calls: None,
            image_urls,
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.to_string()),
            reasoning_content: None,
            tool_call_id: None,
            tool_calls: None,
            image_urls: Vec::new(),
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>, reasoning: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            reasoning_content: reasoning,
            tool_call_id: None,
            tool_calls: Some(calls),
            image_urls: Vec::new(),
        }
    }

    pub fn tool_result(call_id: &str, content: &str) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.to_string()),
            reasoning_content: None,
            tool_call_id: Some(call_id.to_string()),
            tool_calls: None,
            image_urls: Vec::new(),
        }
    }

    /// A cheap heuristic token estimate (len/4, minimum 1, +4 for role overhead) used by
    /// the history loader to keep conversation history under a token budget.
    pub fn estimate_tokens(&self) -> usize {
        let content_len = self.content.as_deref().unwrap_or("").len();
        (content_len / 4).max(1) + 4
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization_without_images() {
        let msg = Message::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
        assert!(json.get("image_urls").is_none());
    }

    #[test]
    fn test_message_serialization_with_images() {
        let msg = Message::user_with_images("look", vec!["data:image/jpeg;base64,abc".into()]);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json["content"].is_array());
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
    }

    #[test]
    fn test_tool_result_serialization() {
        let msg = Message::tool_result("call_1", "42");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["content"], "42");
    }

    #[test]
    fn test_estimate_tokens_minimum_one() {
        let msg = Message::user("");
        assert_eq!(msg.estimate_tokens(), 1 + 4);
    }
}
