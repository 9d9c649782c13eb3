use async_trait::async_trait;
use serde::Serialize;

use crate::message::{Message, ToolCall};
use crate::NoesisError;

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One LLM request, per the client contract (§6.1). `thinking_budget` and
/// `max_tokens` are advisory — a provider that doesn't support them ignores them.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub thinking_budget: Option<u32>,
}

#[derive(Debug)]
pub enum Completion {
    Text {
        content: String,
        reasoning: Option<String>,
    },
    ToolCalls {
        calls: Vec<ToolCall>,
        reasoning: Option<String>,
    },
}

#[derive(Debug, Default, Clone)]
pub struct UsageStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One incremental event from a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ThinkingDelta(String),
    ContentDelta(String),
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: Option<String>,
    },
    Done,
}

/// The LLM HTTP client contract (§6.1). The concrete transport (reqwest, a vendor
/// SDK, …) is an external collaborator (§1); this trait is the only thing C6/C7/C8
/// depend on.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<(Completion, UsageStats), NoesisError>;

    /// Streaming completion; default implementation falls back to `complete` and
    /// replays it as a single content delta, matching non-streaming-capable providers.
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        event_tx: tokio::sync::mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<(Completion, UsageStats), NoesisError> {
        let result = self.complete(request).await?;
        if let Completion::Text { ref content, .. } = result.0 {
            let _ = event_tx.send(StreamEvent::ContentDelta(content.clone()));
        }
        let _ = event_tx.send(StreamEvent::Done);
        Ok(result)
    }
}
