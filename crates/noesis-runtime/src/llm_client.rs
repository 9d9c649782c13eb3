use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use noesis_core::error::{classify_status, redact};
use noesis_core::llm::{Completion, CompletionRequest, LlmProvider, UsageStats};
use noesis_core::message::{Message, ToolCall};
use noesis_core::llm::ToolDefinition;
use noesis_core::NoesisError;

/// The only concrete implementation of the §6.1 LLM client contract this repository
/// ships — an OpenAI-chat-completions-shaped HTTP call, grounded directly on the
/// teacher's `llm.rs::OpenAiCompatibleProvider`. Everything else about the client
/// (auth scheme, model choice, base URL) is external per §1; this just fills the
/// "thin transport" role the spec explicitly hands to a collaborator.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: 4096,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<(Completion, UsageStats), NoesisError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system_prompt) = request.system_prompt {
            messages.push(Message::system(system_prompt));
        }
        messages.extend(request.messages.iter().cloned());

        let body = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            tools: request.tools.clone(),
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| NoesisError::Retryable {
                message: redact(&e.to_string()),
                retry_after_ms: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(with_message(classify_status(status.as_u16(), None), &redact(&body)));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| NoesisError::Fatal(redact(&e.to_string())))?;

        let usage = chat_response
            .usage
            .map(|u| UsageStats {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| NoesisError::Fatal("LLM returned no choices".to_string()))?;

        if let Some(tool_calls) = choice.message.tool_calls {
            if !tool_calls.is_empty() {
                return Ok((
                    Completion::ToolCalls {
                        calls: tool_calls,
                        reasoning: choice.message.reasoning_content,
                    },
                    usage,
                ));
            }
        }

        Ok((
            Completion::Text {
                content: choice.message.content.unwrap_or_default(),
                reasoning: choice.message.reasoning_content,
            },
            usage,
        ))
    }
}

fn with_message(error: NoesisError, detail: &str) -> NoesisError {
    match error {
        NoesisError::Fatal(msg) => NoesisError::Fatal(format!("{msg}: {detail}")),
        NoesisError::Retryable { message, retry_after_ms } => NoesisError::Retryable {
            message: format!("{message}: {detail}"),
            retry_after_ms,
        },
        other => other,
    }
}
