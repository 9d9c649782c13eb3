use std::sync::Arc;

use noesis_core::event::{Event, ToolResultPayload};
use noesis_core::llm::{Completion, CompletionRequest, LlmProvider};
use noesis_core::message::Message;
use noesis_core::tool::{ToolContext, ToolRegistry};
use noesis_store::conversation::ConversationRole;
use noesis_store::task::TaskStatus;
use noesis_store::Store;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::context_assembler;
use crate::executor::ToolExecutor;
use crate::rate_limiter::RateLimiter;
use crate::stuck_detector::StuckDetector;

const DEFAULT_MAX_ITERATIONS: u64 = 20;
const HISTORY_MESSAGES: usize = 40;
const RESULT_STORAGE_CHARS: usize = 4000;

/// Input to one `run` invocation (§4.6). `images` attach to the user turn via
/// `Message::user_with_images`; `cancel` is polled cooperatively between steps.
pub struct RunRequest {
    pub session_id: String,
    pub user_message: String,
    pub images: Vec<String>,
    pub max_iterations: Option<u64>,
    pub cancel: CancellationToken,
}

/// Everything the agent loop needs to do its work, bundled so `run`'s signature stays
/// stable as dependencies grow. Adapted from the teacher's `AgentTurnConfig`, but the
/// provider/registry/rate-limiter/store are borrowed rather than owned so one process
/// can run many concurrent loops over the same tool registry (§9 "no global
/// singletons").
pub struct AgentLoop {
    store: Arc<Store>,
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    rate_limiter: Arc<RateLimiter>,
    tool_ctx: ToolContext,
}

impl AgentLoop {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        rate_limiter: Arc<RateLimiter>,
        tool_ctx: ToolContext,
    ) -> Self {
        let executor = ToolExecutor::new(registry.clone(), RESULT_STORAGE_CHARS * 4);
        Self {
            store,
            provider,
            registry,
            executor,
            rate_limiter,
            tool_ctx,
        }
    }

    /// Run one agent turn end to end, emitting events on `event_tx` as they occur
    /// (§4.6). Returns once a terminal event (`done`/`error`) has been sent.
    pub async fn run(&self, req: RunRequest, event_tx: UnboundedSender<Event>) {
        let task_id = match self.store.task_create(&req.session_id, &req.user_message) {
            Ok(id) => id,
            Err(e) => {
                let _ = event_tx.send(Event::Error {
                    message: format!("failed to create task: {e}"),
                });
                return;
            }
        };

        if let Err(e) = self.run_inner(&req, task_id, &event_tx).await {
            let _ = self
                .store
                .task_finish(task_id, TaskStatus::Failed, Some(e.to_string().as_str()));
            let _ = event_tx.send(Event::Error {
                message: e.to_string(),
            });
        }
    }

    async fn run_inner(
        &self,
        req: &RunRequest,
        task_id: i64,
        event_tx: &UnboundedSender<Event>,
    ) -> anyhow::Result<()> {
        let system_prompt = context_assembler::assemble(
            &self.store,
            &self.registry,
            &req.session_id,
            &req.user_message,
        )?;

        let history = load_history(&self.store, &req.session_id, HISTORY_MESSAGES)?;
        let mut messages = history;
        if req.images.is_empty() {
            messages.push(Message::user(&req.user_message));
        } else {
            messages.push(Message::user_with_images(
                &req.user_message,
                req.images.clone(),
            ));
        }

        let tool_defs = self.registry.list();
        let max_iterations = req.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        let mut stuck = StuckDetector::new(max_iterations);

        loop {
            if req.cancel.is_cancelled() {
                self.store
                    .task_finish(task_id, TaskStatus::Failed, Some("cancelled"))?;
                let _ = event_tx.send(Event::Done {
                    summary: "stopped: cancelled".to_string(),
                });
                return Ok(());
            }

            self.store.task_increment_iteration(task_id)?;

            self.rate_limiter.acquire(1.0).await;

            let request = CompletionRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                system_prompt: Some(system_prompt.clone()),
                temperature: None,
                max_tokens: None,
                thinking_budget: None,
            };

            let completion = tokio::select! {
                biased;
                _ = req.cancel.cancelled() => {
                    self.store.task_finish(task_id, TaskStatus::Failed, Some("cancelled"))?;
                    let _ = event_tx.send(Event::Done { summary: "stopped: cancelled".to_string() });
                    return Ok(());
                }
                result = self.provider.complete(&request) => result,
            };

            let (completion, _usage) = match completion {
                Ok(pair) => pair,
                Err(e) => return Err(anyhow::anyhow!("{e}")),
            };

            match completion {
                Completion::Text { content, reasoning } => {
                    if let Some(reasoning) = reasoning {
                        let _ = event_tx.send(Event::Thinking { text: reasoning });
                    }
                    let _ = event_tx.send(Event::Text {
                        text: content.clone(),
                    });

                    let stored = content.chars().take(RESULT_STORAGE_CHARS).collect::<String>();
                    self.store
                        .task_finish(task_id, TaskStatus::Completed, Some(stored.as_str()))?;
                    self.store.conversation_append(
                        &req.session_id,
                        ConversationRole::User,
                        &req.user_message,
                    )?;
                    self.store.conversation_append(
                        &req.session_id,
                        ConversationRole::Model,
                        &content,
                    )?;

                    let _ = event_tx.send(Event::Done { summary: content });
                    return Ok(());
                }
                Completion::ToolCalls { calls, reasoning } => {
                    if let Some(ref reasoning) = reasoning {
                        let _ = event_tx.send(Event::Thinking {
                            text: reasoning.clone(),
                        });
                    }

                    messages.push(Message::assistant_tool_calls(calls.clone(), reasoning));

                    for call in &calls {
                        let args: serde_json::Value =
                            serde_json::from_str(&call.function.arguments)
                                .unwrap_or_else(|_| serde_json::json!({}));

                        let _ = event_tx.send(Event::ToolCall {
                            name: call.function.name.clone(),
                            args: args.clone(),
                        });

                        let input_fingerprint = args.to_string();
                        stuck.record(&call.function.name, &input_fingerprint);

                        let start = std::time::Instant::now();
                        let outcome = self
                            .executor
                            .execute(&call.function.name, args.clone(), &self.tool_ctx, || {
                                let _ = event_tx.send(Event::Heartbeat);
                            })
                            .await;
                        let elapsed_ms = start.elapsed().as_millis() as i64;

                        self.store.tool_call_log(
                            task_id,
                            &call.function.name,
                            &args,
                            &outcome.result.output,
                            !outcome.result.is_error,
                            elapsed_ms,
                        )?;

                        let _ = event_tx.send(Event::ToolResult {
                            name: call.function.name.clone(),
                            result: ToolResultPayload {
                                success: !outcome.result.is_error,
                                output: outcome.result.output.clone(),
                                error: if outcome.result.is_error {
                                    Some(outcome.result.output.clone())
                                } else {
                                    None
                                },
                                execution_time_ms: elapsed_ms as u64,
                                images: outcome.result.images.clone(),
                                files: outcome.result.files.clone(),
                            },
                        });

                        messages.push(Message::tool_result(&call.id, &outcome.result.output));
                    }

                    let verdict = stuck.check();
                    if let Some(message) = verdict.message.clone() {
                        let _ = event_tx.send(Event::StuckWarning { message });
                    }
                    if verdict.should_terminate {
                        self.store.task_finish(
                            task_id,
                            TaskStatus::Stuck,
                            verdict.message.as_deref(),
                        )?;
                        let _ = event_tx.send(Event::Error {
                            message: verdict
                                .message
                                .unwrap_or_else(|| "stuck: max iterations reached".to_string()),
                        });
                        return Ok(());
                    }
                    if verdict.is_stuck {
                        messages.push(Message::user(
                            "[SYSTEM] You appear to be repeating yourself. Try a different approach \
                             or conclude with a final answer.",
                        ));
                    }
                }
            }
        }
    }
}

fn load_history(store: &Store, session_id: &str, limit: usize) -> anyhow::Result<Vec<Message>> {
    let rows = store.conversation_history(session_id, limit)?;
    Ok(rows
        .into_iter()
        .map(|row| match row.role {
            ConversationRole::User => Message::user(&row.content),
            ConversationRole::Model => Message::assistant(&row.content),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use noesis_core::llm::UsageStats;
    use noesis_core::sandbox::SandboxPolicy;
    use noesis_core::NoesisError;

    struct StubProvider {
        replies: std::sync::Mutex<Vec<Completion>>,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<(Completion, UsageStats), NoesisError> {
            let mut replies = self.replies.lock().unwrap();
            let completion = if replies.is_empty() {
                Completion::Text {
                    content: "fallback".into(),
                    reasoning: None,
                }
            } else {
                replies.remove(0)
            };
            Ok((completion, UsageStats::default()))
        }
    }

    fn test_ctx() -> ToolContext {
        ToolContext {
            workspace_dir: std::env::temp_dir().to_string_lossy().to_string(),
            agent_name: "test".into(),
            session_key: "sess-1".into(),
            sandbox: SandboxPolicy::default(),
            chat_id: 0,
        }
    }

    #[tokio::test]
    async fn test_text_only_response_completes_immediately() {
        let store = Arc::new(Store::open_memory().unwrap());
        let provider: Arc<dyn LlmProvider> = Arc::new(StubProvider {
            replies: std::sync::Mutex::new(vec![Completion::Text {
                content: "hello there".into(),
                reasoning: None,
            }]),
        });
        let registry = Arc::new(ToolRegistry::new());
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000, 1000.0));
        let agent = AgentLoop::new(store.clone(), provider, registry, limiter, test_ctx());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let req = RunRequest {
            session_id: "sess-1".into(),
            user_message: "hi".into(),
            images: Vec::new(),
            max_iterations: None,
            cancel: CancellationToken::new(),
        };
        agent.run(req, tx).await;

        let mut saw_done = false;
        while let Ok(ev) = rx.try_recv() {
            if let Event::Done { summary } = ev {
                assert_eq!(summary, "hello there");
                saw_done = true;
            }
        }
        assert!(saw_done);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_stops_immediately() {
        let store = Arc::new(Store::open_memory().unwrap());
        let provider: Arc<dyn LlmProvider> = Arc::new(StubProvider {
            replies: std::sync::Mutex::new(Vec::new()),
        });
        let registry = Arc::new(ToolRegistry::new());
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000, 1000.0));
        let agent = AgentLoop::new(store, provider, registry, limiter, test_ctx());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let req = RunRequest {
            session_id: "sess-1".into(),
            user_message: "hi".into(),
            images: Vec::new(),
            max_iterations: None,
            cancel,
        };
        agent.run(req, tx).await;

        let mut saw_stopped = false;
        while let Ok(ev) = rx.try_recv() {
            if let Event::Done { summary } = ev {
                saw_stopped = summary.starts_with("stopped");
            }
        }
        assert!(saw_stopped);
    }

    #[tokio::test]
    async fn test_max_iterations_triggers_stuck_termination() {
        let store = Arc::new(Store::open_memory().unwrap());

        // A provider that always asks for the same tool call never terminates on its
        // own; the stuck detector's max-iterations rule must cut it off.
        struct LoopingProvider;
        #[async_trait]
        impl LlmProvider for LoopingProvider {
            fn name(&self) -> &str {
                "looping"
            }
            async fn complete(
                &self,
                _request: &CompletionRequest,
            ) -> Result<(Completion, UsageStats), NoesisError> {
                Ok((
                    Completion::ToolCalls {
                        calls: vec![noesis_core::message::ToolCall {
                            id: "call-1".into(),
                            call_type: "function".into(),
                            function: noesis_core::message::FunctionCall {
                                name: "wait".into(),
                                arguments: "{\"seconds\": 1}".into(),
                            },
                        }],
                        reasoning: None,
                    },
                    UsageStats::default(),
                ))
            }
        }

        let provider: Arc<dyn LlmProvider> = Arc::new(LoopingProvider);
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(crate::tools::wait::WaitTool));
        let registry = Arc::new(registry);
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000, 1000.0));
        let agent = AgentLoop::new(store, provider, registry, limiter, test_ctx());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let req = RunRequest {
            session_id: "sess-1".into(),
            user_message: "loop forever".into(),
            images: Vec::new(),
            max_iterations: Some(2),
            cancel: CancellationToken::new(),
        };
        agent.run(req, tx).await;

        let mut saw_error = false;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, Event::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
