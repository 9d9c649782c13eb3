use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use noesis_agent::context_assembler::AUTONOMOUS_SESSION_ID;
use noesis_agent::{AgentLoop, RunRequest};
use noesis_bus::{EventBus, StreamKind};
use noesis_core::event::Event;
use noesis_core::llm::{Completion, CompletionRequest, LlmProvider};
use noesis_core::message::Message;
use noesis_store::conversation::ConversationRole;
use noesis_store::Store;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::fakery;
use crate::repetition::{self, Tokenizer};
use crate::workspace_scan;

/// §4.8 "investigate while `investigation_count < MAX_INVESTIGATION_CYCLES`, else
/// force execution".
pub const MAX_INVESTIGATION_CYCLES: u32 = 2;

const INTERRUPTED_SLEEP: Duration = Duration::from_secs(5);
const CYCLE_SLEEP: Duration = Duration::from_secs(2);
const ERROR_SLEEP: Duration = Duration::from_secs(10);
const AUTONOMOUS_HISTORY_MESSAGES: usize = 12;
const REPETITION_TASK_WINDOW: usize = 5;
const FAKERY_THOUGHT_WINDOW: usize = 3;
const TASK_AVOID_WINDOW: usize = 20;
const TASK_OVERLAP_WINDOW: usize = 5;
const TASK_OVERLAP_MAX: f64 = 0.4;
const TASK_SYNTHESIS_RETRIES: usize = 3;
const KNOWLEDGE_CAP: usize = 10_000;
const THOUGHT_RETENTION_DAYS: i64 = 7;
const CONVERSATION_TRIM_EVERY: u64 = 5;
const CONVERSATION_TRIM_KEEP: usize = 12;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Investigate,
    Execute,
}

/// Background driver that keeps the autonomous session alive between user turns
/// (§4.8, C8). Structured the same way the teacher's `watchdog.rs::ActivityWatchdog`
/// polls in a `tokio::spawn`ed loop with shared atomic state and a cancellation
/// token, generalized from a pure idle/wall-clock timeout check into a full
/// reflect-then-act cycle.
pub struct ConsciousnessDriver {
    store: Arc<Store>,
    bus: Arc<EventBus>,
    agent_loop: Arc<AgentLoop>,
    /// Per Open Question (a): the one-shot genesis reflection uses the primary LLM;
    /// every subsequent cycle uses the smaller reflection model.
    primary_provider: Arc<dyn LlmProvider>,
    reflection_provider: Arc<dyn LlmProvider>,
    workspace_dir: String,
    /// Set while a user is actively interacting with the autonomous session, so the
    /// driver yields instead of racing it (§4.8 step 1 "interrupted").
    user_active: Arc<AtomicBool>,
    shutdown: CancellationToken,
    tokenize: Tokenizer,
}

impl ConsciousnessDriver {
    pub fn new(
        store: Arc<Store>,
        bus: Arc<EventBus>,
        agent_loop: Arc<AgentLoop>,
        primary_provider: Arc<dyn LlmProvider>,
        reflection_provider: Arc<dyn LlmProvider>,
        workspace_dir: String,
        user_active: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            bus,
            agent_loop,
            primary_provider,
            reflection_provider,
            workspace_dir,
            user_active,
            shutdown,
            tokenize: Box::new(repetition::default_tokenizer),
        }
    }

    /// Use a non-default tokenizer for repetition detection (Open Question (c)).
    pub fn with_tokenizer(mut self, tokenize: Tokenizer) -> Self {
        self.tokenize = tokenize;
        self
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        if let Err(e) = self.maybe_genesis().await {
            tracing::warn!(error = %e, "genesis reflection failed");
        }

        let mut investigation_count: u32 = 0;
        let mut cycle_number: u64 = 0;

        while !self.shutdown.is_cancelled() {
            if self.user_active.load(Ordering::Relaxed) {
                tokio::time::sleep(INTERRUPTED_SLEEP).await;
                continue;
            }

            cycle_number += 1;
            match self.cycle(&mut investigation_count, cycle_number).await {
                Ok(()) => tokio::time::sleep(CYCLE_SLEEP).await,
                Err(e) => {
                    tracing::warn!(error = %e, "consciousness cycle failed");
                    tokio::time::sleep(ERROR_SLEEP).await;
                }
            }
        }
    }

    /// §4.8: "on first start, if the thought table is empty, run one genesis
    /// reflection using the primary LLM and save it before entering the main loop."
    async fn maybe_genesis(&self) -> anyhow::Result<()> {
        if !self.store.thought_is_empty()? {
            return Ok(());
        }
        let prompt = "You have just come into being. Reflect on what you are and what \
                      you intend to do first.";
        let reply = ask(&self.primary_provider, prompt).await?;
        self.save_thought(&reply, "genesis").await?;
        Ok(())
    }

    async fn cycle(&self, investigation_count: &mut u32, cycle_number: u64) -> anyhow::Result<()> {
        self.store.survival_apply_overdue_debt()?;

        let phase = if *investigation_count < MAX_INVESTIGATION_CYCLES {
            Phase::Investigate
        } else {
            Phase::Execute
        };

        let recent_descriptions: Vec<String> = self
            .store
            .task_recent(AUTONOMOUS_SESSION_ID, REPETITION_TASK_WINDOW)?
            .into_iter()
            .map(|t| t.description)
            .collect();
        let recent_thoughts: Vec<String> = self
            .store
            .thought_recent(FAKERY_THOUGHT_WINDOW)?
            .into_iter()
            .map(|t| t.content)
            .collect();

        let repeating = repetition::is_repeating(&recent_descriptions, self.tokenize.as_ref());
        let faking = fakery::is_faking(&recent_thoughts);

        let (phase, prompt) = if repeating || faking {
            self.store.conversation_prune(AUTONOMOUS_SESSION_ID, 0)?;
            (
                Phase::Execute,
                "You have been repeating yourself or fabricating results. Stop, and take one \
                 concrete, verifiable action instead."
                    .to_string(),
            )
        } else {
            let history = self.load_autonomous_history()?;
            (phase, build_reflection_prompt(phase, &history))
        };

        let reflection = ask(&self.reflection_provider, &prompt).await?;
        self.save_thought(&reflection, phase_category(phase)).await?;

        let task_description = if phase == Phase::Execute {
            Some(
                self.synthesize_task(&reflection, &recent_descriptions)
                    .await?,
            )
        } else {
            None
        };

        let before = workspace_scan::snapshot(&self.workspace_dir);
        let (saw_file_event, saw_browser_event, completed) = self
            .run_autonomous_action(task_description.unwrap_or(reflection))
            .await?;
        let after = workspace_scan::snapshot(&self.workspace_dir);
        let created_file = saw_file_event || workspace_scan::has_created_file(&before, &after);

        if (created_file || saw_browser_event) && completed {
            self.store.survival_credit(1.0, "progress")?;
            *investigation_count = 0;
        } else if completed {
            self.store.survival_credit(0.5, "partial_progress")?;
            *investigation_count = 0;
        } else {
            *investigation_count += 1;
        }

        self.store.knowledge_prune(KNOWLEDGE_CAP)?;
        self.store.thought_prune_older_than(THOUGHT_RETENTION_DAYS)?;
        if cycle_number % CONVERSATION_TRIM_EVERY == 0 {
            self.store
                .conversation_prune(AUTONOMOUS_SESSION_ID, CONVERSATION_TRIM_KEEP)?;
        }

        Ok(())
    }

    async fn load_autonomous_history(&self) -> anyhow::Result<Vec<Message>> {
        let rows = self
            .store
            .conversation_history(AUTONOMOUS_SESSION_ID, AUTONOMOUS_HISTORY_MESSAGES)?;
        Ok(rows
            .into_iter()
            .map(|row| match row.role {
                ConversationRole::User => Message::user(&row.content),
                ConversationRole::Model => Message::assistant(&row.content),
            })
            .collect())
    }

    async fn save_thought(&self, content: &str, category: &str) -> anyhow::Result<()> {
        let summary = content.chars().take(200).collect::<String>();
        let id = self.store.thought_create(content, &summary, category)?;
        self.bus.publish(
            StreamKind::Thoughts,
            serde_json::json!({"id": id, "summary": summary, "category": category}),
        );
        Ok(())
    }

    /// §4.8 step 7: synthesize a concrete task that doesn't overlap the last 20 task
    /// descriptions, validating against the top-5 most recent with up to 3 retries.
    async fn synthesize_task(
        &self,
        reflection: &str,
        recent_descriptions: &[String],
    ) -> anyhow::Result<String> {
        let avoid_list: Vec<String> = self
            .store
            .task_recent(AUTONOMOUS_SESSION_ID, TASK_AVOID_WINDOW)?
            .into_iter()
            .map(|t| t.description)
            .collect();
        let top5: Vec<String> = recent_descriptions
            .iter()
            .take(TASK_OVERLAP_WINDOW)
            .cloned()
            .collect();

        let mut candidate = reflection.to_string();
        for attempt in 0..=TASK_SYNTHESIS_RETRIES {
            let prompt = format!(
                "Reflection: {reflection}\n\nPropose one concrete, executable task. Do not repeat \
                 any of these recent tasks:\n{}",
                avoid_list.join("\n- ")
            );
            candidate = if attempt == 0 {
                ask(&self.reflection_provider, &prompt).await?
            } else {
                ask(
                    &self.reflection_provider,
                    &format!("{prompt}\n\nYour previous proposal overlapped too much. Try again."),
                )
                .await?
            };

            let tokens = (self.tokenize)(&candidate);
            let max_overlap = top5
                .iter()
                .map(|t| repetition::overlap_ratio(&tokens, &(self.tokenize)(t)))
                .fold(0.0_f64, f64::max);
            if max_overlap < TASK_OVERLAP_MAX {
                return Ok(candidate);
            }
        }
        Ok(candidate)
    }

    /// Runs one C6 agent turn on the autonomous session and observes its event
    /// stream for `hasCreatedFile`/`hasUsedBrowser`/`hasCompletedWork` (§4.8 step 8).
    async fn run_autonomous_action(&self, message: String) -> anyhow::Result<(bool, bool, bool)> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let req = RunRequest {
            session_id: AUTONOMOUS_SESSION_ID.to_string(),
            user_message: message,
            images: Vec::new(),
            max_iterations: None,
            cancel: self.shutdown.clone(),
        };
        self.agent_loop.run(req, tx).await;

        let mut saw_file_event = false;
        let mut saw_browser_event = false;
        let mut completed = false;
        while let Ok(ev) = rx.try_recv() {
            match &ev {
                Event::ToolCall { name, .. } if name == "file" => saw_file_event = true,
                Event::ToolCall { name, .. } if name == "browser" => saw_browser_event = true,
                Event::Done { .. } => completed = true,
                _ => {}
            }
            self.bus.publish(
                StreamKind::Timeline,
                serde_json::json!({"event": format!("{ev:?}")}),
            );
        }
        Ok((saw_file_event, saw_browser_event, completed))
    }
}

async fn ask(provider: &Arc<dyn LlmProvider>, prompt: &str) -> anyhow::Result<String> {
    let request = CompletionRequest {
        messages: vec![Message::user(prompt)],
        tools: Vec::new(),
        system_prompt: None,
        temperature: None,
        max_tokens: None,
        thinking_budget: None,
    };
    let (completion, _usage) = provider
        .complete(&request)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    match completion {
        Completion::Text { content, .. } => Ok(content),
        Completion::ToolCalls { .. } => Ok(String::new()),
    }
}

fn phase_category(phase: Phase) -> &'static str {
    match phase {
        Phase::Investigate => "investigation",
        Phase::Execute => "execution",
    }
}

fn build_reflection_prompt(phase: Phase, history: &[Message]) -> String {
    let recap = history
        .iter()
        .filter_map(|m| m.content.as_deref())
        .collect::<Vec<_>>()
        .join("\n");
    match phase {
        Phase::Investigate => format!(
            "Recent activity:\n{recap}\n\nInvestigate: what is worth exploring next, before \
             committing to an action?"
        ),
        Phase::Execute => format!(
            "Recent activity:\n{recap}\n\nDecide on one concrete action to take now and describe \
             it."
        ),
    }
}
