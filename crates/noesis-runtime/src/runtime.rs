use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use noesis_agent::{AgentLoop, RateLimiter, RunRequest};
use noesis_bus::EventBus;
use noesis_core::config::BootstrapConfig;
use noesis_core::event::Event;
use noesis_core::llm::LlmProvider;
use noesis_core::sandbox::SandboxPolicy;
use noesis_core::tool::{ToolContext, ToolRegistry};
use noesis_mind::ConsciousnessDriver;
use noesis_store::Store;
use tokio::sync::{mpsc::UnboundedReceiver, Semaphore};
use tokio::task::JoinHandle;

use crate::shutdown::ShutdownCoordinator;

/// Default token-bucket shape applied to the primary LLM provider when the caller
/// doesn't supply one (§4.7): 60 requests/min, burst capacity equal to the interval
/// rate. A concrete deployment overrides this from its own config.
const DEFAULT_RATE_TOKENS_PER_INTERVAL: f64 = 60.0;
const DEFAULT_RATE_INTERVAL_MS: u64 = 60_000;
const DEFAULT_RATE_CAPACITY: f64 = 60.0;

/// At most this many concurrent chat-stream agent runs (§5 "Concurrency caps").
const DEFAULT_MAX_CONCURRENT_RUNS: usize = 3;

/// Returned by `Runtime::run_chat` when the concurrency cap is already saturated.
#[derive(Debug)]
pub struct ConcurrencyLimitExceeded(pub usize);

impl std::fmt::Display for ConcurrencyLimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rate limited: {} concurrent runs already active", self.0)
    }
}

impl std::error::Error for ConcurrencyLimitExceeded {}

/// Lifecycle-scoped owner of every shared resource (§9 "replace global singletons
/// with a lifecycle-scoped runtime handle; hand them to C6/C8 explicitly"). One
/// `Runtime` per running process; `Arc<Runtime>` is handed to the CLI and gateway
/// binaries, which never reach for a global.
pub struct Runtime {
    pub store: Arc<Store>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<ToolRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub config: BootstrapConfig,
    agent_loop: Arc<AgentLoop>,
    chat_permits: Arc<Semaphore>,
    active_runs: Arc<AtomicUsize>,
    user_active: Arc<AtomicBool>,
    consciousness_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    /// Wire a store, tool registry, rate limiter, and agent loop from a bootstrap
    /// config and the two LLM providers C6/C8 need. Concrete `LlmProvider`
    /// implementations are an external collaborator (§1) — supplied by the caller,
    /// never constructed here.
    pub fn bootstrap(
        config: BootstrapConfig,
        store: Arc<Store>,
        primary_provider: Arc<dyn LlmProvider>,
        reflection_provider: Arc<dyn LlmProvider>,
    ) -> Arc<Runtime> {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(noesis_agent::tools::with_defaults(store.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(
            DEFAULT_RATE_TOKENS_PER_INTERVAL,
            DEFAULT_RATE_INTERVAL_MS,
            DEFAULT_RATE_CAPACITY,
        ));
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let tool_ctx = ToolContext {
            workspace_dir: config.workspace_dir.clone(),
            agent_name: config.agent_name.clone(),
            session_key: String::new(),
            sandbox: SandboxPolicy::default(),
            chat_id: 0,
        };

        let agent_loop = Arc::new(AgentLoop::new(
            store.clone(),
            primary_provider.clone(),
            registry.clone(),
            rate_limiter.clone(),
            tool_ctx,
        ));

        let runtime = Arc::new(Runtime {
            store,
            bus,
            registry,
            rate_limiter,
            shutdown,
            config,
            agent_loop,
            chat_permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_RUNS)),
            active_runs: Arc::new(AtomicUsize::new(0)),
            user_active: Arc::new(AtomicBool::new(false)),
            consciousness_handle: std::sync::Mutex::new(None),
        });

        // Hooks hold a `Weak` back-reference so the coordinator (owned by `Runtime`
        // itself) never keeps the runtime alive — an `Arc` here would be a cycle.
        let driver_runtime = Arc::downgrade(&runtime);
        runtime.shutdown.register("chat-stream runs drain", move || async move {
            while let Some(runtime) = driver_runtime.upgrade() {
                if runtime.active_runs.load(Ordering::Relaxed) == 0 {
                    break;
                }
                drop(runtime);
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            Ok(())
        });

        let (driver_primary, driver_reflection) = (primary_provider, reflection_provider);
        let workspace_dir = runtime.config.workspace_dir.clone();
        let driver = Arc::new(ConsciousnessDriver::new(
            runtime.store.clone(),
            runtime.bus.clone(),
            runtime.agent_loop.clone(),
            driver_primary,
            driver_reflection,
            workspace_dir,
            runtime.user_active.clone(),
            runtime.shutdown.token(),
        ));
        let handle = driver.spawn();
        *runtime.consciousness_handle.lock().unwrap() = Some(handle);

        let consciousness_runtime = Arc::downgrade(&runtime);
        runtime
            .shutdown
            .register("consciousness driver", move || async move {
                if let Some(runtime) = consciousness_runtime.upgrade() {
                    let handle = runtime.consciousness_handle.lock().unwrap().take();
                    if let Some(handle) = handle {
                        handle.abort();
                    }
                }
                Ok(())
            });

        runtime
    }

    /// Mark the autonomous session as currently owned by an interactive user, so the
    /// consciousness driver yields instead of racing it (§4.8 step 1).
    pub fn set_user_active(&self, active: bool) {
        self.user_active.store(active, Ordering::Relaxed);
    }

    pub fn active_run_count(&self) -> usize {
        self.active_runs.load(Ordering::Relaxed)
    }

    /// Run one chat-stream agent turn, enforcing the concurrency cap (§5 "at most N
    /// concurrent chat-stream agent runs; excess requests are rejected with a
    /// rate-limit signal").
    pub async fn run_chat(
        &self,
        req: RunRequest,
    ) -> Result<UnboundedReceiver<Event>, ConcurrencyLimitExceeded> {
        let permit = match self.chat_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(ConcurrencyLimitExceeded(self.active_run_count())),
        };

        self.active_runs.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let agent_loop = self.agent_loop.clone();
        let active_runs = self.active_runs.clone();
        tokio::spawn(async move {
            agent_loop.run(req, tx).await;
            drop(permit);
            active_runs.fetch_sub(1, Ordering::Relaxed);
        });
        Ok(rx)
    }
}
