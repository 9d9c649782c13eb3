use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

type TeardownFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type TeardownHook = Box<dyn FnOnce() -> TeardownFuture + Send>;

/// Registration of ordered teardown hooks (§4.10, C10). On `shutdown()`, hooks run in
/// reverse registration order — last registered, first torn down, mirroring how
/// resources are usually acquired in dependency order during startup — each isolated
/// from the others' failures. `is_shutting_down()` lets long-running loops (C6's
/// per-run cancel check, C8's main loop) exit cooperatively without a direct
/// dependency on this coordinator.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    hooks: Mutex<Vec<(String, TeardownHook)>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// A clone of the shared cancellation token, handed to agent runs and the
    /// consciousness driver so they observe shutdown without depending on this type.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Register a teardown hook, identified by `name` for logging.
    pub fn register<F, Fut>(&self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: TeardownHook = Box::new(move || Box::pin(hook()));
        self.hooks.lock().unwrap().push((name.into(), boxed));
    }

    /// Cancel the shared token, then run every registered hook in reverse order. A
    /// hook's failure is logged and does not prevent the rest from running.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let hooks: Vec<(String, TeardownHook)> = std::mem::take(&mut *self.hooks.lock().unwrap());
        for (name, hook) in hooks.into_iter().rev() {
            if let Err(e) = hook().await {
                tracing::warn!(hook = %name, error = %e, "teardown hook failed");
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_hooks_run_in_reverse_order() {
        let coordinator = ShutdownCoordinator::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        coordinator.register("a", move || async move {
            order_a.lock().unwrap().push("a");
            Ok(())
        });
        let order_b = order.clone();
        coordinator.register("b", move || async move {
            order_b.lock().unwrap().push("b");
            Ok(())
        });

        assert!(!coordinator.is_shutting_down());
        coordinator.shutdown().await;
        assert!(coordinator.is_shutting_down());
        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_block_others() {
        let coordinator = ShutdownCoordinator::new();
        let ran = Arc::new(Mutex::new(false));

        coordinator.register("failing", || async { anyhow::bail!("boom") });
        let ran_clone = ran.clone();
        coordinator.register("after", move || async move {
            *ran_clone.lock().unwrap() = true;
            Ok(())
        });

        coordinator.shutdown().await;
        assert!(*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn test_token_reflects_shutdown_state() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();
        assert!(!token.is_cancelled());
        coordinator.shutdown().await;
        assert!(token.is_cancelled());
    }
}
