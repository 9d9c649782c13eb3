use async_trait::async_trait;
use serde_json::Value;

use crate::event::{FileDescriptor, ImageDescriptor};
use crate::llm::{FunctionDefinition, ToolDefinition};
use crate::sandbox::SandboxPolicy;

/// Result of a tool invocation (§4.1). `success=false` is data, not an exception — the
/// agent loop lets the LLM decide what to do with a tool-local failure (§7).
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
    pub images: Vec<ImageDescriptor>,
    pub files: Vec<FileDescriptor>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
            images: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
            images: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: ImageDescriptor) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_file(mut self, file: FileDescriptor) -> Self {
        self.files.push(file);
        self
    }
}

/// Context passed to every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    pub workspace_dir: String,
    pub agent_name: String,
    pub session_key: String,
    pub sandbox: SandboxPolicy,
    pub chat_id: i64,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("workspace_dir", &self.workspace_dir)
            .field("agent_name", &self.agent_name)
            .field("session_key", &self.session_key)
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            workspace_dir: String::new(),
            agent_name: String::new(),
            session_key: String::new(),
            sandbox: SandboxPolicy::default(),
            chat_id: 0,
        }
    }
}

/// Trait for all agent tools (§4.1).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult>;
}

/// Registry of available tools (C1). Dispatch stays string-keyed (per §9's redesign
/// flag, arguments are validated at the boundary via each tool's JSON schema rather
/// than by duck-typing); `register` is idempotent by name, last registration wins.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. Idempotent by name — registering the same name twice replaces
    /// the earlier registration (last wins, per §4.1).
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    /// Declarations only (no execution), sent to the LLM.
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters(),
                },
            })
            .collect()
    }

    /// Execute a tool by name, timing wall-clock and wrapping uncaught errors into a
    /// failure `ToolResult` rather than letting them escape as exceptions.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.lookup(name) else {
            return ToolResult::error(format!("tool not found: {name}"));
        };
        match tool.execute(args, ctx).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(format!("{e}")),
        }
    }

    /// Execute a batch of calls concurrently, preserving input order in the result.
    pub async fn execute_parallel(
        &self,
        calls: &[(String, Value)],
        ctx: &ToolContext,
    ) -> Vec<(String, ToolResult)> {
        let futures: Vec<_> = calls
            .iter()
            .map(|(name, args)| {
                let name = name.clone();
                let args = args.clone();
                let ctx = ctx.clone();
                async move {
                    let result = self.execute(&name, args, &ctx).await;
                    (name, result)
                }
            })
            .collect();
        futures::future::join_all(futures).await
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Create a new registry from an existing one, excluding a specific tool by name.
    /// Used to keep subagents from spawning further subagents.
    pub fn without_tool(source: Self, exclude_name: &str) -> Self {
        let tools = source
            .tools
            .into_iter()
            .filter(|t| t.name() != exclude_name)
            .collect();
        Self { tools }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::success(args.to_string()))
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent_last_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.tool_names().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_returns_error_result() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext::default();
        let result = registry.execute("missing", serde_json::json!({}), &ctx).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_without_tool_removes_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let filtered = ToolRegistry::without_tool(registry, "echo");
        assert!(filtered.tool_names().is_empty());
    }

    #[tokio::test]
    async fn test_execute_parallel_preserves_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let ctx = ToolContext::default();
        let calls = vec![
            ("echo".to_string(), serde_json::json!({"n": 1})),
            ("echo".to_string(), serde_json::json!({"n": 2})),
        ];
        let results = registry.execute_parallel(&calls, &ctx).await;
        assert!(results[0].1.output.contains("\"n\":1"));
        assert!(results[1].1.output.contains("\"n\":2"));
    }
}
