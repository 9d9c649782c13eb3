pub mod browser;
pub mod code;
pub mod file;
pub mod memory;
pub mod shell;
pub mod wait;
pub mod web;

use std::sync::Arc;

use noesis_core::tool::ToolRegistry;
use noesis_store::Store;

/// Build the C1 registry with every built-in tool registered (§4.1).
pub fn with_defaults(store: Arc<Store>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(shell::ShellTool));
    registry.register(Box::new(file::FileTool));
    registry.register(Box::new(web::WebTool));
    registry.register(Box::new(code::CodeTool));
    registry.register(Box::new(browser::BrowserTool::new()));
    registry.register(Box::new(memory::MemoryTool::new(store)));
    registry.register(Box::new(wait::WaitTool));
    registry
}
