use noesis_core::tool::ToolRegistry;
use noesis_store::Store;

/// Session id the consciousness driver runs under (C8). The context assembler omits
/// the *Background Activity* block when assembling for this session, since it would
/// otherwise be quoting its own history back at itself (§4.5 step 5).
pub const AUTONOMOUS_SESSION_ID: &str = "autonomous";

const PREAMBLE: &str = "You are Noesis, an autonomous agent. Use the available tools to accomplish the user's request directly and verifiably; prefer taking action over describing what you would do.";

/// Pure composition of a system prompt from the fixed preamble, tool declarations,
/// a relevant-memories block, recent task history, and (for non-autonomous sessions)
/// a background-activity block (§4.5). Takes no locks beyond the read-only store
/// queries it issues; never writes.
pub fn assemble(
    store: &Store,
    registry: &ToolRegistry,
    session_id: &str,
    user_message: &str,
) -> anyhow::Result<String> {
    let mut sections = vec![PREAMBLE.to_string()];

    sections.push(tool_section(registry));

    if let Some(memories) = memory_section(store, user_message)? {
        sections.push(memories);
    }

    if let Some(history) = task_history_section(store, session_id)? {
        sections.push(history);
    }

    if session_id != AUTONOMOUS_SESSION_ID {
        if let Some(background) = background_activity_section(store)? {
            sections.push(background);
        }
    }

    Ok(sections.join("\n\n"))
}

fn tool_section(registry: &ToolRegistry) -> String {
    let mut out = String::from("Available tools:\n");
    for def in registry.list() {
        out.push_str(&format!("- {}: {}\n", def.function.name, def.function.description));
    }
    out.trim_end().to_string()
}

fn memory_section(store: &Store, user_message: &str) -> anyhow::Result<Option<String>> {
    let hits = store.memory_search(user_message, 5)?;
    if hits.is_empty() {
        return Ok(None);
    }
    let mut out = String::from("Relevant Memories:\n");
    for hit in hits {
        out.push_str(&format!("- {}: {}\n", hit.row.key, hit.row.value));
    }
    Ok(Some(out.trim_end().to_string()))
}

fn task_history_section(store: &Store, session_id: &str) -> anyhow::Result<Option<String>> {
    let tasks = store.task_recent(session_id, 5)?;
    if tasks.is_empty() {
        return Ok(None);
    }
    let mut out = String::from("Recent Task History:\n");
    for task in tasks {
        let status = format!("{:?}", task.status).to_lowercase();
        let result_prefix: String = task
            .result
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(80)
            .collect();
        out.push_str(&format!(
            "- [{status}] {}: {result_prefix}\n",
            task.description
        ));
    }
    Ok(Some(out.trim_end().to_string()))
}

fn background_activity_section(store: &Store) -> anyhow::Result<Option<String>> {
    let tasks = store.task_recent(AUTONOMOUS_SESSION_ID, 3)?;
    if tasks.is_empty() {
        return Ok(None);
    }
    let mut out = String::from("Background Activity:\n");
    for task in tasks {
        let status = format!("{:?}", task.status).to_lowercase();
        out.push_str(&format!("- [{status}] {}\n", task.description));
    }
    Ok(Some(out.trim_end().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembles_with_no_optional_blocks() {
        let store = Store::open_memory().unwrap();
        let registry = ToolRegistry::new();
        let prompt = assemble(&store, &registry, "sess-1", "hello").unwrap();
        assert!(prompt.contains(PREAMBLE));
        assert!(!prompt.contains("Relevant Memories"));
        assert!(!prompt.contains("Recent Task History"));
    }

    #[test]
    fn test_includes_memory_block_when_relevant() {
        let store = Store::open_memory().unwrap();
        store.memory_set("weather", "it rains often here", "note", 5).unwrap();
        let registry = ToolRegistry::new();
        let prompt = assemble(&store, &registry, "sess-1", "what's the weather like").unwrap();
        assert!(prompt.contains("Relevant Memories"));
        assert!(prompt.contains("it rains often here"));
    }

    #[test]
    fn test_includes_task_history() {
        let store = Store::open_memory().unwrap();
        let id = store.task_create("sess-1", "write a poem").unwrap();
        store.task_finish(id, noesis_store::TaskStatus::Completed, Some("done!")).unwrap();
        let registry = ToolRegistry::new();
        let prompt = assemble(&store, &registry, "sess-1", "anything new?").unwrap();
        assert!(prompt.contains("Recent Task History"));
        assert!(prompt.contains("write a poem"));
    }

    #[test]
    fn test_background_activity_omitted_for_autonomous_session() {
        let store = Store::open_memory().unwrap();
        store.task_create(AUTONOMOUS_SESSION_ID, "explored the filesystem").unwrap();
        let registry = ToolRegistry::new();
        let prompt = assemble(&store, &registry, AUTONOMOUS_SESSION_ID, "continue").unwrap();
        assert!(!prompt.contains("Background Activity"));
    }

    #[test]
    fn test_background_activity_present_for_other_sessions() {
        let store = Store::open_memory().unwrap();
        store.task_create(AUTONOMOUS_SESSION_ID, "explored the filesystem").unwrap();
        let registry = ToolRegistry::new();
        let prompt = assemble(&store, &registry, "sess-1", "hi").unwrap();
        assert!(prompt.contains("Background Activity"));
        assert!(prompt.contains("explored the filesystem"));
    }
}
