use anyhow::Result;

use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineKind {
    Thought,
    Knowledge,
    Task,
}

#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub kind: TimelineKind,
    pub id: i64,
    pub content: String,
    pub summary: String,
    pub metadata: serde_json::Value,
    pub timestamp: i64,
}

impl Store {
    /// A derived view unioning thoughts, knowledge, and tasks (§3), ordered by
    /// timestamp descending. Purely a read; the store owns no separate timeline
    /// table.
    pub fn timeline(&self, limit: usize) -> Result<Vec<TimelineEntry>> {
        let mut entries = Vec::new();

        for t in self.thought_recent(limit)? {
            entries.push(TimelineEntry {
                kind: TimelineKind::Thought,
                id: t.id,
                content: t.content,
                summary: t.summary,
                metadata: serde_json::json!({"category": t.category}),
                timestamp: t.created_at,
            });
        }

        for k in self.knowledge_recent(limit)? {
            entries.push(TimelineEntry {
                kind: TimelineKind::Knowledge,
                id: k.id,
                content: k.content,
                summary: k.summary,
                metadata: serde_json::json!({"source": k.source, "importance": k.importance}),
                timestamp: k.created_at,
            });
        }

        for task in self.task_recent_any_session(limit)? {
            entries.push(TimelineEntry {
                kind: TimelineKind::Task,
                id: task.id,
                content: task.description.clone(),
                summary: task.result.clone().unwrap_or_default(),
                metadata: serde_json::json!({"status": format!("{:?}", task.status)}),
                timestamp: task.created_at,
            });
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_unions_and_orders_descending() {
        let store = Store::open_memory().unwrap();
        store.thought_create("c", "thought summary", "cat").unwrap();
        store.knowledge_create("k content", "knowledge summary", "src", 5, None).unwrap();
        store.task_create("sess", "a task").unwrap();

        let entries = store.timeline(10).unwrap();
        assert_eq!(entries.len(), 3);
        for pair in entries.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }
}
