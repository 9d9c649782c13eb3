use anyhow::Result;
use rusqlite::params;

use crate::store::{now_ms, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationRole {
    User,
    Model,
}

impl ConversationRole {
    fn as_str(&self) -> &'static str {
        match self {
            ConversationRole::User => "user",
            ConversationRole::Model => "model",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "user" {
            ConversationRole::User
        } else {
            ConversationRole::Model
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: i64,
    pub session_id: String,
    pub role: ConversationRole,
    pub content: String,
    pub created_at: i64,
}

impl Store {
    pub fn conversation_append(
        &self,
        session_id: &str,
        role: ConversationRole,
        content: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO conversation (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role.as_str(), content, now_ms()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Last `limit` rows for a session, in chronological (oldest-first) order, as
    /// agent history loading requires.
    pub fn conversation_history(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, created_at FROM (
                SELECT id, session_id, role, content, created_at FROM conversation
                WHERE session_id = ?1 ORDER BY created_at DESC LIMIT ?2
            ) ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id, limit as i64], |row| {
                let role: String = row.get(2)?;
                Ok(ConversationRow {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    role: ConversationRole::parse(&role),
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Prune a session's history to the last `keep` rows by creation order.
    pub fn conversation_prune(&self, session_id: &str, keep: usize) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM conversation WHERE session_id = ?1 AND id NOT IN (
                SELECT id FROM conversation WHERE session_id = ?1
                ORDER BY created_at DESC LIMIT ?2
            )",
            params![session_id, keep as i64],
        )
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_history_order() {
        let store = Store::open_memory().unwrap();
        store.conversation_append("s1", ConversationRole::User, "hi").unwrap();
        store.conversation_append("s1", ConversationRole::Model, "hello").unwrap();
        let history = store.conversation_history("s1", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].content, "hello");
    }

    #[test]
    fn test_history_respects_limit_keeping_most_recent() {
        let store = Store::open_memory().unwrap();
        for i in 0..5 {
            store
                .conversation_append("s1", ConversationRole::User, &format!("m{i}"))
                .unwrap();
        }
        let history = store.conversation_history("s1", 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "m3");
        assert_eq!(history[1].content, "m4");
    }

    #[test]
    fn test_prune_keeps_last_n() {
        let store = Store::open_memory().unwrap();
        for i in 0..5 {
            store
                .conversation_append("s1", ConversationRole::User, &format!("m{i}"))
                .unwrap();
        }
        store.conversation_prune("s1", 2).unwrap();
        let history = store.conversation_history("s1", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "m3");
    }
}
