use anyhow::Result;
use rusqlite::params;

use crate::store::{now_ms, Store};

#[derive(Debug, Clone)]
pub struct ThoughtRow {
    pub id: i64,
    pub content: String,
    pub summary: String,
    pub category: String,
    pub created_at: i64,
}

impl Store {
    pub fn thought_create(&self, content: &str, summary: &str, category: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO thought (content, summary, category, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![content, summary, category, now_ms()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn thought_recent(&self, limit: usize) -> Result<Vec<ThoughtRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, content, summary, category, created_at FROM thought ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_thought)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn thought_is_empty(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM thought", [], |r| r.get(0))?;
        Ok(count == 0)
    }

    /// Delete thoughts older than `retention_days` (§6.6: 7-day retention).
    pub fn thought_prune_older_than(&self, retention_days: i64) -> Result<usize> {
        let cutoff = now_ms() - retention_days * 24 * 60 * 60 * 1000;
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM thought WHERE created_at < ?1", params![cutoff])
            .map_err(Into::into)
    }
}

fn row_to_thought(row: &rusqlite::Row) -> rusqlite::Result<ThoughtRow> {
    Ok(ThoughtRow {
        id: row.get(0)?,
        content: row.get(1)?,
        summary: row.get(2)?,
        category: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_recent() {
        let store = Store::open_memory().unwrap();
        assert!(store.thought_is_empty().unwrap());
        store.thought_create("long reflection", "short", "reflection").unwrap();
        assert!(!store.thought_is_empty().unwrap());
        let recent = store.thought_recent(5).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].summary, "short");
    }

    #[test]
    fn test_prune_older_than() {
        let store = Store::open_memory().unwrap();
        store.thought_create("c", "s", "cat").unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute("UPDATE thought SET created_at = 0", []).unwrap();
        }
        let deleted = store.thought_prune_older_than(7).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.thought_is_empty().unwrap());
    }
}
