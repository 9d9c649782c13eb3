use anyhow::Result;
use rusqlite::params;

use crate::store::{now_ms, Store};

#[derive(Debug, Clone)]
pub struct MemoryRow {
    pub key: String,
    pub value: String,
    pub category: String,
    pub importance: i64,
    pub access_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct MemorySearchHit {
    pub row: MemoryRow,
    pub score: f64,
}

impl Store {
    /// Upsert by key. `importance` is clamped into `1..=10` per §3's invariant.
    pub fn memory_set(
        &self,
        key: &str,
        value: &str,
        category: &str,
        importance: i64,
    ) -> Result<()> {
        let importance = importance.clamp(1, 10);
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memory (key, value, category, importance, access_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                category = excluded.category,
                importance = excluded.importance,
                updated_at = excluded.updated_at",
            params![key, value, category, importance, now],
        )?;
        Ok(())
    }

    /// Fetch one memory row by key, incrementing `access_count` on a hit.
    pub fn memory_get(&self, key: &str) -> Result<Option<MemoryRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT key, value, category, importance, access_count, created_at, updated_at
                 FROM memory WHERE key = ?1",
                params![key],
                row_to_memory,
            )
            .ok();

        if row.is_some() {
            conn.execute(
                "UPDATE memory SET access_count = access_count + 1 WHERE key = ?1",
                params![key],
            )?;
        }
        Ok(row)
    }

    pub fn memory_delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM memory WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    /// Keyword-scored search (§3): score = sum of matched lowercase tokens across
    /// (key, value, category) + 0.1·importance + 0.2·ln(1+access_count); ties broken
    /// by importance, then updated_at, both descending.
    pub fn memory_search(&self, query: &str, limit: usize) -> Result<Vec<MemorySearchHit>> {
        let tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, value, category, importance, access_count, created_at, updated_at FROM memory",
        )?;
        let rows: Vec<MemoryRow> = stmt
            .query_map([], row_to_memory)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut hits: Vec<MemorySearchHit> = rows
            .into_iter()
            .filter_map(|row| {
                let haystack = format!("{} {} {}", row.key, row.value, row.category).to_lowercase();
                let matched: i64 = tokens.iter().filter(|t| haystack.contains(t.as_str())).count() as i64;
                if matched == 0 {
                    return None;
                }
                let score = matched as f64
                    + 0.1 * row.importance as f64
                    + 0.2 * ((1 + row.access_count) as f64).ln();
                Some(MemorySearchHit { row, score })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then_with(|| b.row.importance.cmp(&a.row.importance))
                .then_with(|| b.row.updated_at.cmp(&a.row.updated_at))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Prune by ascending (importance, access_count, updated_at) when the table
    /// exceeds `cap` rows, deleting the lowest-ranked excess.
    pub fn memory_prune(&self, cap: usize) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM memory", [], |r| r.get(0))?;
        let total = total as usize;
        if total <= cap {
            return Ok(0);
        }
        let excess = total - cap;
        let deleted = conn.execute(
            "DELETE FROM memory WHERE key IN (
                SELECT key FROM memory
                ORDER BY importance ASC, access_count ASC, updated_at ASC
                LIMIT ?1
            )",
            params![excess as i64],
        )?;
        Ok(deleted)
    }
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<MemoryRow> {
    Ok(MemoryRow {
        key: row.get(0)?,
        value: row.get(1)?,
        category: row.get(2)?,
        importance: row.get(3)?,
        access_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip_increments_access_count() {
        let store = Store::open_memory().unwrap();
        store.memory_set("fav-color", "blue", "preference", 5).unwrap();
        let row = store.memory_get("fav-color").unwrap().unwrap();
        assert_eq!(row.access_count, 0);
        let row = store.memory_get("fav-color").unwrap().unwrap();
        assert_eq!(row.access_count, 1);
    }

    #[test]
    fn test_upsert_overwrites_value() {
        let store = Store::open_memory().unwrap();
        store.memory_set("k", "v1", "c", 5).unwrap();
        store.memory_set("k", "v2", "c", 7).unwrap();
        let row = store.memory_get("k").unwrap().unwrap();
        assert_eq!(row.value, "v2");
        assert_eq!(row.importance, 7);
    }

    #[test]
    fn test_importance_clamped_to_1_10() {
        let store = Store::open_memory().unwrap();
        store.memory_set("k", "v", "c", 50).unwrap();
        let row = store.memory_get("k").unwrap().unwrap();
        assert_eq!(row.importance, 10);
        store.memory_set("k2", "v", "c", -3).unwrap();
        let row = store.memory_get("k2").unwrap().unwrap();
        assert_eq!(row.importance, 1);
    }

    #[test]
    fn test_search_matches_and_ranks() {
        let store = Store::open_memory().unwrap();
        store.memory_set("rust-tip", "use borrowing wisely", "tip", 3).unwrap();
        store.memory_set("rust-fact", "rust is memory safe", "fact", 9).unwrap();
        let hits = store.memory_search("rust", 10).unwrap();
        assert_eq!(hits.len(), 2);
        // higher importance wins the tie since token match count is equal
        assert_eq!(hits[0].row.key, "rust-fact");
    }

    #[test]
    fn test_search_no_match_returns_empty() {
        let store = Store::open_memory().unwrap();
        store.memory_set("k", "v", "c", 5).unwrap();
        let hits = store.memory_search("zzzznotfound", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_prune_keeps_highest_ranked() {
        let store = Store::open_memory().unwrap();
        for i in 0..5 {
            store
                .memory_set(&format!("k{i}"), "v", "c", (i + 1) as i64)
                .unwrap();
        }
        let deleted = store.memory_prune(2).unwrap();
        assert_eq!(deleted, 3);
        // the two highest-importance rows (k3, k4) should survive
        assert!(store.memory_get("k4").unwrap().is_some());
        assert!(store.memory_get("k0").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let store = Store::open_memory().unwrap();
        store.memory_set("k", "v", "c", 5).unwrap();
        assert!(store.memory_delete("k").unwrap());
        assert!(store.memory_get("k").unwrap().is_none());
        assert!(!store.memory_delete("k").unwrap());
    }
}
