use anyhow::Result;
use rusqlite::params;

use crate::store::{now_ms, Store};

#[derive(Debug, Clone)]
pub struct KnowledgeRow {
    pub id: i64,
    pub content: String,
    pub summary: String,
    pub source: String,
    pub importance: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct KnowledgeHit {
    pub row: KnowledgeRow,
    pub distance: f32,
}

/// Embeddings are an opaque `Vec<f32>` accepted on write and on query (§3, §6.6's
/// 384-dim default) — this store never produces them itself, matching the explicit
/// non-goal "defining a vector-embedding algorithm".
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Cosine distance between two already-normalized vectors (1 - cosine similarity).
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    1.0 - dot
}

impl Store {
    /// Insert a Knowledge row together with its vector (stored normalized).
    pub fn knowledge_create(
        &self,
        content: &str,
        summary: &str,
        source: &str,
        importance: i64,
        vector: Option<&[f32]>,
    ) -> Result<i64> {
        let importance = importance.clamp(1, 10);
        let now = now_ms();
        self.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO knowledge (content, summary, source, importance, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![content, summary, source, importance, now],
            )?;
            let id = tx.last_insert_rowid();
            if let Some(vector) = vector {
                let normalized = normalize(vector);
                tx.execute(
                    "INSERT INTO knowledge_vector (knowledge_id, dim, vector) VALUES (?1, ?2, ?3)",
                    params![id, normalized.len() as i64, encode_vector(&normalized)],
                )?;
            }
            Ok(id)
        })
    }

    /// k-nearest by cosine distance. If the vector index is absent (no rows carry a
    /// vector), returns an empty result — keyword search (memory) remains available
    /// regardless, per §4.4.
    pub fn knowledge_vector_search(&self, query_vector: &[f32], k: usize) -> Result<Vec<KnowledgeHit>> {
        let query = normalize(query_vector);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT k.id, k.content, k.summary, k.source, k.importance, k.created_at, v.vector
             FROM knowledge k JOIN knowledge_vector v ON v.knowledge_id = k.id",
        )?;
        let mut hits: Vec<KnowledgeHit> = stmt
            .query_map([], |row| {
                let vector_bytes: Vec<u8> = row.get(6)?;
                Ok((
                    KnowledgeRow {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        summary: row.get(2)?,
                        source: row.get(3)?,
                        importance: row.get(4)?,
                        created_at: row.get(5)?,
                    },
                    decode_vector(&vector_bytes),
                ))
            })?
            .filter_map(|r| r.ok())
            .map(|(row, vector)| {
                let distance = cosine_distance(&query, &vector);
                KnowledgeHit { row, distance }
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap()
                .then_with(|| a.row.id.cmp(&b.row.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Most recent knowledge rows by creation time, used by the timeline view.
    pub fn knowledge_recent(&self, limit: usize) -> Result<Vec<KnowledgeRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, content, summary, source, importance, created_at
             FROM knowledge ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(KnowledgeRow {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    summary: row.get(2)?,
                    source: row.get(3)?,
                    importance: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Prune by ascending (importance, created_at) beyond `cap`; the vector row is
    /// deleted together with its parent via `ON DELETE CASCADE`.
    pub fn knowledge_prune(&self, cap: usize) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM knowledge", [], |r| r.get(0))?;
        let total = total as usize;
        if total <= cap {
            return Ok(0);
        }
        let excess = total - cap;
        conn.execute(
            "DELETE FROM knowledge WHERE id IN (
                SELECT id FROM knowledge ORDER BY importance ASC, created_at ASC LIMIT ?1
            )",
            params![excess as i64],
        )
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_search_ranks_by_cosine_distance() {
        let store = Store::open_memory().unwrap();
        store
            .knowledge_create("rust facts", "s", "src", 5, Some(&[1.0, 0.0, 0.0]))
            .unwrap();
        store
            .knowledge_create("orthogonal", "s", "src", 5, Some(&[0.0, 1.0, 0.0]))
            .unwrap();
        let hits = store.knowledge_vector_search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].row.content, "rust facts");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[test]
    fn test_vector_search_empty_index_returns_empty() {
        let store = Store::open_memory().unwrap();
        store.knowledge_create("no vector", "s", "src", 5, None).unwrap();
        let hits = store.knowledge_vector_search(&[1.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_prune_deletes_vector_with_parent() {
        let store = Store::open_memory().unwrap();
        let low_id = store
            .knowledge_create("low importance", "s", "src", 1, Some(&[1.0, 0.0]))
            .unwrap();
        store
            .knowledge_create("high importance", "s", "src", 9, Some(&[0.0, 1.0]))
            .unwrap();
        store.knowledge_prune(1).unwrap();

        let conn = store.conn.lock().unwrap();
        let vector_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM knowledge_vector WHERE knowledge_id = ?1",
                params![low_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(vector_count, 0);
    }
}
