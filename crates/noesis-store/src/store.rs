use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::Connection;

const SCHEMA_VERSION: i64 = 1;

/// The embedded relational state store (C4). A single-file `rusqlite` database, the
/// sole owner of every entity in §3; every other component sees it only through the
/// typed functions defined on this type across the sibling modules in this crate.
///
/// Writes are serialized by `conn`'s mutex, matching §5's "the state store serializes
/// writes (either via a mutex or a single writer)" and the teacher's own
/// `SessionStore` pattern (`sessions.rs`), which wraps a single `rusqlite::Connection`
/// rather than pooling.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the store at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating parent dir for {}", path.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening state store at {}", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_pragmas()?;
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store for tests, matching the teacher's `SessionStore::open_memory`.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_pragmas()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure_pragmas(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000i64)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current >= SCHEMA_VERSION {
            return Ok(());
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS memory (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                importance INTEGER NOT NULL DEFAULT 5,
                access_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS task (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT,
                iterations INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_task_session ON task(session_id, created_at);

            CREATE TABLE IF NOT EXISTS tool_call (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES task(id),
                tool_name TEXT NOT NULL,
                input_json TEXT NOT NULL,
                output_truncated TEXT NOT NULL,
                success INTEGER NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tool_call_task ON tool_call(task_id);

            CREATE TABLE IF NOT EXISTS conversation (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversation_session ON conversation(session_id, created_at);

            CREATE TABLE IF NOT EXISTS config_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS thought (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                summary TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS knowledge (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                summary TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                importance INTEGER NOT NULL DEFAULT 5,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS knowledge_vector (
                knowledge_id INTEGER PRIMARY KEY REFERENCES knowledge(id) ON DELETE CASCADE,
                dim INTEGER NOT NULL,
                vector BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS survival_ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                amount REAL NOT NULL,
                reason TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// Run `f` inside a single atomic transaction; rolls back on any error.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Flush and checkpoint the WAL before releasing the handle.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")?;
        Ok(())
    }
}

/// Default on-disk location: `~/.noesis/agents/{name}/store.db`, matching the
/// teacher's `sessions.rs::resolve_db_path` convention.
pub fn resolve_store_path(agent_name: &str) -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".noesis")
        .join("agents")
        .join(agent_name)
        .join("store.db")
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_runs_migrations() {
        let store = Store::open_memory().unwrap();
        let conn = store.conn.lock().unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_with_transaction_rolls_back_on_error() {
        let store = Store::open_memory().unwrap();
        let result: Result<()> = store.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO thought (content, summary, category, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params!["x", "x", "x", now_ms()],
            )?;
            anyhow::bail!("forced failure");
        });
        assert!(result.is_err());

        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM thought", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_resolve_store_path_includes_agent_name() {
        let path = resolve_store_path("myagent");
        assert!(path.to_string_lossy().contains("myagent"));
        assert!(path.ends_with("store.db"));
    }
}
