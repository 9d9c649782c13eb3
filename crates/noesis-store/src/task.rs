use anyhow::{bail, Result};
use rusqlite::{params, OptionalExtension};

use crate::store::{now_ms, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Stuck,
}

impl TaskStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Stuck => "stuck",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "stuck" => TaskStatus::Stuck,
            _ => TaskStatus::Running,
        }
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub session_id: String,
    pub description: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub iterations: i64,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl Store {
    /// Create a Task row with status=running (§4.6 step 1).
    pub fn task_create(&self, session_id: &str, description: &str) -> Result<i64> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO task (session_id, description, status, iterations, created_at)
             VALUES (?1, ?2, 'running', 0, ?3)",
            params![session_id, description, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Monotonically increments `iterations`.
    pub fn task_increment_iteration(&self, task_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE task SET iterations = iterations + 1 WHERE id = ?1",
            params![task_id],
        )?;
        let iterations: i64 =
            conn.query_row("SELECT iterations FROM task WHERE id = ?1", params![task_id], |r| r.get(0))?;
        Ok(iterations)
    }

    /// Set a terminal status exactly once. Errors if the task is already terminal,
    /// enforcing the §3/§8 invariant "terminal task status is immutable once set".
    pub fn task_finish(&self, task_id: i64, status: TaskStatus, result: Option<&str>) -> Result<()> {
        if !status.is_terminal() {
            bail!("task_finish called with a non-terminal status");
        }
        let conn = self.conn.lock().unwrap();
        let current: Option<String> = conn
            .query_row("SELECT status FROM task WHERE id = ?1", params![task_id], |r| r.get(0))
            .optional()?;
        let Some(current) = current else {
            bail!("task {task_id} not found");
        };
        if TaskStatus::parse(&current).is_terminal() {
            bail!("task {task_id} already has terminal status {current}");
        }
        conn.execute(
            "UPDATE task SET status = ?1, result = ?2, completed_at = ?3 WHERE id = ?4",
            params![status.as_str(), result, now_ms(), task_id],
        )?;
        Ok(())
    }

    pub fn task_get(&self, task_id: i64) -> Result<Option<TaskRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, session_id, description, status, result, iterations, created_at, completed_at
             FROM task WHERE id = ?1",
            params![task_id],
            row_to_task,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Last `limit` tasks for a session, most recent first.
    pub fn task_recent(&self, session_id: &str, limit: usize) -> Result<Vec<TaskRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, description, status, result, iterations, created_at, completed_at
             FROM task WHERE session_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![session_id, limit as i64], row_to_task)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Last `limit` tasks across all sessions, most recent first. Used by the
    /// timeline view (§3) and by the context assembler's "Background Activity"
    /// block (§4.5) when scoped to the autonomous session.
    pub fn task_recent_any_session(&self, limit: usize) -> Result<Vec<TaskRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, description, status, result, iterations, created_at, completed_at
             FROM task ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_task)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<TaskRow> {
    let status: String = row.get(3)?;
    Ok(TaskRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        description: row.get(2)?,
        status: TaskStatus::parse(&status),
        result: row.get(4)?,
        iterations: row.get(5)?,
        created_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_finish() {
        let store = Store::open_memory().unwrap();
        let id = store.task_create("sess-1", "do a thing").unwrap();
        let task = store.task_get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);

        store.task_finish(id, TaskStatus::Completed, Some("done")).unwrap();
        let task = store.task_get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("done"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_terminal_status_is_immutable() {
        let store = Store::open_memory().unwrap();
        let id = store.task_create("sess-1", "x").unwrap();
        store.task_finish(id, TaskStatus::Completed, None).unwrap();
        let second = store.task_finish(id, TaskStatus::Failed, Some("oops"));
        assert!(second.is_err());
    }

    #[test]
    fn test_iteration_increments_monotonically() {
        let store = Store::open_memory().unwrap();
        let id = store.task_create("sess-1", "x").unwrap();
        assert_eq!(store.task_increment_iteration(id).unwrap(), 1);
        assert_eq!(store.task_increment_iteration(id).unwrap(), 2);
    }

    #[test]
    fn test_recent_tasks_ordered_desc() {
        let store = Store::open_memory().unwrap();
        store.task_create("sess-1", "first").unwrap();
        store.task_create("sess-1", "second").unwrap();
        let recent = store.task_recent("sess-1", 5).unwrap();
        assert_eq!(recent[0].description, "second");
        assert_eq!(recent[1].description, "first");
    }
}
