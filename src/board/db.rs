//! SQLite persistence for the board.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use uuid::Uuid;

use super::models::{Project, Task, TaskFilter, TaskStatus, WipLimits};
use super::store::{ProjectStore, TaskStore, UserStore, WipLimitStore};
use crate::errors::BoardError;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs every access on tokio's
/// blocking pool so SQLite I/O never stalls async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup seeding and
    /// tests only; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>, BoardError> {
        self.inner.lock().map_err(|_| BoardError::LockPoisoned)
    }
}

/// Result of a versioned task write.
#[derive(Debug)]
pub enum VersionedWrite {
    Written(Task),
    /// The stored version no longer matches.
    Stale,
    Missing,
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    owner_id TEXT NOT NULL REFERENCES users(id),
                    is_private INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS project_members (
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    PRIMARY KEY (project_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'backlog',
                    position INTEGER NOT NULL,
                    archived INTEGER NOT NULL DEFAULT 0,
                    assignee TEXT,
                    version INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS wip_limits (
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    column_name TEXT NOT NULL,
                    soft_limit INTEGER NOT NULL,
                    hard_limit INTEGER NOT NULL,
                    enabled INTEGER NOT NULL,
                    PRIMARY KEY (project_id, column_name)
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_column ON tasks(project_id, status, position);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, id: &str, name: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (id, name) VALUES (?1, ?2)",
                params![id, name],
            )
            .context("Failed to insert user")?;
        Ok(())
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .context("Failed to look up user")
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn create_project(
        &self,
        id: &str,
        name: &str,
        owner_id: &str,
        is_private: bool,
    ) -> Result<Project> {
        self.conn
            .execute(
                "INSERT INTO projects (id, name, owner_id, is_private) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, owner_id, is_private],
            )
            .context("Failed to insert project")?;
        self.get_project(id)?
            .context("Project not found after insert")
    }

    pub fn add_member(&self, project_id: &str, user_id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO project_members (project_id, user_id) VALUES (?1, ?2)",
                params![project_id, user_id],
            )
            .context("Failed to add project member")?;
        Ok(())
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, owner_id, is_private FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query project")?;
        let Some((id, name, owner_id, is_private)) = row else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM project_members WHERE project_id = ?1 ORDER BY user_id")
            .context("Failed to prepare member query")?;
        let member_ids = stmt
            .query_map(params![id], |row| row.get(0))
            .context("Failed to query members")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read member row")?;

        Ok(Some(Project {
            id,
            name,
            owner_id,
            member_ids,
            is_private,
        }))
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn create_task(
        &self,
        project_id: &str,
        title: &str,
        status: TaskStatus,
        position: i64,
    ) -> Result<Task> {
        let task = Task::new(Uuid::new_v4().to_string(), project_id, title, status, position);
        self.insert_task(&task)?;
        Ok(task)
    }

    pub fn insert_task(&self, task: &Task) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tasks (id, project_id, title, status, position, archived, assignee, version, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    task.id,
                    task.project_id,
                    task.title,
                    task.status.as_str(),
                    task.position,
                    task.archived,
                    task.assignee,
                    task.version as i64,
                    task.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert task")?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, project_id, title, status, position, archived, assignee, version, updated_at
                 FROM tasks WHERE id = ?1",
                params![id],
                TaskRow::from_row,
            )
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    /// Tasks in `project_id` ordered by position. An empty `statuses` slice
    /// means every column.
    pub fn list_tasks(&self, project_id: &str, statuses: &[TaskStatus]) -> Result<Vec<Task>> {
        let mut sql = String::from(
            "SELECT id, project_id, title, status, position, archived, assignee, version, updated_at
             FROM tasks WHERE project_id = ?1",
        );
        if !statuses.is_empty() {
            let placeholders: Vec<String> =
                (0..statuses.len()).map(|i| format!("?{}", i + 2)).collect();
            sql.push_str(&format!(" AND status IN ({})", placeholders.join(", ")));
        }
        sql.push_str(" ORDER BY position, id");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_tasks")?;
        let args = std::iter::once(project_id).chain(statuses.iter().map(|s| s.as_str()));
        let rows = stmt
            .query_map(params_from_iter(args), TaskRow::from_row)
            .context("Failed to query tasks")?;
        rows.map(|row| row.context("Failed to read task row")?.into_task())
            .collect()
    }

    pub fn count_tasks(&self, project_id: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .context("Failed to count tasks")?;
        Ok(count as usize)
    }

    /// Write `task` only if the stored row still has `task.version`.
    pub fn update_task_versioned(&self, task: &Task) -> Result<VersionedWrite> {
        let next = task.version + 1;
        let now = Utc::now();
        let changed = self
            .conn
            .execute(
                "UPDATE tasks
                 SET title = ?1, status = ?2, position = ?3, archived = ?4, assignee = ?5,
                     version = ?6, updated_at = ?7
                 WHERE id = ?8 AND version = ?9",
                params![
                    task.title,
                    task.status.as_str(),
                    task.position,
                    task.archived,
                    task.assignee,
                    next as i64,
                    now.to_rfc3339(),
                    task.id,
                    task.version as i64,
                ],
            )
            .context("Failed to update task")?;
        if changed == 1 {
            let mut written = task.clone();
            written.version = next;
            written.updated_at = now;
            return Ok(VersionedWrite::Written(written));
        }
        let exists: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM tasks WHERE id = ?1",
                params![task.id],
                |row| row.get(0),
            )
            .context("Failed to check task existence")?;
        Ok(if exists {
            VersionedWrite::Stale
        } else {
            VersionedWrite::Missing
        })
    }

    // ── WIP limits ────────────────────────────────────────────────────

    pub fn get_wip_limits(&self, project_id: &str, column: TaskStatus) -> Result<Option<WipLimits>> {
        self.conn
            .query_row(
                "SELECT soft_limit, hard_limit, enabled FROM wip_limits
                 WHERE project_id = ?1 AND column_name = ?2",
                params![project_id, column.as_str()],
                |row| Ok(WipLimits::new(row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("Failed to query WIP limits")
    }

    pub fn set_wip_limits(
        &self,
        project_id: &str,
        column: TaskStatus,
        limits: &WipLimits,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO wip_limits (project_id, column_name, soft_limit, hard_limit, enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(project_id, column_name) DO UPDATE SET
                    soft_limit = excluded.soft_limit,
                    hard_limit = excluded.hard_limit,
                    enabled = excluded.enabled",
                params![
                    project_id,
                    column.as_str(),
                    limits.soft_limit,
                    limits.hard_limit,
                    limits.enabled
                ],
            )
            .context("Failed to store WIP limits")?;
        Ok(())
    }
}

struct TaskRow {
    id: String,
    project_id: String,
    title: String,
    status: String,
    position: i64,
    archived: bool,
    assignee: Option<String>,
    version: i64,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            status: row.get(3)?,
            position: row.get(4)?,
            archived: row.get(5)?,
            assignee: row.get(6)?,
            version: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let status = TaskStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task status")?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .context("Failed to parse task timestamp")?
            .with_timezone(&Utc);
        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            status,
            position: self.position,
            archived: self.archived,
            assignee: self.assignee,
            version: self.version as u64,
            updated_at,
        })
    }
}

// ── Store trait implementations ───────────────────────────────────────

#[async_trait]
impl TaskStore for DbHandle {
    async fn get_by_id(&self, id: &str) -> Result<Option<Task>, BoardError> {
        let id = id.to_string();
        self.call(move |db| db.get_task(&id))
            .await
            .map_err(BoardError::Database)
    }

    async fn update(&self, task: &Task) -> Result<Task, BoardError> {
        let owned = task.clone();
        let outcome = self
            .call(move |db| db.update_task_versioned(&owned))
            .await
            .map_err(BoardError::Database)?;
        match outcome {
            VersionedWrite::Written(task) => Ok(task),
            VersionedWrite::Stale => Err(BoardError::VersionConflict {
                task_id: task.id.clone(),
            }),
            VersionedWrite::Missing => Err(BoardError::TaskNotFound {
                id: task.id.clone(),
            }),
        }
    }

    async fn get_by_project(
        &self,
        project_id: &str,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, BoardError> {
        let project_id = project_id.to_string();
        let statuses = filter.statuses.clone();
        let mut tasks = self
            .call(move |db| db.list_tasks(&project_id, &statuses))
            .await
            .map_err(BoardError::Database)?;
        filter.apply(&mut tasks);
        Ok(tasks)
    }

    async fn count_by_project(&self, project_id: &str) -> Result<usize, BoardError> {
        let project_id = project_id.to_string();
        self.call(move |db| db.count_tasks(&project_id))
            .await
            .map_err(BoardError::Database)
    }
}

#[async_trait]
impl ProjectStore for DbHandle {
    async fn get_by_id(&self, id: &str) -> Result<Option<Project>, BoardError> {
        let id = id.to_string();
        self.call(move |db| db.get_project(&id))
            .await
            .map_err(BoardError::Database)
    }
}

#[async_trait]
impl UserStore for DbHandle {
    async fn exists(&self, user_id: &str) -> Result<bool, BoardError> {
        let user_id = user_id.to_string();
        self.call(move |db| db.user_exists(&user_id))
            .await
            .map_err(BoardError::Database)
    }
}

#[async_trait]
impl WipLimitStore for DbHandle {
    async fn get_limits(
        &self,
        project_id: &str,
        column: TaskStatus,
    ) -> Result<Option<WipLimits>, BoardError> {
        let project_id = project_id.to_string();
        self.call(move |db| db.get_wip_limits(&project_id, column))
            .await
            .map_err(BoardError::Database)
    }

    async fn set_limits(
        &self,
        project_id: &str,
        column: TaskStatus,
        limits: WipLimits,
    ) -> Result<(), BoardError> {
        let project_id = project_id.to_string();
        self.call(move |db| db.set_wip_limits(&project_id, column, &limits))
            .await
            .map_err(BoardError::Database)
    }
}
