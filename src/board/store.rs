//! Store traits the board core consumes, plus an in-memory implementation.
//!
//! The core never sees how tasks or projects are persisted. `MemoryStore`
//! backs tests and embedding; `db::DbHandle` backs the server.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::models::{Project, Task, TaskFilter, TaskStatus, WipLimits};
use crate::errors::BoardError;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<Task>, BoardError>;

    /// Compare-and-swap on `task.version`: succeeds only if the stored row
    /// still has that version, and returns the row with the bumped version.
    async fn update(&self, task: &Task) -> Result<Task, BoardError>;

    async fn get_by_project(
        &self,
        project_id: &str,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, BoardError>;

    async fn count_by_project(&self, project_id: &str) -> Result<usize, BoardError>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<Project>, BoardError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn exists(&self, user_id: &str) -> Result<bool, BoardError>;
}

#[async_trait]
pub trait WipLimitStore: Send + Sync {
    async fn get_limits(
        &self,
        project_id: &str,
        column: TaskStatus,
    ) -> Result<Option<WipLimits>, BoardError>;

    async fn set_limits(
        &self,
        project_id: &str,
        column: TaskStatus,
        limits: WipLimits,
    ) -> Result<(), BoardError>;
}

/// Shared handles to every store the core needs.
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub users: Arc<dyn UserStore>,
    pub wip: Arc<dyn WipLimitStore>,
}

impl Stores {
    /// All four roles served by one value.
    pub fn from_single<S>(store: Arc<S>) -> Self
    where
        S: TaskStore + ProjectStore + UserStore + WipLimitStore + 'static,
    {
        Self {
            tasks: store.clone(),
            projects: store.clone(),
            users: store.clone(),
            wip: store,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<String, Task>,
    projects: HashMap<String, Project>,
    users: HashSet<String>,
    wip: HashMap<(String, TaskStatus), WipLimits>,
}

/// In-memory store for all four roles.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user_id: impl Into<String>) {
        self.state.write().await.users.insert(user_id.into());
    }

    pub async fn add_project(&self, project: Project) {
        self.state
            .write()
            .await
            .projects
            .insert(project.id.clone(), project);
    }

    /// Insert or replace a task verbatim (no version check).
    pub async fn put_task(&self, task: Task) {
        self.state.write().await.tasks.insert(task.id.clone(), task);
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<Task>, BoardError> {
        Ok(self.state.read().await.tasks.get(id).cloned())
    }

    async fn update(&self, task: &Task) -> Result<Task, BoardError> {
        let mut state = self.state.write().await;
        let stored = state
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| BoardError::TaskNotFound {
                id: task.id.clone(),
            })?;
        if stored.version != task.version {
            return Err(BoardError::VersionConflict {
                task_id: task.id.clone(),
            });
        }
        let mut updated = task.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn get_by_project(
        &self,
        project_id: &str,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, BoardError> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.project_id == project_id && filter.matches(t))
            .cloned()
            .collect();
        filter.apply(&mut tasks);
        Ok(tasks)
    }

    async fn count_by_project(&self, project_id: &str) -> Result<usize, BoardError> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.project_id == project_id)
            .count())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<Project>, BoardError> {
        Ok(self.state.read().await.projects.get(id).cloned())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn exists(&self, user_id: &str) -> Result<bool, BoardError> {
        Ok(self.state.read().await.users.contains(user_id))
    }
}

#[async_trait]
impl WipLimitStore for MemoryStore {
    async fn get_limits(
        &self,
        project_id: &str,
        column: TaskStatus,
    ) -> Result<Option<WipLimits>, BoardError> {
        let state = self.state.read().await;
        Ok(state.wip.get(&(project_id.to_string(), column)).copied())
    }

    async fn set_limits(
        &self,
        project_id: &str,
        column: TaskStatus,
        limits: WipLimits,
    ) -> Result<(), BoardError> {
        self.state
            .write()
            .await
            .wip
            .insert((project_id.to_string(), column), limits);
        Ok(())
    }
}
