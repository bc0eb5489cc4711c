//! Moving a card between (or within) columns.
//!
//! Every check runs before the single persistence call, so a rejected move
//! changes nothing. Rebalancing the destination column and publishing the
//! `moved` event happen afterwards and only log on failure: once the task row
//! is written, the move has succeeded.
//!
//! The write is a compare-and-swap on the task version. On a conflict the
//! task is re-read and every check runs again, up to `max_retries` times.
//! Two different cards can still land on the same position concurrently;
//! that collision is left for the next rebalance.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::models::{Task, TaskFilter, TaskStatus, TransitionPolicy};
use super::position::{Placement, PositionAllocator, PositionedItem};
use super::store::{ProjectStore, Stores, TaskStore};
use super::wip::WipGate;
use crate::config::MoveSettings;
use crate::errors::BoardError;
use crate::events::{EventData, EventDispatcher, TaskEvent};

/// Body of a move request. `new_position == 0` means "pick one for me".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    /// Filled from the URL path when the request comes over HTTP.
    #[serde(default)]
    pub task_id: String,
    pub project_id: String,
    pub new_status: String,
    #[serde(default)]
    pub new_position: i64,
    /// 0-based slot among the other cards in the target column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_task_id: Option<String>,
}

impl MoveRequest {
    pub fn new(
        task_id: impl Into<String>,
        project_id: impl Into<String>,
        status: TaskStatus,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            project_id: project_id.into(),
            new_status: status.to_string(),
            ..Self::default()
        }
    }

    pub fn at_position(mut self, position: i64) -> Self {
        self.new_position = position;
        self
    }

    pub fn at_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn after(mut self, task_id: impl Into<String>) -> Self {
        self.after_task_id = Some(task_id.into());
        self
    }

    pub fn before(mut self, task_id: impl Into<String>) -> Self {
        self.before_task_id = Some(task_id.into());
        self
    }

    /// Placement hint, by precedence: explicit position, index, neighbour
    /// references, append.
    pub fn placement(&self) -> Placement {
        if self.new_position != 0 {
            Placement::Exact {
                position: self.new_position,
            }
        } else if let Some(index) = self.index {
            Placement::AtIndex { index }
        } else if self.after_task_id.is_some() || self.before_task_id.is_some() {
            Placement::Between {
                after: self.after_task_id.clone(),
                before: self.before_task_id.clone(),
            }
        } else {
            Placement::Append
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    pub task: Task,
    pub from_status: TaskStatus,
    pub from_position: i64,
    /// Sibling cards respaced after the move.
    pub rebalanced: usize,
}

/// A successful write, before any rebalance.
struct Landed {
    task: Task,
    from_status: TaskStatus,
    from_position: i64,
    /// Index among the destination column's other cards.
    slot: usize,
}

pub struct MoveCoordinator {
    tasks: Arc<dyn TaskStore>,
    projects: Arc<dyn ProjectStore>,
    wip: WipGate,
    allocator: PositionAllocator,
    transitions: TransitionPolicy,
    dispatcher: Option<EventDispatcher>,
    max_retries: u32,
}

impl MoveCoordinator {
    pub fn new(stores: &Stores, allocator: PositionAllocator) -> Self {
        Self {
            tasks: stores.tasks.clone(),
            projects: stores.projects.clone(),
            wip: WipGate::new(stores.wip.clone(), stores.tasks.clone()),
            allocator,
            transitions: TransitionPolicy::default(),
            dispatcher: None,
            max_retries: MoveSettings::default().max_retries,
        }
    }

    pub fn with_transitions(mut self, transitions: TransitionPolicy) -> Self {
        self.transitions = transitions;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_settings(mut self, settings: MoveSettings) -> Self {
        self.max_retries = settings.max_retries;
        self
    }

    pub fn wip_gate(&self) -> &WipGate {
        &self.wip
    }

    pub fn allocator(&self) -> &PositionAllocator {
        &self.allocator
    }

    /// Move a task on behalf of `actor`.
    pub async fn move_task(
        &self,
        actor: &str,
        request: &MoveRequest,
    ) -> Result<MoveOutcome, BoardError> {
        let target = validate_request(actor, request)?;

        let mut attempt = 0;
        let Landed {
            task: moved,
            from_status,
            from_position,
            slot,
        } = loop {
            match self.try_move(actor, request, target).await {
                Err(BoardError::VersionConflict { task_id }) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(task_id = %task_id, attempt, "Task changed underneath move, retrying");
                }
                result => break result?,
            }
        };

        tracing::info!(
            task_id = %moved.id,
            project_id = %moved.project_id,
            from = %from_status,
            to = %moved.status,
            position = moved.position,
            "Moved task"
        );

        let (task, rebalanced) = self.rebalance_after_move(moved, slot).await;
        self.publish_moved(actor, &task, from_status, from_position)
            .await;

        Ok(MoveOutcome {
            task,
            from_status,
            from_position,
            rebalanced,
        })
    }

    /// One read-check-write pass.
    async fn try_move(
        &self,
        actor: &str,
        request: &MoveRequest,
        target: TaskStatus,
    ) -> Result<Landed, BoardError> {
        let task = self
            .tasks
            .get_by_id(&request.task_id)
            .await?
            .ok_or_else(|| BoardError::TaskNotFound {
                id: request.task_id.clone(),
            })?;

        let project = self
            .projects
            .get_by_id(&request.project_id)
            .await?
            .ok_or_else(|| BoardError::ProjectNotFound {
                id: request.project_id.clone(),
            })?;
        if !project.has_access(actor) {
            return Err(BoardError::AccessDenied {
                user_id: actor.to_string(),
                project_id: project.id,
            });
        }
        if task.project_id != project.id {
            return Err(BoardError::validation(format!(
                "task {} does not belong to project {}",
                task.id, project.id
            )));
        }

        // A reorder keeps the card in the column it is already counted in.
        if task.status != target {
            if !self.transitions.allows(task.status, target) {
                return Err(BoardError::IllegalTransition {
                    from: task.status,
                    to: target,
                });
            }
            self.wip.enforce(&project.id, target).await?;
        }

        let column: Vec<PositionedItem> = self
            .tasks
            .get_by_project(&project.id, &TaskFilter::column(target))
            .await?
            .into_iter()
            .map(|t| PositionedItem::new(t.id, t.position))
            .collect();
        let slot = self
            .allocator
            .calculate_slot(&column, &task.id, &request.placement())?;

        let (from_status, from_position) = (task.status, task.position);
        let mut next = task;
        next.status = target;
        next.position = slot.position;
        let written = self.tasks.update(&next).await?;
        Ok(Landed {
            task: written,
            from_status,
            from_position,
            slot: slot.index,
        })
    }

    /// Respace the destination column if it has run out of room. Returns the
    /// moved task as it stands afterwards and how many cards were rewritten.
    async fn rebalance_after_move(&self, moved: Task, slot: usize) -> (Task, usize) {
        match self
            .rebalance_column(&moved.project_id, moved.status, Some((&moved.id, slot)))
            .await
        {
            Ok(written) => {
                let count = written.len();
                let task = written
                    .into_iter()
                    .find(|t| t.id == moved.id)
                    .unwrap_or(moved);
                (task, count)
            }
            Err(e) => {
                tracing::warn!(
                    project_id = %moved.project_id,
                    column = %moved.status,
                    error = %e,
                    "Column rebalance failed"
                );
                (moved, 0)
            }
        }
    }

    /// Respace `column` if needed. `placed` pins a just-moved card to its
    /// intended slot among the others, since its stored position may tie
    /// with a neighbour and the store breaks ties by id.
    async fn rebalance_column(
        &self,
        project_id: &str,
        column: TaskStatus,
        placed: Option<(&str, usize)>,
    ) -> Result<Vec<Task>, BoardError> {
        let mut tasks = self
            .tasks
            .get_by_project(project_id, &TaskFilter::column(column))
            .await?;
        if let Some((id, slot)) = placed
            && let Some(at) = tasks.iter().position(|t| t.id == id)
        {
            let task = tasks.remove(at);
            tasks.insert(slot.min(tasks.len()), task);
        }
        let positions: Vec<i64> = tasks.iter().map(|t| t.position).collect();
        if !self.allocator.needs_rebalance(&positions) {
            return Ok(Vec::new());
        }

        let items: Vec<PositionedItem> = tasks
            .iter()
            .map(|t| PositionedItem::new(t.id.clone(), t.position))
            .collect();
        let mut written = Vec::new();
        for update in self.allocator.rebalance_column(&items) {
            let Some(task) = tasks.iter().find(|t| t.id == update.id) else {
                continue;
            };
            let mut task = task.clone();
            task.position = update.new_position;
            match self.tasks.update(&task).await {
                Ok(task) => written.push(task),
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Skipping rebalance of task");
                }
            }
        }
        tracing::info!(
            project_id,
            column = %column,
            rewritten = written.len(),
            "Rebalanced column"
        );
        Ok(written)
    }

    async fn publish_moved(
        &self,
        actor: &str,
        task: &Task,
        from_status: TaskStatus,
        from_position: i64,
    ) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        let event = TaskEvent::new(
            task.id.clone(),
            task.project_id.clone(),
            actor,
            EventData::Moved {
                old_status: from_status,
                new_status: task.status,
                old_position: from_position,
                new_position: task.position,
            },
        );
        if let Err(e) = dispatcher.publish(event).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to publish move event");
        }
    }
}

fn validate_request(actor: &str, request: &MoveRequest) -> Result<TaskStatus, BoardError> {
    if actor.trim().is_empty() {
        return Err(BoardError::validation("acting user is required"));
    }
    if request.task_id.trim().is_empty() {
        return Err(BoardError::validation("taskId is required"));
    }
    if request.project_id.trim().is_empty() {
        return Err(BoardError::validation("projectId is required"));
    }
    if request.new_position < 0 {
        return Err(BoardError::validation("newPosition must not be negative"));
    }
    TaskStatus::from_str(&request.new_status).map_err(BoardError::Validation)
}
