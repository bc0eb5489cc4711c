//! Typed error hierarchy for cardflow.
//!
//! Two enums cover the two failure surfaces:
//! - `BoardError`: everything a caller of the board core can observe
//! - `SinkError`: external push-sink delivery failures (only ever logged)
//!
//! `BoardError::kind()` folds the concrete variants into the five classes the
//! HTTP layer and callers reason about.

use serde::Serialize;
use thiserror::Error;

use crate::board::models::TaskStatus;
use crate::board::wip::WipViolation;

/// Coarse classification of a [`BoardError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request or a rule the caller can correct (soft WIP limit).
    Validation,
    NotFound,
    /// Caller lacks access to the project.
    Authorization,
    /// Hard WIP limit, illegal transition, collision or concurrent modification.
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Authorization => "authorization",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }
}

/// Errors from the board core: positioning, WIP gating, moves and events.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Task {id} not found")]
    TaskNotFound { id: String },

    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("User {id} not found")]
    UserNotFound { id: String },

    #[error("Subscription {id} not found")]
    SubscriptionNotFound { id: String },

    #[error("Reference task {id} not found in column")]
    ReferenceNotFound { id: String },

    #[error("User {user_id} has no access to project {project_id}")]
    AccessDenied { user_id: String, project_id: String },

    #[error(
        "WIP soft limit reached in '{}': {} of {} cards",
        .0.column, .0.current_count, .0.soft_limit
    )]
    SoftWipLimit(WipViolation),

    #[error(
        "WIP hard limit reached in '{}': {} of {} cards",
        .0.column, .0.current_count, .0.hard_limit
    )]
    HardWipLimit(WipViolation),

    #[error("Cannot move a task from '{from}' to '{to}'")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },

    #[error("Position {position} is already taken in this column")]
    PositionConflict { position: i64 },

    #[error("Task {task_id} was modified concurrently")]
    VersionConflict { task_id: String },

    #[error("User {user_id} already has {limit} active subscriptions")]
    SubscriptionLimit { user_id: String, limit: usize },

    #[error("Event queue full after waiting {waited_ms}ms")]
    QueueFull { waited_ms: u64 },

    #[error("Event dispatcher has been stopped")]
    DispatcherStopped,

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BoardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::SoftWipLimit(_) | Self::ReferenceNotFound { .. } => {
                ErrorKind::Validation
            }
            Self::TaskNotFound { .. }
            | Self::ProjectNotFound { .. }
            | Self::UserNotFound { .. }
            | Self::SubscriptionNotFound { .. } => ErrorKind::NotFound,
            Self::AccessDenied { .. } => ErrorKind::Authorization,
            Self::HardWipLimit(_)
            | Self::IllegalTransition { .. }
            | Self::PositionConflict { .. }
            | Self::VersionConflict { .. }
            | Self::SubscriptionLimit { .. } => ErrorKind::Conflict,
            Self::QueueFull { .. }
            | Self::DispatcherStopped
            | Self::Database(_)
            | Self::LockPoisoned
            | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Structured WIP metadata for soft and hard violations.
    pub fn wip_violation(&self) -> Option<&WipViolation> {
        match self {
            Self::SoftWipLimit(v) | Self::HardWipLimit(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Errors from an external push sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("No connected receivers")]
    NoReceivers,

    #[error("Sink '{sink}' rejected message: {message}")]
    Rejected { sink: String, message: String },
}
