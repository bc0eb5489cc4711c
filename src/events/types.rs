use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::board::models::TaskStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Moved,
    Assigned,
    Deleted,
    Commented,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Moved => "moved",
            Self::Assigned => "assigned",
            Self::Deleted => "deleted",
            Self::Commented => "commented",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "moved" => Ok(Self::Moved),
            "assigned" => Ok(Self::Assigned),
            "deleted" => Ok(Self::Deleted),
            "commented" => Ok(Self::Commented),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }
}

/// Per-type event payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventData {
    Created {
        title: String,
        status: TaskStatus,
        position: i64,
    },
    Updated {
        changes: HashMap<String, serde_json::Value>,
    },
    Moved {
        old_status: TaskStatus,
        new_status: TaskStatus,
        old_position: i64,
        new_position: i64,
    },
    Assigned {
        old_assignee: Option<String>,
        new_assignee: Option<String>,
    },
    Deleted {
        title: String,
    },
    Commented {
        comment_id: String,
        author_id: String,
    },
}

impl EventData {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Created { .. } => EventType::Created,
            Self::Updated { .. } => EventType::Updated,
            Self::Moved { .. } => EventType::Moved,
            Self::Assigned { .. } => EventType::Assigned,
            Self::Deleted { .. } => EventType::Deleted,
            Self::Commented { .. } => EventType::Commented,
        }
    }
}

/// An immutable description of one task mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub task_id: String,
    pub project_id: String,
    /// The actor.
    pub user_id: String,
    #[serde(flatten)]
    pub data: EventData,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(
        task_id: impl Into<String>,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        data: EventData,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: data.event_type(),
            task_id: task_id.into(),
            project_id: project_id.into(),
            user_id: user_id.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Value of a filterable attribute, if this event carries it.
    ///
    /// Keys: `task_id`, `project_id`, `user_id`, `status` (the column the
    /// task ends up in), `old_status`, `assignee`, `author_id`.
    pub fn attribute(&self, key: &str) -> Option<String> {
        match key {
            "task_id" => return Some(self.task_id.clone()),
            "project_id" => return Some(self.project_id.clone()),
            "user_id" => return Some(self.user_id.clone()),
            _ => {}
        }
        match (&self.data, key) {
            (EventData::Created { status, .. }, "status") => Some(status.to_string()),
            (EventData::Moved { new_status, .. }, "status") => Some(new_status.to_string()),
            (EventData::Moved { old_status, .. }, "old_status") => Some(old_status.to_string()),
            (EventData::Assigned { new_assignee, .. }, "assignee") => new_assignee.clone(),
            (EventData::Commented { author_id, .. }, "author_id") => Some(author_id.clone()),
            (EventData::Updated { changes }, key) => changes.get(key).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            _ => None,
        }
    }

    /// Every filter pair must be answered by this event with an equal value.
    pub fn satisfies(&self, filters: &HashMap<String, String>) -> bool {
        filters
            .iter()
            .all(|(key, expected)| self.attribute(key).as_deref() == Some(expected.as_str()))
    }
}

/// A standing registration for task events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    /// `None` means every project the user can access.
    pub project_id: Option<String>,
    pub event_types: BTreeSet<EventType>,
    pub filters: HashMap<String, String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Last delivery, or creation time if nothing has been delivered yet.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_activity.unwrap_or(self.created_at)
    }

    pub fn matches(&self, event: &TaskEvent) -> bool {
        self.active
            && self
                .project_id
                .as_ref()
                .is_none_or(|p| *p == event.project_id)
            && self.event_types.contains(&event.event_type)
            && event.satisfies(&self.filters)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub user_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub event_types: Vec<EventType>,
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPatch {
    #[serde(default)]
    pub event_types: Option<Vec<EventType>>,
    #[serde(default)]
    pub filters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub active: Option<bool>,
}
