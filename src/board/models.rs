use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Board column a task sits in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Todo,
    Developing,
    Review,
    Complete,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        Self::Backlog,
        Self::Todo,
        Self::Developing,
        Self::Review,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Todo => "todo",
            Self::Developing => "developing",
            Self::Review => "review",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "todo" => Ok(Self::Todo),
            "developing" => Ok(Self::Developing),
            "review" => Ok(Self::Review),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Invalid column: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub position: i64,
    pub archived: bool,
    pub assignee: Option<String>,
    /// Bumped by every successful store update; used for compare-and-swap.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        title: impl Into<String>,
        status: TaskStatus,
        position: i64,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            title: title.into(),
            status,
            position,
            archived: false,
            assignee: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub member_ids: Vec<String>,
    pub is_private: bool,
}

impl Project {
    /// Owners and members always have access; anyone has access to a public project.
    pub fn has_access(&self, user_id: &str) -> bool {
        self.owner_id == user_id
            || self.member_ids.iter().any(|m| m == user_id)
            || !self.is_private
    }
}

/// Work-in-progress limits for one (project, column).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WipLimits {
    pub soft_limit: u32,
    pub hard_limit: u32,
    pub enabled: bool,
}

impl WipLimits {
    pub const fn new(soft_limit: u32, hard_limit: u32, enabled: bool) -> Self {
        Self {
            soft_limit,
            hard_limit,
            enabled,
        }
    }

    /// Column-type defaults used when a project has not configured its own.
    pub fn defaults_for(column: TaskStatus) -> Self {
        match column {
            TaskStatus::Backlog | TaskStatus::Complete => Self::new(0, 0, false),
            TaskStatus::Todo => Self::new(10, 20, false),
            TaskStatus::Developing => Self::new(3, 5, true),
            TaskStatus::Review => Self::new(2, 4, true),
        }
    }

    /// Returns a message describing the first broken rule, if any.
    pub fn check(&self) -> Result<(), String> {
        if self.hard_limit > 0 && self.soft_limit > self.hard_limit {
            return Err(format!(
                "soft limit {} exceeds hard limit {}",
                self.soft_limit, self.hard_limit
            ));
        }
        Ok(())
    }
}

/// Which column changes a move may perform.
///
/// Staying in the same column is always legal; that is a reorder.
#[derive(Debug, Clone)]
pub struct TransitionPolicy {
    allowed: HashMap<TaskStatus, Vec<TaskStatus>>,
}

impl TransitionPolicy {
    pub fn from_pairs(pairs: &[(TaskStatus, TaskStatus)]) -> Self {
        let mut allowed: HashMap<TaskStatus, Vec<TaskStatus>> = HashMap::new();
        for (from, to) in pairs {
            allowed.entry(*from).or_default().push(*to);
        }
        Self { allowed }
    }

    /// Every column change is legal.
    pub fn permissive() -> Self {
        let mut pairs = Vec::new();
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                pairs.push((from, to));
            }
        }
        Self::from_pairs(&pairs)
    }

    pub fn allows(&self, from: TaskStatus, to: TaskStatus) -> bool {
        from == to
            || self
                .allowed
                .get(&from)
                .is_some_and(|targets| targets.contains(&to))
    }
}

impl Default for TransitionPolicy {
    /// Cards advance one column at a time, may step back one column, and may
    /// always be returned to the backlog.
    fn default() -> Self {
        use TaskStatus::*;
        Self::from_pairs(&[
            (Backlog, Todo),
            (Todo, Backlog),
            (Todo, Developing),
            (Developing, Todo),
            (Developing, Review),
            (Developing, Backlog),
            (Review, Developing),
            (Review, Complete),
            (Review, Backlog),
            (Complete, Review),
            (Complete, Backlog),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Position,
    UpdatedAt,
    Title,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Query shape for `TaskStore::get_by_project`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub statuses: Vec<TaskStatus>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TaskFilter {
    /// All tasks in one column, ascending by position.
    pub fn column(status: TaskStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&task.status)
    }

    /// Sort and page an already status-filtered list in place.
    pub fn apply(&self, tasks: &mut Vec<Task>) {
        match self.sort_by {
            SortField::Position => {
                tasks.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)))
            }
            SortField::UpdatedAt => tasks.sort_by_key(|t| t.updated_at),
            SortField::Title => tasks.sort_by(|a, b| a.title.cmp(&b.title)),
        }
        if self.sort_order == SortOrder::Desc {
            tasks.reverse();
        }
        let end = self
            .limit
            .map_or(tasks.len(), |limit| (self.offset + limit).min(tasks.len()));
        let start = self.offset.min(end);
        tasks.truncate(end);
        tasks.drain(..start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_round_trips_through_str() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(TaskStatus::from_str("done").is_err());
    }

    #[test]
    fn test_project_access() {
        let project = Project {
            id: "p1".into(),
            name: "Board".into(),
            owner_id: "owner".into(),
            member_ids: vec!["member".into()],
            is_private: true,
        };
        assert!(project.has_access("owner"));
        assert!(project.has_access("member"));
        assert!(!project.has_access("stranger"));

        let public = Project {
            is_private: false,
            ..project
        };
        assert!(public.has_access("stranger"));
    }

    #[test]
    fn test_wip_defaults_by_column() {
        assert!(WipLimits::defaults_for(TaskStatus::Developing).enabled);
        assert!(WipLimits::defaults_for(TaskStatus::Review).enabled);
        assert!(!WipLimits::defaults_for(TaskStatus::Backlog).enabled);
        assert!(!WipLimits::defaults_for(TaskStatus::Complete).enabled);
        for status in TaskStatus::ALL {
            assert!(WipLimits::defaults_for(status).check().is_ok());
        }
    }

    #[test]
    fn test_wip_limits_check() {
        assert!(WipLimits::new(5, 3, true).check().is_err());
        assert!(WipLimits::new(5, 0, true).check().is_ok());
        assert!(WipLimits::new(3, 3, true).check().is_ok());
    }

    #[test]
    fn test_default_transitions() {
        let policy = TransitionPolicy::default();
        assert!(policy.allows(TaskStatus::Backlog, TaskStatus::Todo));
        assert!(policy.allows(TaskStatus::Review, TaskStatus::Complete));
        assert!(policy.allows(TaskStatus::Developing, TaskStatus::Developing));
        assert!(!policy.allows(TaskStatus::Backlog, TaskStatus::Complete));
        assert!(!policy.allows(TaskStatus::Backlog, TaskStatus::Developing));
    }

    #[test]
    fn test_permissive_transitions() {
        let policy = TransitionPolicy::permissive();
        assert!(policy.allows(TaskStatus::Backlog, TaskStatus::Complete));
    }

    #[test]
    fn test_filter_sorts_and_pages() {
        let mut tasks = vec![
            Task::new("c", "p", "C", TaskStatus::Todo, 3000),
            Task::new("a", "p", "A", TaskStatus::Todo, 1000),
            Task::new("b", "p", "B", TaskStatus::Todo, 2000),
        ];
        let filter = TaskFilter {
            sort_order: SortOrder::Desc,
            limit: Some(2),
            offset: 1,
            ..TaskFilter::column(TaskStatus::Todo)
        };
        filter.apply(&mut tasks);
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
