//! Work-in-progress gate for board columns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::models::{TaskFilter, TaskStatus, WipLimits};
use super::store::{TaskStore, WipLimitStore};
use crate::errors::BoardError;

/// Why a column refused an incoming card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WipViolation {
    pub column: TaskStatus,
    pub current_count: u32,
    pub soft_limit: u32,
    pub hard_limit: u32,
    /// Soft limits are meant to be overridable; hard limits never are.
    pub override_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WipDecision {
    Ok,
    SoftViolation(WipViolation),
    HardViolation(WipViolation),
}

impl WipDecision {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Turn a violation into the matching error.
    pub fn into_result(self) -> Result<(), BoardError> {
        match self {
            Self::Ok => Ok(()),
            Self::SoftViolation(v) => Err(BoardError::SoftWipLimit(v)),
            Self::HardViolation(v) => Err(BoardError::HardWipLimit(v)),
        }
    }
}

#[derive(Clone)]
pub struct WipGate {
    limits: Arc<dyn WipLimitStore>,
    tasks: Arc<dyn TaskStore>,
}

impl WipGate {
    pub fn new(limits: Arc<dyn WipLimitStore>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { limits, tasks }
    }

    /// Configured limits, or the column-type defaults.
    pub async fn limits_for(
        &self,
        project_id: &str,
        column: TaskStatus,
    ) -> Result<WipLimits, BoardError> {
        Ok(self
            .limits
            .get_limits(project_id, column)
            .await?
            .unwrap_or_else(|| WipLimits::defaults_for(column)))
    }

    pub async fn set_limits(
        &self,
        project_id: &str,
        column: TaskStatus,
        limits: WipLimits,
    ) -> Result<(), BoardError> {
        limits.check().map_err(BoardError::Validation)?;
        self.limits.set_limits(project_id, column, limits).await?;
        tracing::info!(
            project_id,
            column = %column,
            soft_limit = limits.soft_limit,
            hard_limit = limits.hard_limit,
            enabled = limits.enabled,
            "Updated WIP limits"
        );
        Ok(())
    }

    /// Whether one more card may land in `column`.
    pub async fn validate(
        &self,
        project_id: &str,
        column: TaskStatus,
    ) -> Result<WipDecision, BoardError> {
        let limits = self.limits_for(project_id, column).await?;
        if !limits.enabled {
            return Ok(WipDecision::Ok);
        }

        let count = self
            .tasks
            .get_by_project(project_id, &TaskFilter::column(column))
            .await?
            .iter()
            .filter(|t| !t.archived)
            .count() as u32;

        let violation = |override_available| WipViolation {
            column,
            current_count: count,
            soft_limit: limits.soft_limit,
            hard_limit: limits.hard_limit,
            override_available,
        };

        if limits.hard_limit > 0 && count >= limits.hard_limit {
            return Ok(WipDecision::HardViolation(violation(false)));
        }
        if limits.soft_limit > 0 && count >= limits.soft_limit {
            return Ok(WipDecision::SoftViolation(violation(true)));
        }
        Ok(WipDecision::Ok)
    }

    /// `validate`, with violations surfaced as errors.
    pub async fn enforce(&self, project_id: &str, column: TaskStatus) -> Result<(), BoardError> {
        self.validate(project_id, column).await?.into_result()
    }
}
