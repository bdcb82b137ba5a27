//! Workflow step instances.

use chrono::{DateTime, Utc};
use closing_core::{ActorId, PeriodId, StepCategory, StepId, StepKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::template::StepTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    RequiresApproval,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::RequiresApproval => "requires_approval",
        }
    }

    /// Completed and Failed are entered at most once; Skipped is an
    /// explicit operator decision. None of the three can be left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step instance, owned by exactly one closure period and
/// materialized from exactly one step template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub period_id: PeriodId,
    /// Code of the originating step template; unique within the period.
    pub code: String,
    pub name: String,
    pub order: u32,
    pub category: StepCategory,
    pub kind: StepKind,
    pub dependencies: HashSet<String>,
    pub mandatory: bool,
    pub auto_executable: bool,
    pub status: StepStatus,
    pub assigned_to: Option<ActorId>,
    pub scheduled_start: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    /// Structured payload produced by the handler.
    pub result_data: Option<serde_json::Value>,
    pub controls_passed: u32,
    pub controls_failed: u32,
    pub error_message: Option<String>,
}

impl WorkflowStep {
    pub fn from_template(
        period_id: PeriodId,
        template: &StepTemplate,
        scheduled_start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: StepId::new(),
            period_id,
            code: template.code.clone(),
            name: template.name.clone(),
            order: template.order,
            category: template.category,
            kind: template.kind,
            dependencies: template.dependencies.clone(),
            mandatory: template.mandatory,
            auto_executable: template.auto_executable,
            status: StepStatus::Pending,
            assigned_to: template.default_assignee.clone(),
            scheduled_start,
            actual_start: None,
            actual_end: None,
            result_data: None,
            controls_passed: 0,
            controls_failed: 0,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
