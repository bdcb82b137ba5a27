//! Closure periods: one live run of a closing workflow.

use chrono::{DateTime, Utc};
use closing_core::{PeriodAttributes, PeriodId, TemplateId};
use serde::{Deserialize, Serialize};

/// Lifecycle of a closure period. Transitions are strictly forward; the
/// only sanctioned return is the audited unlock (Locked back to
/// InProgress), which is not part of [`PeriodStatus::permits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Open,
    InProgress,
    PendingApproval,
    Approved,
    Closed,
    Locked,
    Error,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Open => "open",
            PeriodStatus::InProgress => "in_progress",
            PeriodStatus::PendingApproval => "pending_approval",
            PeriodStatus::Approved => "approved",
            PeriodStatus::Closed => "closed",
            PeriodStatus::Locked => "locked",
            PeriodStatus::Error => "error",
        }
    }

    /// Forward transition table.
    pub fn permits(&self, next: PeriodStatus) -> bool {
        use PeriodStatus::*;
        matches!(
            (self, next),
            (Open, InProgress)
                | (InProgress, PendingApproval)
                | (InProgress, Error)
                | (PendingApproval, Approved)
                | (Approved, Closed)
                | (Closed, Locked)
        )
    }

    /// Statuses in which step execution is still permitted. Optional
    /// steps may finish while the period awaits approval, and unrelated
    /// branches keep progressing after a mandatory failure.
    pub fn accepts_step_execution(&self) -> bool {
        matches!(
            self,
            PeriodStatus::InProgress | PeriodStatus::PendingApproval | PeriodStatus::Error
        )
    }
}

impl std::fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate state of one closure period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosurePeriod {
    pub id: PeriodId,
    pub template_id: TemplateId,
    /// Human label, e.g. "2026-07".
    pub name: String,
    pub attributes: PeriodAttributes,
    pub status: PeriodStatus,
    /// Completed steps over materialized steps, in percent.
    pub completion_percentage: f64,
    /// Weighted compliance measure, set when the period first reaches
    /// pending approval.
    pub compliance_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl ClosurePeriod {
    pub fn new(template_id: TemplateId, name: impl Into<String>, attributes: PeriodAttributes) -> Self {
        Self {
            id: PeriodId::new(),
            template_id,
            name: name.into(),
            attributes,
            status: PeriodStatus::Open,
            completion_percentage: 0.0,
            compliance_score: None,
            created_at: Utc::now(),
            started_at: None,
            closed_at: None,
        }
    }
}
