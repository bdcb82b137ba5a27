use chrono::{DateTime, Utc};
use closing_core::{ActorId, PeriodId};
use serde::{Deserialize, Serialize};

/// Kind of state transition an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PeriodStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepSkipped,
    StepApprovalRequested,
    StepApproved,
    PeriodPendingApproval,
    PeriodApproved,
    PeriodClosed,
    PeriodLocked,
    PeriodUnlocked,
    PeriodError,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PeriodStarted => "period_started",
            AuditAction::StepStarted => "step_started",
            AuditAction::StepCompleted => "step_completed",
            AuditAction::StepFailed => "step_failed",
            AuditAction::StepSkipped => "step_skipped",
            AuditAction::StepApprovalRequested => "step_approval_requested",
            AuditAction::StepApproved => "step_approved",
            AuditAction::PeriodPendingApproval => "period_pending_approval",
            AuditAction::PeriodApproved => "period_approved",
            AuditAction::PeriodClosed => "period_closed",
            AuditAction::PeriodLocked => "period_locked",
            AuditAction::PeriodUnlocked => "period_unlocked",
            AuditAction::PeriodError => "period_error",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input for one append; sequence, timestamp and hashes are assigned by
/// the store inside the append critical section.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    pub period_id: PeriodId,
    pub action: AuditAction,
    pub actor_id: ActorId,
    pub before_state: serde_json::Value,
    pub after_state: serde_json::Value,
}

impl NewAuditRecord {
    pub fn new(
        period_id: PeriodId,
        action: AuditAction,
        actor_id: ActorId,
        before_state: serde_json::Value,
        after_state: serde_json::Value,
    ) -> Self {
        Self {
            period_id,
            action,
            actor_id,
            before_state,
            after_state,
        }
    }
}

/// One immutable audit entry. Never mutated or deleted once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub period_id: PeriodId,
    /// Monotonic per-period sequence number, starting at 0.
    pub sequence: u64,
    pub action: AuditAction,
    pub actor_id: ActorId,
    pub timestamp: DateTime<Utc>,
    pub before_state: serde_json::Value,
    pub after_state: serde_json::Value,
    /// Integrity hash of the predecessor entry (genesis hash for the
    /// first entry of a period).
    pub prev_hash: String,
    /// `hash(prev_hash, fields)` over the canonical field encoding.
    pub integrity_hash: String,
}
