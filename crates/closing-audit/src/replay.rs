//! Deterministic replay of an audit chain.
//!
//! Each entry's `after_state` snapshot carries the post-transition view
//! of the period aggregate and, for step transitions, of the step. Folding
//! the chain in sequence order therefore reconstructs the final state of
//! the period and every step without consulting live engine state.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::entry::AuditEntry;

/// State reconstructed from an audit chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayState {
    /// Latest period-level snapshot fields observed.
    pub period_status: Option<String>,
    pub completion_percentage: Option<f64>,
    pub compliance_score: Option<f64>,
    /// Latest status per step code.
    pub step_statuses: BTreeMap<String, String>,
}

impl ReplayState {
    pub fn step_status(&self, code: &str) -> Option<&str> {
        self.step_statuses.get(code).map(String::as_str)
    }
}

/// Fold a chain (in sequence order) into its final state.
pub fn replay(entries: &[AuditEntry]) -> ReplayState {
    let mut state = ReplayState::default();

    for entry in entries {
        apply(&mut state, &entry.after_state);
    }

    state
}

fn apply(state: &mut ReplayState, snapshot: &Value) {
    if let Some(status) = snapshot.get("period_status").and_then(Value::as_str) {
        state.period_status = Some(status.to_string());
    }
    if let Some(pct) = snapshot.get("completion_percentage").and_then(Value::as_f64) {
        state.completion_percentage = Some(pct);
    }
    if let Some(score) = snapshot.get("compliance_score").and_then(Value::as_f64) {
        state.compliance_score = Some(score);
    }

    if let (Some(code), Some(status)) = (
        snapshot.get("step_code").and_then(Value::as_str),
        snapshot.get("step_status").and_then(Value::as_str),
    ) {
        state.step_statuses.insert(code.to_string(), status.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditAction, NewAuditRecord};
    use crate::store::{AuditStore, InMemoryAuditStore};
    use closing_core::{ActorId, PeriodId};
    use serde_json::json;

    #[tokio::test]
    async fn test_replay_reconstructs_final_state() {
        let store = InMemoryAuditStore::new();
        let p = PeriodId::new();

        let records = [
            (
                AuditAction::PeriodStarted,
                json!({"period_status": "in_progress", "completion_percentage": 0.0}),
            ),
            (
                AuditAction::StepStarted,
                json!({"step_code": "prep.lock_journals", "step_status": "in_progress",
                       "period_status": "in_progress", "completion_percentage": 0.0}),
            ),
            (
                AuditAction::StepCompleted,
                json!({"step_code": "prep.lock_journals", "step_status": "completed",
                       "period_status": "in_progress", "completion_percentage": 100.0}),
            ),
            (
                AuditAction::PeriodPendingApproval,
                json!({"period_status": "pending_approval", "completion_percentage": 100.0,
                       "compliance_score": 87.5}),
            ),
        ];

        for (action, after) in records {
            store
                .append(NewAuditRecord::new(p, action, ActorId::system(), json!({}), after))
                .await
                .unwrap();
        }

        let state = replay(&store.entries(p).await.unwrap());
        assert_eq!(state.period_status.as_deref(), Some("pending_approval"));
        assert_eq!(state.completion_percentage, Some(100.0));
        assert_eq!(state.compliance_score, Some(87.5));
        assert_eq!(state.step_status("prep.lock_journals"), Some("completed"));
    }

    #[test]
    fn test_replay_empty_chain() {
        assert_eq!(replay(&[]), ReplayState::default());
    }
}
