//! Compliance scoring.
//!
//! The score is a weighted sum of five independently-scored criteria,
//! computed once when the period reaches pending approval.

use chrono::{DateTime, Utc};

const CONTROL_WEIGHT: f64 = 30.0;
const DEADLINE_WEIGHT: f64 = 25.0;
const COMPLETENESS_WEIGHT: f64 = 20.0;
const DATA_QUALITY_WEIGHT: f64 = 15.0;
const DOCUMENTATION_WEIGHT: f64 = 10.0;

/// Days past the deadline at which the deadline credit reaches zero.
const DEADLINE_GRACE_DAYS: f64 = 30.0;

/// Inputs aggregated over the period's steps and entries.
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    pub controls_passed: u32,
    pub controls_failed: u32,
    pub deadline: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub mandatory_total: u32,
    pub mandatory_completed: u32,
    /// Mean data-quality signal from calculators, in [0, 1]; `None` when
    /// the workflow had no calculation steps.
    pub data_quality: Option<f64>,
    pub justified_entries: u32,
    pub total_entries: u32,
}

/// Weighted compliance score, clamped to [0, 100].
pub fn compliance_score(inputs: &ScoreInputs) -> f64 {
    let control_rate = {
        let total = inputs.controls_passed + inputs.controls_failed;
        if total == 0 {
            1.0
        } else {
            f64::from(inputs.controls_passed) / f64::from(total)
        }
    };

    // Full credit at or before the deadline, then linear decay to zero.
    let deadline_credit = if inputs.completed_at <= inputs.deadline {
        1.0
    } else {
        let late_days =
            (inputs.completed_at - inputs.deadline).num_seconds() as f64 / 86_400.0;
        (1.0 - late_days / DEADLINE_GRACE_DAYS).max(0.0)
    };

    let completeness = if inputs.mandatory_total == 0 {
        1.0
    } else {
        f64::from(inputs.mandatory_completed) / f64::from(inputs.mandatory_total)
    };

    let data_quality = inputs.data_quality.unwrap_or(1.0).clamp(0.0, 1.0);

    let documentation = if inputs.total_entries == 0 {
        1.0
    } else {
        f64::from(inputs.justified_entries) / f64::from(inputs.total_entries)
    };

    let score = CONTROL_WEIGHT * control_rate
        + DEADLINE_WEIGHT * deadline_credit
        + COMPLETENESS_WEIGHT * completeness
        + DATA_QUALITY_WEIGHT * data_quality
        + DOCUMENTATION_WEIGHT * documentation;

    score.clamp(0.0, 100.0)
}
