//! Scheduled-start estimation.
//!
//! Earliest-ready steps are scheduled immediately; deeper steps receive a
//! buffer equal to the estimated duration of their longest prerequisite
//! chain.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::dag::TemplateDag;
use crate::template::StepTemplate;

/// Compute the scheduled start of every step, keyed by step code.
pub fn scheduled_starts(
    steps: &[&StepTemplate],
    dag: &TemplateDag,
    start: DateTime<Utc>,
) -> HashMap<String, DateTime<Utc>> {
    let estimates: HashMap<String, u32> = steps
        .iter()
        .map(|s| (s.code.clone(), s.estimated_duration_minutes))
        .collect();

    dag.start_offsets(&estimates)
        .into_iter()
        .map(|(code, minutes)| (code, start + Duration::minutes(i64::from(minutes))))
        .collect()
}
