use async_trait::async_trait;
use closing_calculators::PeriodContext;
use closing_core::StepCategory;
use serde::{Deserialize, Serialize};

use crate::severity::ControlSeverity;
use crate::Result;

/// Immutable description of one control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlDefinition {
    /// Stable identifier, e.g. "ctl.suspense_accounts_empty".
    pub id: String,
    pub name: String,
    pub description: String,
    /// Step category whose control steps run this check.
    pub category: StepCategory,
    pub severity: ControlSeverity,
}

impl ControlDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: StepCategory,
        severity: ControlSeverity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category,
            severity,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Raw result of running a check, before severity attribution.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub passed: bool,
    pub details: String,
}

impl CheckFinding {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

/// Executable body of a control.
#[async_trait]
pub trait ControlCheck: Send + Sync {
    async fn run(&self, ctx: &PeriodContext) -> Result<CheckFinding>;
}

/// Outcome of one control evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlOutcome {
    pub control_id: String,
    pub passed: bool,
    pub severity: ControlSeverity,
    pub details: String,
}

/// Entry point the orchestrator depends on.
#[async_trait]
pub trait ControlFramework: Send + Sync {
    /// Controls scoped to a step category.
    async fn controls_for(&self, category: StepCategory) -> Vec<ControlDefinition>;

    /// Evaluate one control against a period.
    async fn evaluate(&self, ctx: &PeriodContext, control_id: &str) -> Result<ControlOutcome>;
}

/// Aggregation of the outcomes of one control step run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRunSummary {
    pub outcomes: Vec<ControlOutcome>,
    pub passed: u32,
    pub failed: u32,
}

impl ControlRunSummary {
    pub fn from_outcomes(outcomes: Vec<ControlOutcome>) -> Self {
        let passed = outcomes.iter().filter(|o| o.passed).count() as u32;
        let failed = outcomes.len() as u32 - passed;
        Self {
            outcomes,
            passed,
            failed,
        }
    }

    /// Failed controls whose severity forbids completion.
    pub fn blocking_failures(&self) -> Vec<&ControlOutcome> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed && o.severity.is_blocking())
            .collect()
    }

    pub fn has_blocking_failure(&self) -> bool {
        !self.blocking_failures().is_empty()
    }
}
