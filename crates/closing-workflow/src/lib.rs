//! Period-closure workflow orchestrator.
//!
//! This crate drives an accounting period through its closing workflow:
//! - Template definition and validation (acyclic dependency graphs)
//! - Step materialization with execution-condition filtering
//! - Dispatch by step kind with at-most-once transition guarantees
//! - Dependency propagation across the step graph
//! - Progression and compliance scoring
//! - A hash-chained audit record of every transition

pub mod conditions;
pub mod dag;
pub mod engine;
pub mod period;
pub mod scheduling;
pub mod scoring;
pub mod step;
pub mod template;

pub use conditions::ExecutionCondition;
pub use dag::TemplateDag;
pub use engine::{ClosureEngine, ClosureEngineBuilder, PeriodSnapshot, StepOutcome};
pub use period::{ClosurePeriod, PeriodStatus};
pub use scoring::{compliance_score, ScoreInputs};
pub use step::{StepStatus, WorkflowStep};
pub use template::{StepTemplate, TemplateError, TemplateStore, WorkflowTemplate};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClosureError {
    #[error("invalid state for {entity}: {current} does not permit {attempted}")]
    InvalidState {
        entity: String,
        current: String,
        attempted: String,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("handler failed for step {step}: {reason}")]
    Handler { step: String, reason: String },

    #[error("concurrent access on {resource}; retry the operation")]
    ConcurrencyConflict { resource: String },

    #[error("blocking control failure on step {step}: {details}")]
    ComplianceViolation { step: String, details: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("audit error: {0}")]
    Audit(#[from] closing_audit::AuditError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("core error: {0}")]
    Core(#[from] closing_core::AppError),
}

impl From<closing_infra::LockError> for ClosureError {
    fn from(err: closing_infra::LockError) -> Self {
        match err {
            closing_infra::LockError::Contended { resource } => {
                ClosureError::ConcurrencyConflict { resource }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ClosureError>;
