//! Control framework for period closure.
//!
//! A control is a named business-rule check with a severity level, run
//! against a period's data by control-kind closing steps. Failed controls
//! of blocking severities prevent the step (and thus the period) from
//! completing; lower severities are recorded and carried into the
//! compliance score.

pub mod builtin;
pub mod catalog;
pub mod control;
pub mod severity;

pub use builtin::builtin_catalog;
pub use catalog::ControlCatalog;
pub use control::{
    CheckFinding, ControlCheck, ControlDefinition, ControlFramework, ControlOutcome,
    ControlRunSummary,
};
pub use severity::ControlSeverity;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown control: {0}")]
    UnknownControl(String),

    #[error("control check failed to run: {0}")]
    CheckFailed(String),

    #[error("calculator error: {0}")]
    Calculator(#[from] closing_calculators::CalculatorError),
}

pub type Result<T> = std::result::Result<T, ControlError>;
