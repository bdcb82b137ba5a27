//! Business calculations invoked by calculation-kind closing steps.
//!
//! A calculator is a pure function over a [`PeriodContext`]: identical
//! context must yield identical results, which is what makes bounded
//! retries of calculation steps safe.

pub mod context;
pub mod depreciation;
pub mod entry;
pub mod ledger;
pub mod provisions;
pub mod registry;
pub mod regularizations;

pub use context::PeriodContext;
pub use depreciation::StraightLineDepreciation;
pub use entry::{RegularizationDraft, RegularizationEntry, RegularizationType};
pub use ledger::{LedgerError, LedgerQuery, StaticLedger};
pub use provisions::DoubtfulReceivablesProvision;
pub use registry::CalculatorRegistry;
pub use regularizations::{DeferredChargesCalculator, UnbilledChargesAccrual};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("ledger query failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("calculation failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, CalculatorError>;

/// Structured output of one calculator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationResult {
    /// Named amounts, e.g. "base" and "provision".
    pub amounts: BTreeMap<String, Decimal>,
    /// Regularization entries to be recorded on the period.
    pub regularizations: Vec<RegularizationDraft>,
    /// Data-quality signal in [0, 1]; feeds the compliance score.
    pub data_quality_score: f64,
}

impl CalculationResult {
    pub fn new(data_quality_score: f64) -> Self {
        Self {
            amounts: BTreeMap::new(),
            regularizations: Vec::new(),
            data_quality_score: data_quality_score.clamp(0.0, 1.0),
        }
    }

    pub fn with_amount(mut self, name: impl Into<String>, amount: Decimal) -> Self {
        self.amounts.insert(name.into(), amount);
        self
    }

    pub fn with_regularization(mut self, draft: RegularizationDraft) -> Self {
        self.regularizations.push(draft);
        self
    }
}

/// One pluggable business computation.
///
/// Implementations must be deterministic for a given context; the engine
/// retries calculation steps on transient failure and relies on identical
/// re-runs being harmless.
#[async_trait]
pub trait Calculator: Send + Sync {
    fn name(&self) -> &str;

    async fn calculate(&self, ctx: &PeriodContext) -> Result<CalculationResult>;
}
