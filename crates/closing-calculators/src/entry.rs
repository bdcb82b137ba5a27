use chrono::{DateTime, Utc};
use closing_core::PeriodId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Nature of an end-of-period adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegularizationType {
    Accrual,
    Deferral,
    Provision,
    Depreciation,
    WriteOff,
}

impl RegularizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegularizationType::Accrual => "accrual",
            RegularizationType::Deferral => "deferral",
            RegularizationType::Provision => "provision",
            RegularizationType::Depreciation => "depreciation",
            RegularizationType::WriteOff => "write_off",
        }
    }
}

impl std::fmt::Display for RegularizationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Regularization produced by a calculator, before the engine attaches it
/// to a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegularizationDraft {
    pub entry_type: RegularizationType,
    pub base_amount: Decimal,
    pub calculated_amount: Decimal,
    pub justification: String,
}

impl RegularizationDraft {
    pub fn new(
        entry_type: RegularizationType,
        base_amount: Decimal,
        calculated_amount: Decimal,
        justification: impl Into<String>,
    ) -> Self {
        Self {
            entry_type,
            base_amount,
            calculated_amount,
            justification: justification.into(),
        }
    }
}

/// Adjustment entry owned by a closure period; consumed by the ledger
/// once the period is approved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegularizationEntry {
    pub id: Uuid,
    pub period_id: PeriodId,
    /// Code of the calculation step that produced the entry.
    pub step_code: String,
    pub entry_type: RegularizationType,
    pub base_amount: Decimal,
    pub calculated_amount: Decimal,
    pub justification: String,
    pub validated: bool,
    pub created_at: DateTime<Utc>,
}

impl RegularizationEntry {
    pub fn from_draft(period_id: PeriodId, step_code: impl Into<String>, draft: RegularizationDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            period_id,
            step_code: step_code.into(),
            entry_type: draft.entry_type,
            base_amount: draft.base_amount,
            calculated_amount: draft.calculated_amount,
            justification: draft.justification,
            validated: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_justified(&self) -> bool {
        !self.justification.trim().is_empty()
    }
}
