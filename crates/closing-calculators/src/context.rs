use chrono::{DateTime, Utc};
use closing_core::{PeriodAttributes, PeriodId};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::entry::RegularizationEntry;
use crate::ledger::LedgerQuery;
use crate::Result;

/// Snapshot of one period handed to calculators and controls.
///
/// The `as_of` date is fixed when the context is built, so two runs of a
/// deterministic calculator over the same context observe the same ledger
/// cut-off.
#[derive(Clone)]
pub struct PeriodContext {
    pub period_id: PeriodId,
    pub period_name: String,
    pub attributes: PeriodAttributes,
    pub as_of: DateTime<Utc>,
    /// Regularizations recorded on the period so far.
    pub regularizations: Vec<RegularizationEntry>,
    ledger: Arc<dyn LedgerQuery>,
}

impl PeriodContext {
    pub fn new(
        period_id: PeriodId,
        period_name: impl Into<String>,
        attributes: PeriodAttributes,
        as_of: DateTime<Utc>,
        regularizations: Vec<RegularizationEntry>,
        ledger: Arc<dyn LedgerQuery>,
    ) -> Self {
        Self {
            period_id,
            period_name: period_name.into(),
            attributes,
            as_of,
            regularizations,
            ledger,
        }
    }

    /// Aggregate balance of the accounts matching the prefixes, at the
    /// context's cut-off date.
    pub async fn account_balance(&self, prefixes: &[&str]) -> Result<Decimal> {
        let prefixes: Vec<String> = prefixes.iter().map(|p| p.to_string()).collect();
        let balance = self.ledger.account_balance(&prefixes, self.as_of).await?;
        Ok(balance)
    }
}

impl std::fmt::Debug for PeriodContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodContext")
            .field("period_id", &self.period_id)
            .field("period_name", &self.period_name)
            .field("as_of", &self.as_of)
            .field("regularizations", &self.regularizations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::StaticLedger;
    use closing_core::ClosureType;

    #[tokio::test]
    async fn test_balance_passthrough() {
        let ledger = StaticLedger::new().with_account("606000", Decimal::new(42_000, 2));
        let ctx = PeriodContext::new(
            PeriodId::new(),
            "2026-07",
            PeriodAttributes::new("retail", ClosureType::Monthly, Utc::now()),
            Utc::now(),
            Vec::new(),
            Arc::new(ledger),
        );

        let balance = ctx.account_balance(&["606"]).await.unwrap();
        assert_eq!(balance, Decimal::new(42_000, 2));
    }
}
