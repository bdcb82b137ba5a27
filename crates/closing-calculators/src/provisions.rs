//! Doubtful-receivables provision.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::entry::{RegularizationDraft, RegularizationType};
use crate::{CalculationResult, Calculator, CalculatorError, PeriodContext, Result};

/// Provisions a fixed rate of the outstanding receivables balance.
#[derive(Debug, Clone)]
pub struct DoubtfulReceivablesProvision {
    receivable_prefixes: Vec<String>,
    /// Rate applied to the base, e.g. 0.05 for 5%.
    rate: Decimal,
}

impl DoubtfulReceivablesProvision {
    pub fn new(receivable_prefixes: Vec<String>, rate: Decimal) -> Self {
        Self {
            receivable_prefixes,
            rate,
        }
    }
}

#[async_trait]
impl Calculator for DoubtfulReceivablesProvision {
    fn name(&self) -> &str {
        "doubtful_receivables_provision"
    }

    async fn calculate(&self, ctx: &PeriodContext) -> Result<CalculationResult> {
        if self.rate < Decimal::ZERO || self.rate > Decimal::ONE {
            return Err(CalculatorError::Failed(format!(
                "provision rate {} outside [0, 1]",
                self.rate
            )));
        }

        let prefixes: Vec<&str> = self.receivable_prefixes.iter().map(String::as_str).collect();
        let base = ctx.account_balance(&prefixes).await?;
        let provision = (base * self.rate).round_dp(2);

        tracing::debug!(
            period = %ctx.period_name,
            base = %base,
            provision = %provision,
            "doubtful receivables provision computed"
        );

        // An empty receivables base is a data-quality signal, not an
        // error: the provision is simply zero.
        let quality = if base > Decimal::ZERO { 1.0 } else { 0.7 };

        let mut result = CalculationResult::new(quality)
            .with_amount("base", base)
            .with_amount("provision", provision);

        if provision > Decimal::ZERO {
            result = result.with_regularization(RegularizationDraft::new(
                RegularizationType::Provision,
                base,
                provision,
                format!(
                    "Provision on doubtful receivables at rate {} over base {}",
                    self.rate, base
                ),
            ));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MockLedgerQuery, StaticLedger};
    use chrono::Utc;
    use closing_core::{ClosureType, PeriodAttributes, PeriodId};
    use std::sync::Arc;

    fn context(ledger: Arc<dyn crate::LedgerQuery>) -> PeriodContext {
        PeriodContext::new(
            PeriodId::new(),
            "2026-07",
            PeriodAttributes::new("retail", ClosureType::Monthly, Utc::now()),
            Utc::now(),
            Vec::new(),
            ledger,
        )
    }

    #[tokio::test]
    async fn test_provision_on_balance() {
        let ledger = StaticLedger::new().with_account("411000", Decimal::new(1_000_000, 2));
        let calc = DoubtfulReceivablesProvision::new(vec!["411".to_string()], Decimal::new(5, 2));

        let result = calc.calculate(&context(Arc::new(ledger))).await.unwrap();

        assert_eq!(result.amounts["base"], Decimal::new(1_000_000, 2));
        assert_eq!(result.amounts["provision"], Decimal::new(50_000, 2));
        assert_eq!(result.regularizations.len(), 1);
        assert_eq!(
            result.regularizations[0].entry_type,
            RegularizationType::Provision
        );
        assert!((result.data_quality_score - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_zero_base_degrades_quality() {
        let calc = DoubtfulReceivablesProvision::new(vec!["411".to_string()], Decimal::new(5, 2));

        let result = calc
            .calculate(&context(Arc::new(StaticLedger::new())))
            .await
            .unwrap();

        assert!(result.regularizations.is_empty());
        assert!(result.data_quality_score < 1.0);
    }

    #[tokio::test]
    async fn test_invalid_rate() {
        let calc = DoubtfulReceivablesProvision::new(vec!["411".to_string()], Decimal::new(15, 1));

        let err = calc
            .calculate(&context(Arc::new(StaticLedger::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, CalculatorError::Failed(_)));
    }

    #[tokio::test]
    async fn test_ledger_failure_propagates() {
        let mut ledger = MockLedgerQuery::new();
        ledger
            .expect_account_balance()
            .returning(|_, _| Err(crate::LedgerError::Unavailable("connection reset".into())));

        let calc = DoubtfulReceivablesProvision::new(vec!["411".to_string()], Decimal::new(5, 2));
        let err = calc.calculate(&context(Arc::new(ledger))).await.unwrap_err();
        assert!(matches!(err, CalculatorError::Ledger(_)));
    }
}
