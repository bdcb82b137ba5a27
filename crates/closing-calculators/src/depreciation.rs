//! Straight-line depreciation charge for the period.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::entry::{RegularizationDraft, RegularizationType};
use crate::{CalculationResult, Calculator, CalculatorError, PeriodContext, Result};

/// Spreads an annual depreciation rate evenly over the closing periods of
/// the year.
#[derive(Debug, Clone)]
pub struct StraightLineDepreciation {
    asset_prefixes: Vec<String>,
    /// Annual rate, e.g. 0.20 for a five-year life.
    annual_rate: Decimal,
    /// Number of closing periods per year (12 for monthly closures).
    periods_per_year: u32,
}

impl StraightLineDepreciation {
    pub fn new(asset_prefixes: Vec<String>, annual_rate: Decimal, periods_per_year: u32) -> Self {
        Self {
            asset_prefixes,
            annual_rate,
            periods_per_year,
        }
    }
}

#[async_trait]
impl Calculator for StraightLineDepreciation {
    fn name(&self) -> &str {
        "straight_line_depreciation"
    }

    async fn calculate(&self, ctx: &PeriodContext) -> Result<CalculationResult> {
        if self.periods_per_year == 0 {
            return Err(CalculatorError::Failed(
                "periods_per_year must be positive".to_string(),
            ));
        }

        let prefixes: Vec<&str> = self.asset_prefixes.iter().map(String::as_str).collect();
        let gross = ctx.account_balance(&prefixes).await?;
        let charge = (gross * self.annual_rate / Decimal::from(self.periods_per_year)).round_dp(2);

        tracing::debug!(
            period = %ctx.period_name,
            gross = %gross,
            charge = %charge,
            "straight-line depreciation computed"
        );

        let quality = if gross >= Decimal::ZERO { 1.0 } else { 0.5 };

        let mut result = CalculationResult::new(quality)
            .with_amount("gross_value", gross)
            .with_amount("period_charge", charge);

        if charge > Decimal::ZERO {
            result = result.with_regularization(RegularizationDraft::new(
                RegularizationType::Depreciation,
                gross,
                charge,
                format!(
                    "Straight-line depreciation, annual rate {} over {} periods",
                    self.annual_rate, self.periods_per_year
                ),
            ));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::StaticLedger;
    use chrono::Utc;
    use closing_core::{ClosureType, PeriodAttributes, PeriodId};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_monthly_charge() {
        let ledger = StaticLedger::new().with_account("215000", Decimal::new(12_000_000, 2));
        let ctx = PeriodContext::new(
            PeriodId::new(),
            "2026-07",
            PeriodAttributes::new("industry", ClosureType::Monthly, Utc::now()),
            Utc::now(),
            Vec::new(),
            Arc::new(ledger),
        );

        // 120,000.00 gross at 20% over 12 periods: 2,000.00 per month.
        let calc =
            StraightLineDepreciation::new(vec!["215".to_string()], Decimal::new(20, 2), 12);
        let result = calc.calculate(&ctx).await.unwrap();

        assert_eq!(result.amounts["period_charge"], Decimal::new(200_000, 2));
        assert_eq!(result.regularizations.len(), 1);
        assert_eq!(
            result.regularizations[0].entry_type,
            RegularizationType::Depreciation
        );
    }

    #[tokio::test]
    async fn test_zero_periods_rejected() {
        let ctx = PeriodContext::new(
            PeriodId::new(),
            "2026-07",
            PeriodAttributes::new("industry", ClosureType::Monthly, Utc::now()),
            Utc::now(),
            Vec::new(),
            Arc::new(StaticLedger::new()),
        );

        let calc = StraightLineDepreciation::new(vec!["215".to_string()], Decimal::new(20, 2), 0);
        assert!(calc.calculate(&ctx).await.is_err());
    }
}
