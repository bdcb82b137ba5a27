//! Accrual and deferral regularizations.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::entry::{RegularizationDraft, RegularizationType};
use crate::{CalculationResult, Calculator, PeriodContext, Result};

/// Accrues charges for goods or services received but not yet invoiced,
/// estimated as a ratio of the period's expense balance.
#[derive(Debug, Clone)]
pub struct UnbilledChargesAccrual {
    expense_prefixes: Vec<String>,
    estimate_ratio: Decimal,
}

impl UnbilledChargesAccrual {
    pub fn new(expense_prefixes: Vec<String>, estimate_ratio: Decimal) -> Self {
        Self {
            expense_prefixes,
            estimate_ratio,
        }
    }
}

#[async_trait]
impl Calculator for UnbilledChargesAccrual {
    fn name(&self) -> &str {
        "unbilled_charges_accrual"
    }

    async fn calculate(&self, ctx: &PeriodContext) -> Result<CalculationResult> {
        let prefixes: Vec<&str> = self.expense_prefixes.iter().map(String::as_str).collect();
        let expenses = ctx.account_balance(&prefixes).await?;
        let accrual = (expenses * self.estimate_ratio).round_dp(2);

        let mut result = CalculationResult::new(if expenses > Decimal::ZERO { 0.9 } else { 0.6 })
            .with_amount("expense_base", expenses)
            .with_amount("accrual", accrual);

        if accrual > Decimal::ZERO {
            result = result.with_regularization(RegularizationDraft::new(
                RegularizationType::Accrual,
                expenses,
                accrual,
                format!(
                    "Unbilled charges accrued at ratio {} of expense base {}",
                    self.estimate_ratio, expenses
                ),
            ));
        }

        Ok(result)
    }
}

/// Defers the portion of already-booked charges that belongs to future
/// periods (prepaid rents, insurance, subscriptions).
#[derive(Debug, Clone)]
pub struct DeferredChargesCalculator {
    prepaid_prefixes: Vec<String>,
    deferral_ratio: Decimal,
}

impl DeferredChargesCalculator {
    pub fn new(prepaid_prefixes: Vec<String>, deferral_ratio: Decimal) -> Self {
        Self {
            prepaid_prefixes,
            deferral_ratio,
        }
    }
}

#[async_trait]
impl Calculator for DeferredChargesCalculator {
    fn name(&self) -> &str {
        "deferred_charges"
    }

    async fn calculate(&self, ctx: &PeriodContext) -> Result<CalculationResult> {
        let prefixes: Vec<&str> = self.prepaid_prefixes.iter().map(String::as_str).collect();
        let booked = ctx.account_balance(&prefixes).await?;
        let deferred = (booked * self.deferral_ratio).round_dp(2);

        let mut result = CalculationResult::new(1.0)
            .with_amount("booked", booked)
            .with_amount("deferred", deferred);

        if deferred > Decimal::ZERO {
            result = result.with_regularization(RegularizationDraft::new(
                RegularizationType::Deferral,
                booked,
                deferred,
                format!(
                    "Charges deferred to later periods at ratio {}",
                    self.deferral_ratio
                ),
            ));
        }

        Ok(result)
    }
}
