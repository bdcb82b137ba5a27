//! Built-in accounting controls.

use async_trait::async_trait;
use closing_calculators::PeriodContext;
use closing_core::StepCategory;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::catalog::ControlCatalog;
use crate::control::{CheckFinding, ControlCheck, ControlDefinition};
use crate::severity::ControlSeverity;
use crate::Result;

/// The trial balance must sum to zero across all accounts.
struct TrialBalanceEquilibrium;

#[async_trait]
impl ControlCheck for TrialBalanceEquilibrium {
    async fn run(&self, ctx: &PeriodContext) -> Result<CheckFinding> {
        let total = ctx.account_balance(&[""]).await?;
        if total == Decimal::ZERO {
            Ok(CheckFinding::pass("trial balance is balanced"))
        } else {
            Ok(CheckFinding::fail(format!(
                "trial balance off by {}",
                total
            )))
        }
    }
}

/// Suspense accounts must be cleared before closure.
struct SuspenseAccountsEmpty {
    suspense_prefixes: Vec<String>,
}

#[async_trait]
impl ControlCheck for SuspenseAccountsEmpty {
    async fn run(&self, ctx: &PeriodContext) -> Result<CheckFinding> {
        let prefixes: Vec<&str> = self.suspense_prefixes.iter().map(String::as_str).collect();
        let balance = ctx.account_balance(&prefixes).await?;
        if balance == Decimal::ZERO {
            Ok(CheckFinding::pass("suspense accounts are empty"))
        } else {
            Ok(CheckFinding::fail(format!(
                "suspense accounts carry {}",
                balance
            )))
        }
    }
}

/// Every regularization entry must carry a justification.
struct RegularizationsJustified;

#[async_trait]
impl ControlCheck for RegularizationsJustified {
    async fn run(&self, ctx: &PeriodContext) -> Result<CheckFinding> {
        let unjustified: Vec<&str> = ctx
            .regularizations
            .iter()
            .filter(|e| !e.is_justified())
            .map(|e| e.step_code.as_str())
            .collect();

        if unjustified.is_empty() {
            Ok(CheckFinding::pass("all regularizations justified"))
        } else {
            Ok(CheckFinding::fail(format!(
                "{} regularization(s) missing justification (steps: {})",
                unjustified.len(),
                unjustified.join(", ")
            )))
        }
    }
}

/// Regularization entries should be validated before statements are
/// produced; unvalidated entries are flagged, not blocked.
struct RegularizationsValidated;

#[async_trait]
impl ControlCheck for RegularizationsValidated {
    async fn run(&self, ctx: &PeriodContext) -> Result<CheckFinding> {
        let pending = ctx.regularizations.iter().filter(|e| !e.validated).count();
        if pending == 0 {
            Ok(CheckFinding::pass("all regularizations validated"))
        } else {
            Ok(CheckFinding::fail(format!(
                "{} regularization(s) await validation",
                pending
            )))
        }
    }
}

/// Closure should finish at or before the legal deadline.
struct DeadlineRespected;

#[async_trait]
impl ControlCheck for DeadlineRespected {
    async fn run(&self, ctx: &PeriodContext) -> Result<CheckFinding> {
        if ctx.as_of <= ctx.attributes.deadline {
            Ok(CheckFinding::pass("closure within deadline"))
        } else {
            let late = ctx.as_of - ctx.attributes.deadline;
            Ok(CheckFinding::fail(format!(
                "closure {} day(s) past deadline",
                late.num_days().max(1)
            )))
        }
    }
}

/// Catalog of the standard closing controls, keyed for the validation
/// category where the control steps of the default templates live.
pub async fn builtin_catalog() -> ControlCatalog {
    let catalog = ControlCatalog::new();

    catalog
        .register(
            ControlDefinition::new(
                "ctl.trial_balance_equilibrium",
                "Trial balance equilibrium",
                StepCategory::Validation,
                ControlSeverity::Critical,
            )
            .with_description("Debits and credits must balance across the ledger"),
            Arc::new(TrialBalanceEquilibrium),
        )
        .await;

    catalog
        .register(
            ControlDefinition::new(
                "ctl.suspense_accounts_empty",
                "Suspense accounts cleared",
                StepCategory::Validation,
                ControlSeverity::Blocking,
            )
            .with_description("Accounts 471-479 must be cleared before closure"),
            Arc::new(SuspenseAccountsEmpty {
                suspense_prefixes: vec!["471".to_string(), "472".to_string(), "478".to_string()],
            }),
        )
        .await;

    catalog
        .register(
            ControlDefinition::new(
                "ctl.regularizations_justified",
                "Regularizations justified",
                StepCategory::Validation,
                ControlSeverity::Error,
            ),
            Arc::new(RegularizationsJustified),
        )
        .await;

    catalog
        .register(
            ControlDefinition::new(
                "ctl.regularizations_validated",
                "Regularizations validated",
                StepCategory::Validation,
                ControlSeverity::Warning,
            ),
            Arc::new(RegularizationsValidated),
        )
        .await;

    catalog
        .register(
            ControlDefinition::new(
                "ctl.deadline_respected",
                "Deadline respected",
                StepCategory::Validation,
                ControlSeverity::Warning,
            ),
            Arc::new(DeadlineRespected),
        )
        .await;

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlFramework;
    use chrono::{Duration, Utc};
    use closing_calculators::{
        RegularizationDraft, RegularizationEntry, RegularizationType, StaticLedger,
    };
    use closing_core::{ClosureType, PeriodAttributes, PeriodId};

    fn ctx_with_ledger(ledger: StaticLedger) -> PeriodContext {
        PeriodContext::new(
            PeriodId::new(),
            "2026-07",
            PeriodAttributes::new("retail", ClosureType::Monthly, Utc::now() + Duration::days(5)),
            Utc::now(),
            Vec::new(),
            Arc::new(ledger),
        )
    }

    #[tokio::test]
    async fn test_suspense_control_blocks_on_balance() {
        let catalog = builtin_catalog().await;
        let ctx = ctx_with_ledger(StaticLedger::new().with_account("471000", Decimal::new(100, 2)));

        let outcome = catalog
            .evaluate(&ctx, "ctl.suspense_accounts_empty")
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert!(outcome.severity.is_blocking());
    }

    #[tokio::test]
    async fn test_trial_balance_passes_when_balanced() {
        let catalog = builtin_catalog().await;
        let ctx = ctx_with_ledger(
            StaticLedger::new()
                .with_account("411000", Decimal::new(500, 2))
                .with_account("701000", Decimal::new(-500, 2)),
        );

        let outcome = catalog
            .evaluate(&ctx, "ctl.trial_balance_equilibrium")
            .await
            .unwrap();
        assert!(outcome.passed);
    }

    #[tokio::test]
    async fn test_justification_control() {
        let catalog = builtin_catalog().await;
        let period_id = PeriodId::new();

        let justified = RegularizationEntry::from_draft(
            period_id,
            "provisions.compute",
            RegularizationDraft::new(
                RegularizationType::Provision,
                Decimal::new(100, 0),
                Decimal::new(5, 0),
                "documented",
            ),
        );
        let blank = RegularizationEntry::from_draft(
            period_id,
            "accruals.compute",
            RegularizationDraft::new(
                RegularizationType::Accrual,
                Decimal::new(100, 0),
                Decimal::new(5, 0),
                "",
            ),
        );

        let ctx = PeriodContext::new(
            period_id,
            "2026-07",
            PeriodAttributes::new("retail", ClosureType::Monthly, Utc::now()),
            Utc::now(),
            vec![justified, blank],
            Arc::new(StaticLedger::new()),
        );

        let outcome = catalog
            .evaluate(&ctx, "ctl.regularizations_justified")
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert!(outcome.details.contains("accruals.compute"));
    }

    #[tokio::test]
    async fn test_deadline_control_warns_when_late() {
        let catalog = builtin_catalog().await;
        let ctx = PeriodContext::new(
            PeriodId::new(),
            "2026-07",
            PeriodAttributes::new(
                "retail",
                ClosureType::Monthly,
                Utc::now() - Duration::days(3),
            ),
            Utc::now(),
            Vec::new(),
            Arc::new(StaticLedger::new()),
        );

        let outcome = catalog.evaluate(&ctx, "ctl.deadline_respected").await.unwrap();
        assert!(!outcome.passed);
        assert!(!outcome.severity.is_blocking());
    }
}
