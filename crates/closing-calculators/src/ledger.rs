//! Read-only seam to the general ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Balance lookup against the chart of accounts. Persistence and the
/// account model live outside this system.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Aggregate balance of every account matching one of the prefixes,
    /// as of the given date.
    async fn account_balance(
        &self,
        account_prefixes: &[String],
        as_of: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError>;
}

/// Fixed in-memory ledger keyed by account number. Used in tests and
/// local runs.
#[derive(Debug, Clone, Default)]
pub struct StaticLedger {
    accounts: HashMap<String, Decimal>,
}

impl StaticLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, account: impl Into<String>, balance: Decimal) -> Self {
        self.accounts.insert(account.into(), balance);
        self
    }
}

#[async_trait]
impl LedgerQuery for StaticLedger {
    async fn account_balance(
        &self,
        account_prefixes: &[String],
        _as_of: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        let total = self
            .accounts
            .iter()
            .filter(|(account, _)| {
                account_prefixes
                    .iter()
                    .any(|prefix| account.starts_with(prefix.as_str()))
            })
            .map(|(_, balance)| *balance)
            .sum();
        Ok(total)
    }
}
