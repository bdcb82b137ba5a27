//! Audit trail storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use closing_core::PeriodId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::chain::{chain_hash, GENESIS_HASH};
use crate::entry::{AuditAction, AuditEntry, NewAuditRecord};
use crate::{AuditError, Result};

/// Filter for audit trail queries.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub action: Option<AuditAction>,
}

impl AuditQuery {
    pub fn with_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    fn accepts(&self, entry: &AuditEntry) -> bool {
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        true
    }
}

/// Append-only audit storage. Implementations must assign sequence
/// numbers and chain hashes atomically per period.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one record, returning the sealed entry.
    async fn append(&self, record: NewAuditRecord) -> Result<AuditEntry>;

    /// Full chain of a period, in sequence order.
    async fn entries(&self, period_id: PeriodId) -> Result<Vec<AuditEntry>>;

    /// Filtered view of a period's chain, in sequence order.
    async fn query(&self, period_id: PeriodId, query: AuditQuery) -> Result<Vec<AuditEntry>>;
}

/// In-memory audit store, one chain per period.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditStore {
    chains: Arc<RwLock<HashMap<PeriodId, Vec<AuditEntry>>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: NewAuditRecord) -> Result<AuditEntry> {
        // The write lock makes sequence assignment and hash chaining
        // atomic per store; per-period granularity would need per-chain
        // locks, unnecessary at audit write rates.
        let mut chains = self.chains.write().await;
        let chain = chains.entry(record.period_id).or_default();

        let (sequence, prev_hash) = match chain.last() {
            Some(last) => (last.sequence + 1, last.integrity_hash.clone()),
            None => (0, GENESIS_HASH.to_string()),
        };

        let timestamp = Utc::now();
        let integrity_hash = chain_hash(
            &prev_hash,
            &record.period_id.to_string(),
            sequence,
            record.action.as_str(),
            record.actor_id.as_str(),
            &timestamp.to_rfc3339(),
            &record.before_state,
            &record.after_state,
        );

        let entry = AuditEntry {
            period_id: record.period_id,
            sequence,
            action: record.action,
            actor_id: record.actor_id,
            timestamp,
            before_state: record.before_state,
            after_state: record.after_state,
            prev_hash,
            integrity_hash,
        };

        tracing::debug!(
            period_id = %entry.period_id,
            sequence = entry.sequence,
            action = %entry.action,
            "audit entry appended"
        );

        chain.push(entry.clone());
        Ok(entry)
    }

    async fn entries(&self, period_id: PeriodId) -> Result<Vec<AuditEntry>> {
        let chains = self.chains.read().await;
        chains
            .get(&period_id)
            .cloned()
            .ok_or_else(|| AuditError::UnknownPeriod(period_id.to_string()))
    }

    async fn query(&self, period_id: PeriodId, query: AuditQuery) -> Result<Vec<AuditEntry>> {
        let entries = self.entries(period_id).await?;
        Ok(entries.into_iter().filter(|e| query.accepts(e)).collect())
    }
}
