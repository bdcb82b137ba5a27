//! Append-only audit trail for closure state transitions.
//!
//! Every entry is hash-chained to its predecessor within the same period,
//! so any later mutation of a recorded transition breaks the chain.
//! Verification of a full chain is a batch operation, not part of the
//! transition hot path.

pub mod chain;
pub mod entry;
pub mod replay;
pub mod store;
pub mod verify;

pub use chain::{chain_hash, GENESIS_HASH};
pub use entry::{AuditAction, AuditEntry, NewAuditRecord};
pub use replay::{replay, ReplayState};
pub use store::{AuditQuery, AuditStore, InMemoryAuditStore};
pub use verify::{verify_chain, ChainVerifyError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("no audit trail for period {0}")]
    UnknownPeriod(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit chain is corrupt: {0}")]
    CorruptChain(#[from] ChainVerifyError),
}

pub type Result<T> = std::result::Result<T, AuditError>;
