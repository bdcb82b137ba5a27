//! Batch verification of audit chains.

use thiserror::Error;

use crate::chain::{entry_hash, GENESIS_HASH};
use crate::entry::AuditEntry;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainVerifyError {
    #[error("sequence gap at position {position}: expected {expected}, found {found}")]
    SequenceGap {
        position: usize,
        expected: u64,
        found: u64,
    },

    #[error("broken link at sequence {sequence}: prev_hash does not match predecessor")]
    BrokenLink { sequence: u64 },

    #[error("hash mismatch at sequence {sequence}: entry content was altered")]
    HashMismatch { sequence: u64 },

    #[error("entry at sequence {sequence} belongs to a different period")]
    ForeignEntry { sequence: u64 },
}

/// Verify a full period chain: contiguous sequences, intact links, and
/// recomputable integrity hashes. Intended as a batch job over entries
/// returned in sequence order.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), ChainVerifyError> {
    let Some(first) = entries.first() else {
        return Ok(());
    };
    let period_id = first.period_id;

    let mut expected_prev = GENESIS_HASH.to_string();
    for (position, entry) in entries.iter().enumerate() {
        if entry.period_id != period_id {
            return Err(ChainVerifyError::ForeignEntry {
                sequence: entry.sequence,
            });
        }
        if entry.sequence != position as u64 {
            return Err(ChainVerifyError::SequenceGap {
                position,
                expected: position as u64,
                found: entry.sequence,
            });
        }
        if entry.prev_hash != expected_prev {
            return Err(ChainVerifyError::BrokenLink {
                sequence: entry.sequence,
            });
        }
        if entry_hash(entry) != entry.integrity_hash {
            return Err(ChainVerifyError::HashMismatch {
                sequence: entry.sequence,
            });
        }
        expected_prev = entry.integrity_hash.clone();
    }

    Ok(())
}
