//! Pure hash chaining over audit entries.

use sha2::{Digest, Sha256};

use crate::entry::AuditEntry;

/// Predecessor hash of the first entry in every period chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Compute the integrity hash of an entry given its predecessor's hash.
///
/// The encoding is positional with a field separator that cannot occur in
/// the hex hashes or RFC 3339 timestamps; JSON state snapshots are hashed
/// via their compact serialization.
pub fn chain_hash(
    prev_hash: &str,
    period_id: &str,
    sequence: u64,
    action: &str,
    actor_id: &str,
    timestamp_rfc3339: &str,
    before_state: &serde_json::Value,
    after_state: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(period_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(sequence.to_be_bytes());
    hasher.update(b"\x1f");
    hasher.update(action.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(actor_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(timestamp_rfc3339.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(before_state.to_string().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(after_state.to_string().as_bytes());

    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Recompute the integrity hash of an existing entry.
pub fn entry_hash(entry: &AuditEntry) -> String {
    chain_hash(
        &entry.prev_hash,
        &entry.period_id.to_string(),
        entry.sequence,
        entry.action.as_str(),
        entry.actor_id.as_str(),
        &entry.timestamp.to_rfc3339(),
        &entry.before_state,
        &entry.after_state,
    )
}
