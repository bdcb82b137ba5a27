//! Explicit lock manager for state-transition critical sections.
//!
//! Every implementation of the closure engine must serialize the
//! read-check-write section of a status transition behind a lock keyed by
//! the entity being transitioned. The lock is never held across an
//! external handler call.

use closing_core::{PeriodId, StepId};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock already held for {resource}")]
    Contended { resource: String },
}

/// Lockable resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    Period(PeriodId),
    Step(StepId),
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKey::Period(id) => write!(f, "period:{}", id),
            LockKey::Step(id) => write!(f, "step:{}", id),
        }
    }
}

/// RAII guard; the lock is released on drop.
pub struct LockGuard {
    key: LockKey,
    _inner: OwnedMutexGuard<()>,
}

impl LockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Process-wide lock registry keyed by period and step identifiers.
///
/// Lock cells are created lazily and never removed; the registry grows
/// with the number of live periods and steps, which is bounded by the
/// engine's retention of period state.
#[derive(Debug, Clone, Default)]
pub struct LockManager {
    cells: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: LockKey) -> Arc<Mutex<()>> {
        self.cells
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Attempt to acquire the lock without waiting. Contention is a
    /// caller-visible conflict: the caller retries the whole operation.
    pub fn try_acquire(&self, key: LockKey) -> Result<LockGuard, LockError> {
        let cell = self.cell(key);
        let guard = cell.try_lock_owned().map_err(|_| {
            tracing::debug!(resource = %key, "lock contention");
            LockError::Contended {
                resource: key.to_string(),
            }
        })?;
        Ok(LockGuard { key, _inner: guard })
    }

    /// Acquire the lock, waiting if necessary. Reserved for short critical
    /// sections (aggregate updates) where waiting cannot deadlock.
    pub async fn acquire(&self, key: LockKey) -> LockGuard {
        let cell = self.cell(key);
        let guard = cell.lock_owned().await;
        LockGuard { key, _inner: guard }
    }
}
