//! Step-ready work queue.
//!
//! The engine publishes a message whenever a step becomes ready;
//! independent workers consume the queue and drive `execute_step`.
//! Scheduling is thereby decoupled from execution, and backpressure is
//! the channel's bounded capacity.

use chrono::{DateTime, Utc};
use closing_core::{PeriodId, StepId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("work queue is closed")]
    Closed,
    #[error("work queue is full")]
    Full,
}

/// One unit of dispatchable work: a step whose dependencies are all
/// completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReady {
    pub period_id: PeriodId,
    pub step_id: StepId,
    pub step_code: String,
    pub auto_executable: bool,
    pub enqueued_at: DateTime<Utc>,
}

impl StepReady {
    pub fn new(period_id: PeriodId, step_id: StepId, step_code: impl Into<String>, auto_executable: bool) -> Self {
        Self {
            period_id,
            step_id,
            step_code: step_code.into(),
            auto_executable,
            enqueued_at: Utc::now(),
        }
    }
}

/// Producer half, held by the engine. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<StepReady>,
}

impl WorkQueue {
    pub async fn publish(&self, item: StepReady) -> Result<(), QueueError> {
        tracing::debug!(
            period_id = %item.period_id,
            step_code = %item.step_code,
            "step ready"
        );
        self.tx.send(item).await.map_err(|_| QueueError::Closed)
    }

    /// Non-blocking publish; full queues surface backpressure to the
    /// caller instead of waiting.
    pub fn try_publish(&self, item: StepReady) -> Result<(), QueueError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

/// Consumer half, held by a worker loop.
#[derive(Debug)]
pub struct WorkReceiver {
    rx: mpsc::Receiver<StepReady>,
}

impl WorkReceiver {
    /// Receive the next ready step; `None` once all producers are gone.
    pub async fn next(&mut self) -> Option<StepReady> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<StepReady> {
        self.rx.try_recv().ok()
    }
}

/// Create a bounded work queue.
pub fn work_queue(capacity: usize) -> (WorkQueue, WorkReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (WorkQueue { tx }, WorkReceiver { rx })
}
