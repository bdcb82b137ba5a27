//! Infrastructure for the period-closure engine.
//!
//! This crate provides the pieces the orchestrator relies on but that are
//! not domain logic:
//! - An explicit lock manager keyed by period and step identifiers
//! - A step-ready work queue for decoupled worker dispatch
//! - Retry policies with exponential backoff for idempotent calls
//! - Timeout helpers wrapping external handler calls
//! - The notification sink seam

pub mod locks;
pub mod notify;
pub mod queue;
pub mod retry;
pub mod timeout;

pub use locks::{LockError, LockGuard, LockKey, LockManager};
pub use notify::{
    InMemoryNotificationSink, Notification, NotificationAck, NotificationSink, NotifyError,
    TracingNotificationSink,
};
pub use queue::{work_queue, QueueError, StepReady, WorkQueue, WorkReceiver};
pub use retry::{retry_with, RetryPolicy};
pub use timeout::{with_timeout, TimeoutError};
