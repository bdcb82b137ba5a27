//! Notification sink seam.
//!
//! The engine only requires that a notification be accepted into a queue;
//! delivery (email, chat, SMS) is the sink implementation's concern and no
//! delivery guarantee flows back to the orchestrator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification dispatch failed: {0}")]
    Dispatch(String),
}

/// One outbound notification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    /// Message template name, resolved by the delivery system.
    pub template: String,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn new(
        recipient: impl Into<String>,
        template: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            template: template.into(),
            payload,
        }
    }
}

/// Acknowledgement that a notification was queued (not delivered).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAck {
    pub reference: Uuid,
    pub queued_at: DateTime<Utc>,
}

impl NotificationAck {
    pub fn queued() -> Self {
        Self {
            reference: Uuid::new_v4(),
            queued_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Fire-and-forget enqueue; returns once the notification is accepted.
    async fn enqueue(&self, notification: Notification) -> Result<NotificationAck, NotifyError>;
}

/// Sink that records the notification in the structured log only.
#[derive(Debug, Clone, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn enqueue(&self, notification: Notification) -> Result<NotificationAck, NotifyError> {
        tracing::info!(
            recipient = %notification.recipient,
            template = %notification.template,
            "notification queued"
        );
        Ok(NotificationAck::queued())
    }
}

/// In-memory sink for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationSink {
    sent: Arc<tokio::sync::RwLock<Vec<Notification>>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn enqueue(&self, notification: Notification) -> Result<NotificationAck, NotifyError> {
        self.sent.write().await.push(notification);
        Ok(NotificationAck::queued())
    }
}
