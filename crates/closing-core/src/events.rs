//! Domain events emitted by the closure engine for external consumers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppResult;

/// One domain event, e.g. "period.started" or "step.completed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub id: Uuid,
    /// Event type (e.g. "period.pending_approval")
    pub event_type: String,
    /// Timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
    /// Event payload
    pub payload: serde_json::Value,
    /// Metadata for the event
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new<T: Serialize>(event_type: impl Into<String>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check if the event matches a given type pattern.
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix(".*") {
            return self.event_type.starts_with(prefix);
        }
        self.event_type == pattern
    }
}

/// Outbound seam for domain events. Delivery semantics belong to the
/// implementation; the engine only promises to publish after the
/// corresponding state transition has been committed.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event) -> AppResult<()>;
}

/// Publisher that drops every event. Default when no integration is wired.
#[derive(Debug, Clone, Default)]
pub struct NullEventPublisher;

#[async_trait]
impl EventPublisher for NullEventPublisher {
    async fn publish(&self, event: Event) -> AppResult<()> {
        tracing::trace!(event_type = %event.event_type, "event dropped (null publisher)");
        Ok(())
    }
}

/// In-memory publisher, used by tests and local tooling.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    events: Arc<tokio::sync::RwLock<Vec<Event>>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    pub async fn matching(&self, pattern: &str) -> Vec<Event> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.matches(pattern))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: Event) -> AppResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_matches() {
        let event = Event::new("period.started", serde_json::json!({}));

        assert!(event.matches("*"));
        assert!(event.matches("period.started"));
        assert!(event.matches("period.*"));
        assert!(!event.matches("step.*"));
        assert!(!event.matches("period.closed"));
    }

    #[tokio::test]
    async fn test_in_memory_publisher() {
        let publisher = InMemoryEventPublisher::new();

        publisher
            .publish(Event::new("step.completed", serde_json::json!({"code": "dep.compute"})))
            .await
            .unwrap();
        publisher
            .publish(Event::new("period.pending_approval", serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(publisher.events().await.len(), 2);
        assert_eq!(publisher.matching("step.*").await.len(), 1);
    }
}
