/// Notification dispatch for workflow events.
/// Delivery is owned by a collaborator; the coordinator only builds payloads
/// and hands them to a [`NotificationSink`].
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Severity levels for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational messages
    Info,
    /// Warning messages
    Warning,
    /// Critical issues requiring immediate attention
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Event types for notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationEventType {
    /// A stage was assigned to a new user
    StageAssigned,
    /// Custom event type
    Custom(String),
}

impl std::fmt::Display for NotificationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationEventType::StageAssigned => write!(f, "StageAssigned"),
            NotificationEventType::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Message payload for notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Unique identifier for this notification
    pub id: String,
    /// Event type triggering the notification
    pub event_type: NotificationEventType,
    /// Severity level of the notification
    pub severity: Severity,
    /// User the notification is addressed to
    pub recipient: String,
    /// Title/subject of the notification
    pub title: String,
    /// Detailed message content
    pub message: String,
    /// Optional structured data
    pub data: HashMap<String, serde_json::Value>,
    /// Timestamp when notification was created
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    /// Create a new notification payload builder.
    pub fn builder() -> NotificationPayloadBuilder {
        NotificationPayloadBuilder::default()
    }
}

/// Builder for creating NotificationPayload instances.
#[derive(Default, Debug, Clone)]
pub struct NotificationPayloadBuilder {
    event_type: Option<NotificationEventType>,
    severity: Option<Severity>,
    recipient: Option<String>,
    title: Option<String>,
    message: Option<String>,
    data: HashMap<String, serde_json::Value>,
}

impl NotificationPayloadBuilder {
    /// Set the event type.
    pub fn event_type(mut self, event_type: NotificationEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Set the severity level.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Set the recipient user id.
    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Set the title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the message content.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add a data field.
    pub fn data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Build the payload. A recipient is required.
    pub fn build(self) -> Result<NotificationPayload, NotificationError> {
        let recipient = self
            .recipient
            .ok_or_else(|| NotificationError::InvalidPayload("recipient is required".into()))?;

        Ok(NotificationPayload {
            id: Uuid::new_v4().to_string(),
            event_type: self
                .event_type
                .unwrap_or_else(|| NotificationEventType::Custom("general".to_string())),
            severity: self.severity.unwrap_or(Severity::Info),
            recipient,
            title: self.title.unwrap_or_default(),
            message: self.message.unwrap_or_default(),
            data: self.data,
            timestamp: Utc::now(),
        })
    }
}

/// Errors raised while dispatching notifications.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotificationError {
    #[error("Invalid notification payload: {0}")]
    InvalidPayload(String),

    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Sink that delivers notifications to users.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification. Called once per message; no retries.
    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotificationError>;

    /// Get the name/identifier of this sink.
    fn sink_name(&self) -> &str;
}

/// Sink that emits each notification as a structured log line.
#[derive(Debug, Default, Clone)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotificationError> {
        info!(
            notification_id = %payload.id,
            event = %payload.event_type,
            severity = %payload.severity,
            recipient = %payload.recipient,
            title = %payload.title,
            "notification dispatched"
        );
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "tracing"
    }
}

/// Sink that keeps every notification in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotificationSink {
    sent: Arc<Mutex<Vec<NotificationPayload>>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications sent so far
    pub fn sent(&self) -> Vec<NotificationPayload> {
        self.sent.lock().clone()
    }

    /// Notifications addressed to one user
    pub fn sent_to(&self, recipient: &str) -> Vec<NotificationPayload> {
        self.sent
            .lock()
            .iter()
            .filter(|p| p.recipient == recipient)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotificationError> {
        self.sent.lock().push(payload.clone());
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_recipient() {
        let result = NotificationPayload::builder().title("Hello").build();
        assert!(matches!(result, Err(NotificationError::InvalidPayload(_))));
    }

    #[test]
    fn test_builder_defaults() {
        let payload = NotificationPayload::builder()
            .recipient("user-1")
            .event_type(NotificationEventType::StageAssigned)
            .data("workflow_id", "wf-1")
            .build()
            .unwrap();

        assert_eq!(payload.severity, Severity::Info);
        assert_eq!(payload.event_type.to_string(), "StageAssigned");
        assert_eq!(payload.data["workflow_id"], "wf-1");
    }

    #[tokio::test]
    async fn test_memory_sink_records() {
        let sink = MemoryNotificationSink::new();
        let payload = NotificationPayload::builder()
            .recipient("user-2")
            .build()
            .unwrap();

        sink.send(&payload).await.unwrap();
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(sink.sent_to("user-2").len(), 1);
        assert!(sink.sent_to("user-1").is_empty());

        sink.clear();
        assert!(sink.sent().is_empty());
    }
}
