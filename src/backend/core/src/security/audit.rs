//! Security event audit sink.
//!
//! Delivery is best effort: a failing sink is logged and counted, never
//! surfaced to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::Result;
use crate::rbac::{OrganizationId, UserId};
use crate::telemetry::AuthzMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parses an action parameter, falling back to `default`.
    pub fn from_parameter(value: Option<&Value>, default: Self) -> Self {
        match value.and_then(Value::as_str) {
            Some("low") => Self::Low,
            Some("medium") => Self::Medium,
            Some("high") => Self::High,
            Some("critical") => Self::Critical,
            _ => default,
        }
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One auditable security event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub org_id: OrganizationId,
    pub event_type: String,
    pub severity: EventSeverity,
    pub description: String,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    pub metadata: Map<String, Value>,
    pub occurred_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        org_id: OrganizationId,
        user_id: UserId,
        event_type: impl Into<String>,
        severity: EventSeverity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            org_id,
            event_type: event_type.into(),
            severity,
            description: description.into(),
            user_id,
            resource_id: None,
            resource_type: None,
            metadata: Map::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Destination for security events.
#[async_trait]
pub trait SecurityEventSink: Send + Sync {
    async fn log_security_event(&self, event: SecurityEvent) -> Result<()>;
}

/// Writes events to the `orgauth::security_audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl SecurityEventSink for TracingEventSink {
    async fn log_security_event(&self, event: SecurityEvent) -> Result<()> {
        tracing::info!(
            target: "orgauth::security_audit",
            org_id = %event.org_id,
            user_id = %event.user_id,
            event_type = %event.event_type,
            severity = %event.severity,
            resource_type = event.resource_type.as_deref().unwrap_or(""),
            resource_id = event.resource_id.as_deref().unwrap_or(""),
            "{}",
            event.description
        );
        Ok(())
    }
}

/// Buffers events in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().clone()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl SecurityEventSink for InMemoryEventSink {
    async fn log_security_event(&self, event: SecurityEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Deliver an event, swallowing sink failures.
pub async fn emit(sink: &dyn SecurityEventSink, event: SecurityEvent) -> bool {
    let event_type = event.event_type.clone();
    match sink.log_security_event(event).await {
        Ok(()) => {
            AuthzMetrics::record_security_event(&event_type, true);
            true
        }
        Err(err) => {
            tracing::warn!(event_type = %event_type, error = %err, "Failed to deliver security event");
            AuthzMetrics::record_security_event(&event_type, false);
            false
        }
    }
}
