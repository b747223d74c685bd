//! Audit event stream.
//!
//! Recording is fire-and-forget: a sink must never surface an error to the
//! operation that triggered the event. Sinks log their own failures.

pub mod sinks;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use sinks::{LogAuditSink, QueuedAuditSink, SqliteAuditSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A resource an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
    pub name: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: &str, id: &str, name: Option<&str>) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.to_string(),
            name: name.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub resources: Vec<ResourceRef>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: &str, severity: Severity, title: impl Into<String>) -> Self {
        Self {
            event_type: event_type.to_string(),
            severity,
            title: title.into(),
            description: String::new(),
            resources: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn resource(mut self, resource: ResourceRef) -> Self {
        self.resources.push(resource);
        self
    }
}

/// Event type names.
pub mod event_types {
    pub const GITOPS_SYNC_SUCCESS: &str = "gitops.sync.success";
    pub const GITOPS_SYNC_FAILED: &str = "gitops.sync.failed";
    pub const ENVIRONMENT_STATUS_CHANGED: &str = "environment.status_changed";
    pub const ENVIRONMENT_KEY_REGENERATED: &str = "environment.key_regenerated";
    pub const ENVIRONMENT_PAIRED: &str = "environment.paired";
    pub const CREDENTIALS_PROPAGATED: &str = "credentials.propagated";
    pub const PROJECT_DEPLOYED: &str = "project.deployed";
}

/// Sink for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let event = AuditEvent::new(event_types::GITOPS_SYNC_FAILED, Severity::Error, "Sync failed")
            .description("compose file not found")
            .resource(ResourceRef::new("gitops_sync", "s1", Some("web")));
        assert_eq!(event.resources.len(), 1);
        assert_eq!(event.severity.as_str(), "error");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "gitops.sync.failed");
        assert_eq!(json["resources"][0]["kind"], "gitops_sync");
    }
}
