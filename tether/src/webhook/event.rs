//! Event taxonomy and the persisted event record.

use chrono::{DateTime, Utc};

pub const QUERY_COMPLETED: &str = "query.completed";
pub const DOCUMENT_INGESTED: &str = "document.ingested";
pub const DOCUMENT_ARCHIVED: &str = "document.archived";
pub const JOB_CLASSIFIED: &str = "job.classified";
pub const SESSION_CLEARED: &str = "session.cleared";
pub const SESSION_CLOSED: &str = "session.closed";
pub const SYSTEM_REGISTRY_REFRESHED: &str = "system.registry_refreshed";

/// An event kind: a dotted `family.name` string from the fixed taxonomy
/// (`query.*`, `document.*`, `job.*`, `session.*`, `system.*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct EventKind(pub String);

impl EventKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a subscription pattern matches this kind. Patterns are either
    /// an exact kind (`"query.completed"`) or a family wildcard (`"query.*"`).
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        if let Some(family) = pattern.strip_suffix(".*") {
            return self
                .0
                .split_once('.')
                .map(|(f, _)| f == family)
                .unwrap_or(false);
        }
        self.0 == pattern
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted event. Append-only; durably written before the producer is
/// acknowledged.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub kind: EventKind,
    /// Tenant scope of the event (single-tenant deployments use `"default"`).
    pub tenant: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(kind: &str, tenant: &str, payload: serde_json::Value) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            kind: EventKind::new(kind),
            tenant: tenant.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Exact patterns match only their kind; wildcards match the family.
    #[test]
    fn pattern_matching() {
        let kind = EventKind::new(QUERY_COMPLETED);
        assert!(kind.matches_pattern("query.completed"));
        assert!(kind.matches_pattern("query.*"));
        assert!(!kind.matches_pattern("document.*"));
        assert!(!kind.matches_pattern("query.started"));
    }

    /// **Scenario**: A kind without a family never matches a wildcard.
    #[test]
    fn wildcard_needs_family() {
        let kind = EventKind::new("malformed");
        assert!(!kind.matches_pattern("malformed.*"));
        assert!(kind.matches_pattern("malformed"));
    }
}
