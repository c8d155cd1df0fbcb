//! Audit event records
//!
//! Append-only records: immutable after enqueue. The NDJSON encoding is
//! bijective for well-formed records: encode then decode yields the same
//! event.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Broad category of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditCategory {
    /// Login, logout, API-key use
    Authentication,
    /// Allow/deny decisions
    Authorization,
    /// Object store/fetch/delete
    Storage,
    /// Snapshot create/restore/delete
    Snapshot,
    /// Backup runs and retention
    Backup,
    /// Key and ACL management
    Security,
    /// Engine lifecycle and health
    System,
}

/// Severity attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum AuditSeverity {
    /// Routine operation
    #[default]
    Info,
    /// Denied requests and degraded components
    Warning,
    /// Failed operations
    Error,
    /// Data-loss-adjacent failures
    Critical,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event id
    pub id: Uuid,
    /// UTC timestamp of enqueue
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Category
    pub category: AuditCategory,
    /// Action name, e.g. `store_object`
    pub action: String,
    /// Actor id, when authenticated
    pub actor_id: Option<String>,
    /// Actor display name
    pub actor_name: Option<String>,
    /// Resource type, e.g. `container`
    pub resource_type: Option<String>,
    /// Resource id
    pub resource_id: Option<String>,
    /// Whether the action succeeded
    pub success: bool,
    /// Severity
    pub severity: AuditSeverity,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl AuditEvent {
    /// Start a successful `Info` event; refine with the builder methods.
    pub fn new(category: AuditCategory, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            category,
            action: action.into(),
            actor_id: None,
            actor_name: None,
            resource_type: None,
            resource_id: None,
            success: true,
            severity: AuditSeverity::Info,
            metadata: HashMap::new(),
        }
    }

    /// Attach the acting identity.
    pub fn actor(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.actor_id = Some(id.into());
        self.actor_name = Some(name.into());
        self
    }

    /// Attach the affected resource.
    pub fn resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource_type = Some(kind.into());
        self.resource_id = Some(id.into());
        self
    }

    /// Mark the outcome. Failures default to `Warning` severity unless a
    /// higher one was set already.
    pub fn outcome(mut self, success: bool) -> Self {
        self.success = success;
        if !success && self.severity < AuditSeverity::Warning {
            self.severity = AuditSeverity::Warning;
        }
        self
    }

    /// Set the severity.
    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Add one metadata entry.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
