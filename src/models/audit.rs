use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event types recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    Created,
    Approved,
    Rejected,
    RequestChanges,
    Cancelled,
    Escalated,
    DelegationCreated,
    DelegationRevoked,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::Created => "created",
            AuditEvent::Approved => "approved",
            AuditEvent::Rejected => "rejected",
            AuditEvent::RequestChanges => "request_changes",
            AuditEvent::Cancelled => "cancelled",
            AuditEvent::Escalated => "escalated",
            AuditEvent::DelegationCreated => "delegation_created",
            AuditEvent::DelegationRevoked => "delegation_revoked",
        }
    }
}

/// Append-only audit trail entry, one per meaningful transition.
/// Write-only from the engine's perspective; reads are for history display.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub request_id: Option<Uuid>,
    pub tenant_id: String,
    pub event_type: String,
    pub actor_id: Option<Uuid>,
    pub actor_role: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        request_id: Option<Uuid>,
        tenant_id: &str,
        event: AuditEvent,
        actor_id: Option<Uuid>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            tenant_id: tenant_id.to_string(),
            event_type: event.as_str().to_string(),
            actor_id,
            actor_role: None,
            metadata,
            created_at: Utc::now(),
        }
    }
}
