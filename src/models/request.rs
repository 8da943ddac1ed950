use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an approval request.
///
/// `Pending` is the only state decisions are accepted from (plus
/// `RequestChanges` for a repeated request-changes decision). Everything
/// except `Pending` and `RequestChanges` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    RequestChanges,
    Cancelled,
    Expired,
    EmergencyExecuted,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending | RequestStatus::RequestChanges)
    }

    /// The legal edges of the state machine. Any transition not listed here
    /// is rejected structurally rather than by scattered status checks.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        match self {
            Pending => matches!(
                next,
                Approved | Rejected | RequestChanges | Cancelled | Expired | EmergencyExecuted
            ),
            // A request sitting in request_changes can accumulate further
            // request-changes decisions, but nothing reaches back to pending.
            RequestChanges => matches!(next, RequestChanges),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::RequestChanges => "request_changes",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Expired => "expired",
            RequestStatus::EmergencyExecuted => "emergency_executed",
        }
    }
}

/// Priority labels carried on requests. Informational only; the engine does
/// not order work by priority.
pub const PRIORITY_NORMAL: &str = "normal";

/// One pending-or-decided approval instance.
///
/// Mutated only through the store's transition operations; never physically
/// deleted. `version` is the optimistic-concurrency token and increases by
/// exactly 1 on every successful mutation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tenant_id: String,
    pub workflow_id: Uuid,
    pub requester_id: Uuid,
    pub requester_name: Option<String>,
    pub status: RequestStatus,
    pub version: i32,

    // Action details, immutable after creation.
    pub action_type: String,
    pub action_data: serde_json::Value,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,

    pub reason: Option<String>,
    pub priority: String,

    pub current_approver_id: Option<Uuid>,
    pub current_approver_role: Option<String>,

    pub escalation_level: i32,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalated_from_id: Option<Uuid>,

    /// Idempotency token handed to whatever executes the approved action.
    pub execution_id: Option<Uuid>,

    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
