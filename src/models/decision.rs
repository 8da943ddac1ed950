use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::RequestStatus;

/// The three decision verbs an approver can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Reject,
    RequestChanges,
}

impl DecisionKind {
    /// The status the request transitions to when this decision commits.
    pub fn target_status(self) -> RequestStatus {
        match self {
            DecisionKind::Approve => RequestStatus::Approved,
            DecisionKind::Reject => RequestStatus::Rejected,
            DecisionKind::RequestChanges => RequestStatus::RequestChanges,
        }
    }

    /// The statuses this decision is accepted from. Approve and reject only
    /// finalize a pending request; request-changes may repeat.
    pub fn allowed_from(self) -> &'static [RequestStatus] {
        match self {
            DecisionKind::Approve | DecisionKind::Reject => &[RequestStatus::Pending],
            DecisionKind::RequestChanges => {
                &[RequestStatus::Pending, RequestStatus::RequestChanges]
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionKind::Approve => "approve",
            DecisionKind::Reject => "reject",
            DecisionKind::RequestChanges => "request_changes",
        }
    }
}

/// Immutable append-only record of one approve/reject/request-changes
/// action. A request may accumulate several of these across request-changes
/// loops, but at most one approve-or-reject row ever finalizes it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Decision {
    pub id: Uuid,
    pub request_id: Uuid,
    pub approver_id: Uuid,
    /// Role the decision was made under. Suffixed with " (delegated)" when
    /// authorization came through a delegation.
    pub approver_role: String,
    /// The delegator whose authority was exercised, when delegated.
    pub delegated_from: Option<Uuid>,
    pub decision: DecisionKind,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(
        request_id: Uuid,
        approver_id: Uuid,
        approver_role: String,
        delegated_from: Option<Uuid>,
        decision: DecisionKind,
        comment: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            approver_id,
            approver_role,
            delegated_from,
            decision,
            comment,
            decided_at: Utc::now(),
        }
    }
}
