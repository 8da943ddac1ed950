use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-bounded grant of approval authority from a delegator to a
/// delegate, optionally scoped to one workflow (`None` = all workflows).
///
/// A delegation is not itself an authorization: the delegator's current
/// standing is re-checked at use time, so authority cannot be replayed after
/// the delegator's own privileges are reduced.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delegation {
    pub id: Uuid,
    pub tenant_id: String,
    pub delegator_id: Uuid,
    pub delegate_id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub reason: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<Uuid>,
    pub revoke_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationState {
    Active,
    Scheduled,
    Expired,
    Revoked,
}

impl Delegation {
    /// Whether the delegation grants authority at `now`:
    /// active, not revoked, and `start_date <= now < end_date`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.revoked_at.is_none()
            && self.start_date <= now
            && now < self.end_date
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> DelegationState {
        if self.revoked_at.is_some() || !self.is_active {
            return DelegationState::Revoked;
        }
        if now < self.start_date {
            return DelegationState::Scheduled;
        }
        if now >= self.end_date {
            return DelegationState::Expired;
        }
        DelegationState::Active
    }
}
