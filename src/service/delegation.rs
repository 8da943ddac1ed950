//! Delegation lifecycle: creation with validation, revocation, listing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::audit::{AuditEvent, AuditLogEntry};
use crate::models::delegation::Delegation;
use crate::store::ApprovalStore;

#[derive(Debug, Clone)]
pub struct CreateDelegationInput {
    pub delegator_id: Uuid,
    pub delegate_id: Uuid,
    /// `None` delegates across all workflows.
    pub workflow_id: Option<Uuid>,
    pub reason: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DelegationService {
    store: Arc<dyn ApprovalStore>,
}

impl DelegationService {
    pub fn new(store: Arc<dyn ApprovalStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        tenant_id: &str,
        input: CreateDelegationInput,
    ) -> Result<Delegation, AppError> {
        if input.delegator_id == input.delegate_id {
            return Err(AppError::InvalidInput(
                "cannot delegate to yourself".into(),
            ));
        }
        if input.end_date <= input.start_date {
            return Err(AppError::InvalidInput(
                "end_date must be after start_date".into(),
            ));
        }
        if input.end_date <= Utc::now() {
            return Err(AppError::InvalidInput(
                "end_date must be in the future".into(),
            ));
        }

        if self
            .store
            .has_overlapping_delegation(
                tenant_id,
                input.delegator_id,
                input.delegate_id,
                input.workflow_id,
                input.start_date,
                input.end_date,
            )
            .await?
        {
            return Err(AppError::DelegationOverlap);
        }

        let now = Utc::now();
        let delegation = Delegation {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            delegator_id: input.delegator_id,
            delegate_id: input.delegate_id,
            workflow_id: input.workflow_id,
            reason: input.reason,
            start_date: input.start_date,
            end_date: input.end_date,
            is_active: true,
            revoked_at: None,
            revoked_by: None,
            revoke_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_delegation(&delegation).await?;

        self.record_audit(AuditLogEntry::new(
            None,
            tenant_id,
            AuditEvent::DelegationCreated,
            Some(input.delegator_id),
            json!({
                "delegation_id": delegation.id,
                "delegate_id": delegation.delegate_id,
                "workflow_id": delegation.workflow_id,
                "end_date": delegation.end_date.to_rfc3339(),
            }),
        ))
        .await;

        Ok(delegation)
    }

    /// Revoke a delegation. Only the delegator may revoke; revoking an
    /// already-revoked delegation reports `DelegationNotFound` rather than
    /// double-applying.
    pub async fn revoke(
        &self,
        tenant_id: &str,
        delegation_id: Uuid,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> Result<(), AppError> {
        let delegation = self
            .store
            .get_delegation(delegation_id)
            .await?
            .ok_or(AppError::DelegationNotFound)?;
        if delegation.tenant_id != tenant_id {
            return Err(AppError::DelegationNotFound);
        }
        if delegation.delegator_id != actor_id {
            return Err(AppError::UnauthorizedApprover);
        }

        let revoked = self
            .store
            .revoke_delegation(delegation_id, actor_id, reason, Utc::now())
            .await?;
        if !revoked {
            return Err(AppError::DelegationNotFound);
        }

        self.record_audit(AuditLogEntry::new(
            None,
            tenant_id,
            AuditEvent::DelegationRevoked,
            Some(actor_id),
            json!({"delegation_id": delegation_id}),
        ))
        .await;

        Ok(())
    }

    pub async fn list_outgoing(
        &self,
        tenant_id: &str,
        delegator_id: Uuid,
        include_expired: bool,
    ) -> Result<Vec<Delegation>, AppError> {
        self.store
            .list_delegations_by_delegator(tenant_id, delegator_id, include_expired)
            .await
    }

    pub async fn list_incoming(
        &self,
        tenant_id: &str,
        delegate_id: Uuid,
        include_expired: bool,
    ) -> Result<Vec<Delegation>, AppError> {
        self.store
            .list_delegations_by_delegate(tenant_id, delegate_id, include_expired)
            .await
    }

    async fn record_audit(&self, entry: AuditLogEntry) {
        if let Err(e) = self.store.create_audit_entry(&entry).await {
            warn!(event_type = %entry.event_type, error = %e, "audit write failed, continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    fn input(delegator: Uuid, delegate: Uuid) -> CreateDelegationInput {
        let now = Utc::now();
        CreateDelegationInput {
            delegator_id: delegator,
            delegate_id: delegate,
            workflow_id: None,
            reason: Some("vacation".into()),
            start_date: now,
            end_date: now + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn create_and_list() {
        let store = Arc::new(MemoryStore::new());
        let service = DelegationService::new(store);
        let delegator = Uuid::new_v4();
        let delegate = Uuid::new_v4();

        let delegation = service.create("acme", input(delegator, delegate)).await.unwrap();
        assert!(delegation.is_active);

        let outgoing = service.list_outgoing("acme", delegator, false).await.unwrap();
        assert_eq!(outgoing.len(), 1);
        let incoming = service.list_incoming("acme", delegate, false).await.unwrap();
        assert_eq!(incoming.len(), 1);
    }

    #[tokio::test]
    async fn self_delegation_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = DelegationService::new(store);
        let user = Uuid::new_v4();
        let err = service.create("acme", input(user, user)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn inverted_window_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = DelegationService::new(store);
        let mut bad = input(Uuid::new_v4(), Uuid::new_v4());
        bad.end_date = bad.start_date - Duration::hours(1);
        let err = service.create("acme", bad).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn past_end_date_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = DelegationService::new(store);
        let mut bad = input(Uuid::new_v4(), Uuid::new_v4());
        bad.start_date = Utc::now() - Duration::days(10);
        bad.end_date = Utc::now() - Duration::days(3);
        let err = service.create("acme", bad).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn overlapping_window_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let service = DelegationService::new(store);
        let delegator = Uuid::new_v4();
        let delegate = Uuid::new_v4();

        service.create("acme", input(delegator, delegate)).await.unwrap();
        let err = service
            .create("acme", input(delegator, delegate))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DelegationOverlap));
    }

    #[tokio::test]
    async fn revoke_is_delegator_only_and_not_repeatable() {
        let store = Arc::new(MemoryStore::new());
        let service = DelegationService::new(store);
        let delegator = Uuid::new_v4();
        let delegation = service
            .create("acme", input(delegator, Uuid::new_v4()))
            .await
            .unwrap();

        let err = service
            .revoke("acme", delegation.id, Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnauthorizedApprover));

        service
            .revoke("acme", delegation.id, delegator, Some("back early".into()))
            .await
            .unwrap();

        let err = service
            .revoke("acme", delegation.id, delegator, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DelegationNotFound));
    }

    #[tokio::test]
    async fn revoked_delegation_drops_out_of_active_lookup() {
        let store = Arc::new(MemoryStore::new());
        let service = DelegationService::new(store.clone());
        let delegator = Uuid::new_v4();
        let delegate = Uuid::new_v4();
        let delegation = service.create("acme", input(delegator, delegate)).await.unwrap();

        service.revoke("acme", delegation.id, delegator, None).await.unwrap();
        let active = store
            .find_active_delegations("acme", delegate, None, Utc::now())
            .await
            .unwrap();
        assert!(active.is_empty());
    }
}
