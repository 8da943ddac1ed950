//! Approval request lifecycle: creation, decision, cancellation.
//!
//! All state transitions route through the store's transactional primitives;
//! this layer owns policy (trigger evaluation, authorization, self-approval
//! rules) and the audit/event emission that follows a committed transition.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::authority::{AuthorityCheck, AuthorityVerifier};
use crate::errors::AppError;
use crate::events::{ApprovalEvent, EventPublisher};
use crate::models::audit::{AuditEvent, AuditLogEntry};
use crate::models::decision::{Decision, DecisionKind};
use crate::models::request::{ApprovalRequest, RequestStatus, PRIORITY_NORMAL};
use crate::models::workflow::Workflow;
use crate::roles::RoleTable;
use crate::store::{ApprovalStore, RequestFilter};
use crate::trigger;

use super::workflow_name_for_action;

/// Outcome of asking whether an action needs approval, without creating
/// anything.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckResult {
    pub approval_required: bool,
    pub auto_approved: bool,
    pub required_role: Option<String>,
    pub workflow_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct CreateRequestInput {
    pub requester_id: Uuid,
    pub requester_name: Option<String>,
    pub action_type: String,
    pub action_data: serde_json::Value,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub reason: Option<String>,
    pub priority: Option<String>,
}

/// Admin patch of a workflow's configuration. `None` fields are left as-is.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct WorkflowPatch {
    pub trigger_config: Option<serde_json::Value>,
    pub approver_config: Option<serde_json::Value>,
    pub timeout_hours: Option<i32>,
    pub escalation_config: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

/// How an actor was authorized to decide a request.
struct Authorization {
    role_label: String,
    delegated_from: Option<Uuid>,
}

#[derive(Clone)]
pub struct ApprovalService {
    store: Arc<dyn ApprovalStore>,
    events: EventPublisher,
    roles: RoleTable,
    verifier: Arc<dyn AuthorityVerifier>,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        events: EventPublisher,
        roles: RoleTable,
        verifier: Arc<dyn AuthorityVerifier>,
    ) -> Self {
        Self {
            store,
            events,
            roles,
            verifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn ApprovalStore> {
        &self.store
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn roles(&self) -> &RoleTable {
        &self.roles
    }

    // ── Check & create ───────────────────────────────────────

    /// Does `action_type` with this payload need approval? No workflow for
    /// the action means no approval is required.
    pub async fn check(
        &self,
        tenant_id: &str,
        action_type: &str,
        action_data: &serde_json::Value,
    ) -> Result<CheckResult, AppError> {
        let name = workflow_name_for_action(action_type);
        let Some(workflow) = self.store.get_workflow_by_name(tenant_id, name).await? else {
            return Ok(CheckResult {
                approval_required: false,
                auto_approved: false,
                required_role: None,
                workflow_id: None,
            });
        };

        let outcome = trigger::evaluate(&workflow, action_data, &self.roles);
        Ok(CheckResult {
            approval_required: outcome.requires_approval,
            auto_approved: outcome.auto_approved,
            required_role: outcome.required_role,
            workflow_id: Some(workflow.id),
        })
    }

    /// Create an approval request for an action. When the trigger resolves
    /// to auto-approve (or to no approval at all), the request is persisted
    /// directly in `approved` with an execution token, so the caller always
    /// gets a decided-or-pending record back.
    pub async fn create_request(
        &self,
        tenant_id: &str,
        input: CreateRequestInput,
    ) -> Result<ApprovalRequest, AppError> {
        let name = workflow_name_for_action(&input.action_type);
        let workflow = self
            .store
            .get_workflow_by_name(tenant_id, name)
            .await?
            .ok_or(AppError::WorkflowNotFound)?;

        let outcome = trigger::evaluate(&workflow, &input.action_data, &self.roles);
        let now = Utc::now();
        let auto = !outcome.requires_approval;

        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            workflow_id: workflow.id,
            requester_id: input.requester_id,
            requester_name: input.requester_name,
            status: if auto {
                RequestStatus::Approved
            } else {
                RequestStatus::Pending
            },
            version: 1,
            action_type: input.action_type,
            action_data: input.action_data,
            resource_type: input.resource_type,
            resource_id: input.resource_id,
            reason: input.reason,
            priority: input.priority.unwrap_or_else(|| PRIORITY_NORMAL.to_string()),
            current_approver_id: None,
            current_approver_role: outcome.required_role,
            escalation_level: 0,
            escalated_at: None,
            escalated_from_id: None,
            execution_id: auto.then(Uuid::new_v4),
            expires_at: now + Duration::hours(workflow.timeout_hours as i64),
            created_at: now,
            updated_at: now,
        };

        self.store.create_request(&request).await?;

        self.record_audit(AuditLogEntry::new(
            Some(request.id),
            tenant_id,
            AuditEvent::Created,
            Some(request.requester_id),
            json!({
                "action_type": request.action_type,
                "workflow": workflow.name,
                "auto_approved": auto,
            }),
        ))
        .await;

        if auto {
            self.events.publish(ApprovalEvent::granted(
                &request,
                request.requester_id,
                "auto_approved",
            ));
        } else {
            self.events.publish(ApprovalEvent::requested(&request));
        }

        Ok(request)
    }

    // ── Decide ───────────────────────────────────────────────

    pub async fn decide(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        actor_role: &str,
        kind: DecisionKind,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, AppError> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or(AppError::RequestNotFound)?;

        if !kind.allowed_from().contains(&request.status) {
            return Err(AppError::RequestAlreadyDecided);
        }

        let workflow = self
            .store
            .get_workflow(request.workflow_id)
            .await?
            .ok_or(AppError::WorkflowNotFound)?;

        if kind == DecisionKind::Approve
            && actor_id == request.requester_id
            && workflow.require_different_user()
        {
            return Err(AppError::SelfApprovalNotAllowed);
        }

        let authorization = self
            .authorize(&request, &workflow, actor_id, actor_role)
            .await?;

        let execution_id = (kind == DecisionKind::Approve).then(Uuid::new_v4);
        let decision = Decision::new(
            request_id,
            actor_id,
            authorization.role_label.clone(),
            authorization.delegated_from,
            kind,
            comment.clone(),
        );

        // The store re-checks status and version inside one transaction, so
        // a racing decision surfaces here, never as a duplicate row.
        let updated = self
            .store
            .commit_decision(
                request_id,
                &decision,
                kind.target_status(),
                kind.allowed_from(),
                execution_id,
            )
            .await?;

        let audit_event = match kind {
            DecisionKind::Approve => AuditEvent::Approved,
            DecisionKind::Reject => AuditEvent::Rejected,
            DecisionKind::RequestChanges => AuditEvent::RequestChanges,
        };
        self.record_audit(AuditLogEntry::new(
            Some(request_id),
            &updated.tenant_id,
            audit_event,
            Some(actor_id),
            json!({
                "decision_id": decision.id,
                "role": authorization.role_label,
                "delegated_from": authorization.delegated_from,
                "comment": comment,
            }),
        ))
        .await;

        let event = match kind {
            DecisionKind::Approve => {
                ApprovalEvent::granted(&updated, actor_id, &authorization.role_label)
            }
            DecisionKind::Reject => ApprovalEvent::rejected(&updated, actor_id, comment.as_deref()),
            DecisionKind::RequestChanges => {
                ApprovalEvent::changes_requested(&updated, actor_id, comment.as_deref())
            }
        };
        self.events.publish(event);

        Ok(updated)
    }

    /// Resolve whether the actor may decide this request: literal role
    /// comparison first, then delegated authority. Delegations are tried
    /// most-recently-created first; each delegator's current standing is
    /// re-verified before their authority is exercised.
    async fn authorize(
        &self,
        request: &ApprovalRequest,
        workflow: &Workflow,
        actor_id: Uuid,
        actor_role: &str,
    ) -> Result<Authorization, AppError> {
        let required = request
            .current_approver_role
            .clone()
            .unwrap_or_else(|| workflow.default_approver_role());

        if self.roles.satisfies(actor_role, &required) {
            return Ok(Authorization {
                role_label: actor_role.to_string(),
                delegated_from: None,
            });
        }

        let delegations = self
            .store
            .find_active_delegations(
                &request.tenant_id,
                actor_id,
                Some(request.workflow_id),
                Utc::now(),
            )
            .await?;

        for delegation in &delegations {
            match self
                .verifier
                .verify(&request.tenant_id, delegation.delegator_id, &required)
                .await
            {
                AuthorityCheck::Valid { role } => {
                    return Ok(Authorization {
                        role_label: format!("{role} (delegated)"),
                        delegated_from: Some(delegation.delegator_id),
                    });
                }
                AuthorityCheck::Denied | AuthorityCheck::Unavailable => {
                    // This delegator cannot vouch right now; try the next.
                    continue;
                }
            }
        }

        Err(AppError::UnauthorizedApprover)
    }

    // ── Cancel & reads ───────────────────────────────────────

    /// Only the original requester may cancel, and only while pending.
    pub async fn cancel(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
    ) -> Result<ApprovalRequest, AppError> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or(AppError::RequestNotFound)?;

        if request.requester_id != actor_id {
            return Err(AppError::NotRequester);
        }
        if request.status != RequestStatus::Pending {
            return Err(AppError::RequestAlreadyDecided);
        }

        let updated = self
            .store
            .update_request_status(&request, RequestStatus::Cancelled)
            .await?;

        self.record_audit(AuditLogEntry::new(
            Some(request_id),
            &updated.tenant_id,
            AuditEvent::Cancelled,
            Some(actor_id),
            json!({}),
        ))
        .await;
        self.events.publish(ApprovalEvent::cancelled(&updated));

        Ok(updated)
    }

    pub async fn get_request(&self, id: Uuid) -> Result<ApprovalRequest, AppError> {
        self.store
            .get_request(id)
            .await?
            .ok_or(AppError::RequestNotFound)
    }

    pub async fn list_requests(
        &self,
        tenant_id: &str,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, AppError> {
        self.store.list_requests(tenant_id, filter).await
    }

    pub async fn list_my_requests(
        &self,
        tenant_id: &str,
        requester_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ApprovalRequest>, AppError> {
        self.store
            .list_requests_by_requester(tenant_id, requester_id, limit, offset)
            .await
    }

    pub async fn request_history(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<crate::models::audit::AuditLogEntry>, AppError> {
        // Existence check first so an unknown id is a 404, not an empty list.
        self.store
            .get_request(request_id)
            .await?
            .ok_or(AppError::RequestNotFound)?;
        self.store.request_history(request_id).await
    }

    // ── Workflow admin ───────────────────────────────────────

    pub async fn list_workflows(&self, tenant_id: &str) -> Result<Vec<Workflow>, AppError> {
        self.store.list_workflows(tenant_id).await
    }

    pub async fn update_workflow(
        &self,
        tenant_id: &str,
        workflow_id: Uuid,
        patch: WorkflowPatch,
    ) -> Result<Workflow, AppError> {
        let mut workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or(AppError::WorkflowNotFound)?;
        if workflow.tenant_id != tenant_id {
            return Err(AppError::WorkflowNotFound);
        }

        if let Some(trigger_config) = patch.trigger_config {
            workflow.trigger_config = trigger_config;
        }
        if let Some(approver_config) = patch.approver_config {
            workflow.approver_config = approver_config;
        }
        if let Some(timeout_hours) = patch.timeout_hours {
            if timeout_hours <= 0 {
                return Err(AppError::InvalidInput(
                    "timeout_hours must be positive".into(),
                ));
            }
            workflow.timeout_hours = timeout_hours;
        }
        if let Some(escalation_config) = patch.escalation_config {
            workflow.escalation_config = Some(escalation_config);
        }
        if let Some(is_active) = patch.is_active {
            workflow.is_active = is_active;
        }
        workflow.updated_at = Utc::now();

        self.store.update_workflow(&workflow).await?;
        Ok(workflow)
    }

    /// Audit writes never fail the operation that produced them.
    async fn record_audit(&self, entry: AuditLogEntry) {
        if let Err(e) = self.store.create_audit_entry(&entry).await {
            warn!(
                event_type = %entry.event_type,
                error = %e,
                "audit write failed, continuing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::TrustingVerifier;
    use crate::models::delegation::Delegation;
    use crate::store::memory::MemoryStore;
    use std::sync::Mutex;

    fn service_with(store: Arc<MemoryStore>) -> ApprovalService {
        ApprovalService::new(
            store,
            EventPublisher::disabled(),
            RoleTable::default(),
            Arc::new(TrustingVerifier),
        )
    }

    fn service_with_verifier(
        store: Arc<MemoryStore>,
        verifier: Arc<dyn AuthorityVerifier>,
    ) -> ApprovalService {
        ApprovalService::new(store, EventPublisher::disabled(), RoleTable::default(), verifier)
    }

    fn refund_workflow(tenant: &str) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: Uuid::new_v4(),
            tenant_id: tenant.into(),
            name: "refund_approval".into(),
            display_name: "Refund Approval".into(),
            description: None,
            trigger_type: "threshold".into(),
            trigger_config: json!({
                "field": "amount",
                "thresholds": [
                    {"max": 1000.0, "auto_approve": true},
                    {"max": 5000.0, "approver_role": "manager"},
                    {"approver_role": "admin"}
                ]
            }),
            approver_config: json!({"default_role": "manager"}),
            approval_chain: None,
            timeout_hours: 72,
            escalation_config: None,
            is_active: true,
            is_system: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn create_input(requester_id: Uuid, amount: i64) -> CreateRequestInput {
        CreateRequestInput {
            requester_id,
            requester_name: Some("Sam".into()),
            action_type: "order.refund".into(),
            action_data: json!({"amount": amount}),
            resource_type: Some("order".into()),
            resource_id: Some(Uuid::new_v4()),
            reason: Some("customer complaint".into()),
            priority: None,
        }
    }

    async fn pending_request(
        service: &ApprovalService,
        store: &MemoryStore,
        amount: i64,
    ) -> (ApprovalRequest, Uuid) {
        let workflow = refund_workflow("acme");
        store.create_workflow(&workflow).await.unwrap();
        let requester = Uuid::new_v4();
        let request = service
            .create_request("acme", create_input(requester, amount))
            .await
            .unwrap();
        (request, requester)
    }

    fn delegation_between(delegator: Uuid, delegate: Uuid) -> Delegation {
        let now = Utc::now();
        Delegation {
            id: Uuid::new_v4(),
            tenant_id: "acme".into(),
            delegator_id: delegator,
            delegate_id: delegate,
            workflow_id: None,
            reason: None,
            start_date: now - Duration::hours(1),
            end_date: now + Duration::hours(24),
            is_active: true,
            revoked_at: None,
            revoked_by: None,
            revoke_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn check_reports_no_approval_without_workflow() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store);
        let result = service
            .check("acme", "order.refund", &json!({"amount": 3000}))
            .await
            .unwrap();
        assert!(!result.approval_required);
        assert!(result.workflow_id.is_none());
    }

    #[tokio::test]
    async fn check_resolves_role_from_threshold() {
        let store = Arc::new(MemoryStore::new());
        store.create_workflow(&refund_workflow("acme")).await.unwrap();
        let service = service_with(store);

        let result = service
            .check("acme", "order.refund", &json!({"amount": 3000}))
            .await
            .unwrap();
        assert!(result.approval_required);
        assert_eq!(result.required_role.as_deref(), Some("manager"));
    }

    #[tokio::test]
    async fn tenant_workflow_shadows_system_workflow() {
        let store = Arc::new(MemoryStore::new());
        let mut system = refund_workflow("system");
        system.approver_config = json!({"default_role": "owner"});
        system.trigger_type = "always".into();
        store.create_workflow(&system).await.unwrap();
        store.create_workflow(&refund_workflow("acme")).await.unwrap();
        let service = service_with(store);

        let result = service
            .check("acme", "order.refund", &json!({"amount": 3000}))
            .await
            .unwrap();
        assert_eq!(result.required_role.as_deref(), Some("manager"));
    }

    #[tokio::test]
    async fn create_without_workflow_fails() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store);
        let err = service
            .create_request("acme", create_input(Uuid::new_v4(), 3000))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::WorkflowNotFound));
    }

    #[tokio::test]
    async fn create_pins_role_and_expiry() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, _) = pending_request(&service, &store, 3000).await;

        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.current_approver_role.as_deref(), Some("manager"));
        assert_eq!(request.version, 1);
        let hours = (request.expires_at - request.created_at).num_hours();
        assert_eq!(hours, 72);
        assert!(store.audit_events().contains(&"created".to_string()));
    }

    #[tokio::test]
    async fn create_auto_approves_below_threshold() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, _) = pending_request(&service, &store, 500).await;

        assert_eq!(request.status, RequestStatus::Approved);
        assert!(request.execution_id.is_some());
    }

    #[tokio::test]
    async fn approve_with_sufficient_role() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, _) = pending_request(&service, &store, 3000).await;

        let approver = Uuid::new_v4();
        let updated = service
            .decide(request.id, approver, "manager", DecisionKind::Approve, None)
            .await
            .unwrap();

        assert_eq!(updated.status, RequestStatus::Approved);
        assert_eq!(updated.version, 2);
        assert!(updated.execution_id.is_some());
        let decisions = store.decisions_for(request.id);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].approver_role, "manager");
        assert!(decisions[0].delegated_from.is_none());
    }

    #[tokio::test]
    async fn higher_role_qualifies_without_exact_match() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, _) = pending_request(&service, &store, 3000).await;

        let updated = service
            .decide(request.id, Uuid::new_v4(), "owner", DecisionKind::Approve, None)
            .await
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn lower_role_without_delegation_is_unauthorized() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, _) = pending_request(&service, &store, 3000).await;

        let err = service
            .decide(request.id, Uuid::new_v4(), "viewer", DecisionKind::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnauthorizedApprover));
    }

    #[tokio::test]
    async fn self_approval_blocked_by_default() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, requester) = pending_request(&service, &store, 3000).await;

        let err = service
            .decide(request.id, requester, "admin", DecisionKind::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SelfApprovalNotAllowed));
    }

    #[tokio::test]
    async fn self_approval_allowed_when_flag_disabled() {
        let store = Arc::new(MemoryStore::new());
        let mut workflow = refund_workflow("acme");
        workflow.approver_config =
            json!({"default_role": "manager", "require_different_user": false});
        store.create_workflow(&workflow).await.unwrap();
        let service = service_with(store.clone());

        let requester = Uuid::new_v4();
        let request = service
            .create_request("acme", create_input(requester, 3000))
            .await
            .unwrap();
        let updated = service
            .decide(request.id, requester, "manager", DecisionKind::Approve, None)
            .await
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn self_rejection_is_always_allowed() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, requester) = pending_request(&service, &store, 3000).await;

        let updated = service
            .decide(request.id, requester, "manager", DecisionKind::Reject, None)
            .await
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn deciding_terminal_request_fails_for_every_terminal_status() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());

        for status in [
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
            RequestStatus::Expired,
            RequestStatus::EmergencyExecuted,
        ] {
            let (request, _) = pending_request(&service, &store, 3000).await;
            let loaded = store.get_request(request.id).await.unwrap().unwrap();
            store.update_request_status(&loaded, status).await.unwrap();

            let err = service
                .decide(request.id, Uuid::new_v4(), "owner", DecisionKind::Approve, None)
                .await
                .unwrap_err();
            assert!(
                matches!(err, AppError::RequestAlreadyDecided),
                "approve from {status:?}"
            );
        }
    }

    #[tokio::test]
    async fn request_changes_can_repeat_but_approve_cannot_follow() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, _) = pending_request(&service, &store, 3000).await;

        let approver = Uuid::new_v4();
        service
            .decide(
                request.id,
                approver,
                "manager",
                DecisionKind::RequestChanges,
                Some("add receipts".into()),
            )
            .await
            .unwrap();
        service
            .decide(
                request.id,
                approver,
                "manager",
                DecisionKind::RequestChanges,
                Some("still missing".into()),
            )
            .await
            .unwrap();

        let err = service
            .decide(request.id, approver, "manager", DecisionKind::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RequestAlreadyDecided));
        assert_eq!(store.decisions_for(request.id).len(), 2);
    }

    #[tokio::test]
    async fn concurrent_decides_produce_exactly_one_decision() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, _) = pending_request(&service, &store, 3000).await;

        let (a, b) = tokio::join!(
            service.decide(request.id, Uuid::new_v4(), "manager", DecisionKind::Approve, None),
            service.decide(request.id, Uuid::new_v4(), "manager", DecisionKind::Reject, None),
        );

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        assert_eq!(store.decisions_for(request.id).len(), 1);
        for result in [a, b] {
            if let Err(e) = result {
                assert!(matches!(
                    e,
                    AppError::RequestAlreadyDecided | AppError::VersionConflict
                ));
            }
        }
    }

    #[tokio::test]
    async fn delegation_authorizes_lower_role() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, _) = pending_request(&service, &store, 3000).await;

        let delegator = Uuid::new_v4();
        let delegate = Uuid::new_v4();
        store
            .create_delegation(&delegation_between(delegator, delegate))
            .await
            .unwrap();

        let updated = service
            .decide(request.id, delegate, "viewer", DecisionKind::Approve, None)
            .await
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Approved);

        let decisions = store.decisions_for(request.id);
        assert_eq!(decisions[0].approver_role, "manager (delegated)");
        assert_eq!(decisions[0].delegated_from, Some(delegator));
    }

    struct DenyingVerifier;

    #[async_trait::async_trait]
    impl AuthorityVerifier for DenyingVerifier {
        async fn verify(&self, _: &str, _: Uuid, _: &str) -> AuthorityCheck {
            AuthorityCheck::Denied
        }
    }

    #[tokio::test]
    async fn delegation_fails_when_delegator_standing_dropped() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with_verifier(store.clone(), Arc::new(DenyingVerifier));
        let (request, _) = pending_request(&service, &store, 3000).await;

        let delegate = Uuid::new_v4();
        store
            .create_delegation(&delegation_between(Uuid::new_v4(), delegate))
            .await
            .unwrap();

        let err = service
            .decide(request.id, delegate, "viewer", DecisionKind::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnauthorizedApprover));
    }

    /// Answers per call, in order. Re-derivation means the same delegation
    /// stops authorizing once the delegator's verified standing drops.
    struct SequencedVerifier {
        answers: Mutex<Vec<AuthorityCheck>>,
    }

    #[async_trait::async_trait]
    impl AuthorityVerifier for SequencedVerifier {
        async fn verify(&self, _: &str, _: Uuid, _: &str) -> AuthorityCheck {
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                AuthorityCheck::Denied
            } else {
                answers.remove(0)
            }
        }
    }

    #[tokio::test]
    async fn delegated_authority_is_rederived_each_decision() {
        let store = Arc::new(MemoryStore::new());
        let verifier = Arc::new(SequencedVerifier {
            answers: Mutex::new(vec![AuthorityCheck::Valid { role: "manager".into() }]),
        });
        let service = service_with_verifier(store.clone(), verifier);

        let delegate = Uuid::new_v4();
        store
            .create_delegation(&delegation_between(Uuid::new_v4(), delegate))
            .await
            .unwrap();

        let (first, _) = pending_request(&service, &store, 3000).await;
        service
            .decide(first.id, delegate, "viewer", DecisionKind::Approve, None)
            .await
            .unwrap();

        // Same delegation, but the delegator no longer verifies.
        let requester = Uuid::new_v4();
        let second = service
            .create_request("acme", create_input(requester, 3000))
            .await
            .unwrap();
        let err = service
            .decide(second.id, delegate, "viewer", DecisionKind::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnauthorizedApprover));
    }

    #[tokio::test]
    async fn most_recent_delegation_is_tried_first() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, _) = pending_request(&service, &store, 3000).await;

        let delegate = Uuid::new_v4();
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        let mut first = delegation_between(older, delegate);
        first.created_at = Utc::now() - Duration::hours(5);
        store.create_delegation(&first).await.unwrap();
        store
            .create_delegation(&delegation_between(newer, delegate))
            .await
            .unwrap();

        service
            .decide(request.id, delegate, "viewer", DecisionKind::Approve, None)
            .await
            .unwrap();
        assert_eq!(store.decisions_for(request.id)[0].delegated_from, Some(newer));
    }

    #[tokio::test]
    async fn cancel_requires_requester() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, requester) = pending_request(&service, &store, 3000).await;

        let err = service.cancel(request.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotRequester));

        let updated = service.cancel(request.id, requester).await.unwrap();
        assert_eq!(updated.status, RequestStatus::Cancelled);
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn cancel_after_decision_fails() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        let (request, requester) = pending_request(&service, &store, 3000).await;

        service
            .decide(request.id, Uuid::new_v4(), "manager", DecisionKind::Approve, None)
            .await
            .unwrap();
        let err = service.cancel(request.id, requester).await.unwrap_err();
        assert!(matches!(err, AppError::RequestAlreadyDecided));
    }

    #[tokio::test]
    async fn history_of_unknown_request_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store);
        let err = service.request_history(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::RequestNotFound));
    }

    #[tokio::test]
    async fn update_workflow_patches_and_checks_tenant() {
        let store = Arc::new(MemoryStore::new());
        let workflow = refund_workflow("acme");
        store.create_workflow(&workflow).await.unwrap();
        let service = service_with(store.clone());

        let patch = WorkflowPatch {
            timeout_hours: Some(24),
            is_active: Some(false),
            ..Default::default()
        };
        let updated = service
            .update_workflow("acme", workflow.id, patch.clone())
            .await
            .unwrap();
        assert_eq!(updated.timeout_hours, 24);
        assert!(!updated.is_active);

        let err = service
            .update_workflow("other-tenant", workflow.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::WorkflowNotFound));
    }
}
