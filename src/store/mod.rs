//! Persistence contract for the approval engine.
//!
//! All correctness under concurrency is pushed down here: decision commits
//! use an optimistic version compare-and-swap inside one transaction, and
//! escalation advancement uses a try-claim primitive that concurrent workers
//! lose gracefully (skip, never block or overwrite).

pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::audit::AuditLogEntry;
use crate::models::decision::Decision;
use crate::models::delegation::Delegation;
use crate::models::request::{ApprovalRequest, RequestStatus};
use crate::models::workflow::Workflow;

/// Fields applied when a request advances one escalation level.
#[derive(Debug, Clone)]
pub struct EscalationUpdate {
    pub escalation_level: i32,
    pub escalated_at: DateTime<Utc>,
    pub escalated_from_id: Option<Uuid>,
    pub current_approver_role: String,
}

/// Slim view of a request expired by the bulk sweep, enough to publish the
/// expiry event.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExpiredRequest {
    pub id: Uuid,
    pub tenant_id: String,
    pub workflow_id: Uuid,
    pub requester_id: Uuid,
    pub action_type: String,
}

/// Filters for listing requests within a tenant.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub approver_role: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    // ── Workflows ────────────────────────────────────────────

    /// Look up a workflow by (tenant, name), falling back to the shared
    /// `system` scope. A tenant-specific workflow is always preferred.
    async fn get_workflow_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Option<Workflow>, AppError>;

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, AppError>;

    async fn list_workflows(&self, tenant_id: &str) -> Result<Vec<Workflow>, AppError>;

    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), AppError>;

    /// Admin update of a workflow's configuration. Errors with
    /// `WorkflowNotFound` when no row matches.
    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), AppError>;

    // ── Requests ─────────────────────────────────────────────

    async fn create_request(&self, request: &ApprovalRequest) -> Result<(), AppError>;

    async fn get_request(&self, id: Uuid) -> Result<Option<ApprovalRequest>, AppError>;

    async fn list_requests(
        &self,
        tenant_id: &str,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, AppError>;

    async fn list_requests_by_requester(
        &self,
        tenant_id: &str,
        requester_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ApprovalRequest>, AppError>;

    /// Atomically commit a decision: within one transaction, re-load the
    /// request, verify its status is in `allowed_from`, append the decision
    /// row, and transition the status with a version compare-and-swap.
    /// `execution_id`, when set, is stamped onto the request (approvals hand
    /// it to whatever executes the action).
    ///
    /// Errors: `RequestNotFound`, `RequestAlreadyDecided` (status no longer
    /// eligible), `VersionConflict` (CAS lost against a concurrent writer,
    /// never a silent no-op). Returns the updated request.
    async fn commit_decision(
        &self,
        request_id: Uuid,
        decision: &Decision,
        new_status: RequestStatus,
        allowed_from: &[RequestStatus],
        execution_id: Option<Uuid>,
    ) -> Result<ApprovalRequest, AppError>;

    /// Transition a request's status conditioned on the version read at load
    /// time. Zero rows affected surfaces as `VersionConflict`.
    async fn update_request_status(
        &self,
        request: &ApprovalRequest,
        new_status: RequestStatus,
    ) -> Result<ApprovalRequest, AppError>;

    // ── Audit ────────────────────────────────────────────────

    async fn create_audit_entry(&self, entry: &AuditLogEntry) -> Result<(), AppError>;

    async fn request_history(&self, request_id: Uuid) -> Result<Vec<AuditLogEntry>, AppError>;

    // ── Delegations ──────────────────────────────────────────

    async fn create_delegation(&self, delegation: &Delegation) -> Result<(), AppError>;

    async fn get_delegation(&self, id: Uuid) -> Result<Option<Delegation>, AppError>;

    /// Currently-valid delegations for (tenant, delegate), optionally scoped
    /// to one workflow (a null-workflow delegation covers all workflows).
    /// Ordered most-recently-created first so delegator selection is
    /// deterministic.
    async fn find_active_delegations(
        &self,
        tenant_id: &str,
        delegate_id: Uuid,
        workflow_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delegation>, AppError>;

    async fn list_delegations_by_delegator(
        &self,
        tenant_id: &str,
        delegator_id: Uuid,
        include_expired: bool,
    ) -> Result<Vec<Delegation>, AppError>;

    async fn list_delegations_by_delegate(
        &self,
        tenant_id: &str,
        delegate_id: Uuid,
        include_expired: bool,
    ) -> Result<Vec<Delegation>, AppError>;

    async fn has_overlapping_delegation(
        &self,
        tenant_id: &str,
        delegator_id: Uuid,
        delegate_id: Uuid,
        workflow_id: Option<Uuid>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Revoke a delegation. Returns `false` when the delegation does not
    /// exist or was already revoked (idempotent against double-revocation).
    async fn revoke_delegation(
        &self,
        id: Uuid,
        revoked_by: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    // ── Escalation & expiry ──────────────────────────────────

    /// All pending requests not yet past `expires_at`. The scheduler filters
    /// these against each workflow's escalation configuration.
    async fn find_escalation_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, AppError>;

    /// Try-claim advance of one request's escalation level. The row is
    /// identified by `(id, status=pending, escalation_level=expected_level)`
    /// and claimed with lock-and-skip semantics: a worker that cannot claim
    /// the row (already locked, already advanced, no longer pending) gets
    /// `Ok(false)` and must treat the request as already handled.
    async fn try_advance_escalation(
        &self,
        request_id: Uuid,
        expected_level: i32,
        update: &EscalationUpdate,
    ) -> Result<bool, AppError>;

    /// Bulk-expire every pending request past `expires_at`. Returns the
    /// expired rows so the caller can publish expiry events.
    async fn expire_pending(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredRequest>, AppError>;
}
