use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::audit::AuditLogEntry;
use crate::models::decision::Decision;
use crate::models::delegation::Delegation;
use crate::models::request::{ApprovalRequest, RequestStatus};
use crate::models::workflow::{Workflow, SYSTEM_TENANT};

use super::{ApprovalStore, EscalationUpdate, ExpiredRequest, RequestFilter};

const REQUEST_COLUMNS: &str = "id, tenant_id, workflow_id, requester_id, requester_name, status, \
     version, action_type, action_data, resource_type, resource_id, reason, priority, \
     current_approver_id, current_approver_role, escalation_level, escalated_at, \
     escalated_from_id, execution_id, expires_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for PgStore {
    async fn get_workflow_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Option<Workflow>, AppError> {
        // Tenant-specific rows shadow the shared system scope.
        let workflow = sqlx::query_as::<_, Workflow>(
            r#"SELECT * FROM approval_workflows
               WHERE (tenant_id = $1 OR tenant_id = $2) AND name = $3 AND is_active = true
               ORDER BY CASE WHEN tenant_id = $1 THEN 0 ELSE 1 END
               LIMIT 1"#,
        )
        .bind(tenant_id)
        .bind(SYSTEM_TENANT)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, AppError> {
        let workflow =
            sqlx::query_as::<_, Workflow>("SELECT * FROM approval_workflows WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(workflow)
    }

    async fn list_workflows(&self, tenant_id: &str) -> Result<Vec<Workflow>, AppError> {
        let workflows = sqlx::query_as::<_, Workflow>(
            r#"SELECT * FROM approval_workflows
               WHERE (tenant_id = $1 OR tenant_id = $2) AND is_active = true
               ORDER BY CASE WHEN tenant_id = $1 THEN 0 ELSE 1 END, created_at DESC"#,
        )
        .bind(tenant_id)
        .bind(SYSTEM_TENANT)
        .fetch_all(&self.pool)
        .await?;
        Ok(workflows)
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO approval_workflows
               (id, tenant_id, name, display_name, description, trigger_type, trigger_config,
                approver_config, approval_chain, timeout_hours, escalation_config, is_active,
                is_system, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"#,
        )
        .bind(workflow.id)
        .bind(&workflow.tenant_id)
        .bind(&workflow.name)
        .bind(&workflow.display_name)
        .bind(&workflow.description)
        .bind(&workflow.trigger_type)
        .bind(&workflow.trigger_config)
        .bind(&workflow.approver_config)
        .bind(&workflow.approval_chain)
        .bind(workflow.timeout_hours)
        .bind(&workflow.escalation_config)
        .bind(workflow.is_active)
        .bind(workflow.is_system)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"UPDATE approval_workflows
               SET trigger_config = $1, approver_config = $2, timeout_hours = $3,
                   escalation_config = $4, is_active = $5, updated_at = NOW()
               WHERE id = $6 AND tenant_id = $7"#,
        )
        .bind(&workflow.trigger_config)
        .bind(&workflow.approver_config)
        .bind(workflow.timeout_hours)
        .bind(&workflow.escalation_config)
        .bind(workflow.is_active)
        .bind(workflow.id)
        .bind(&workflow.tenant_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::WorkflowNotFound);
        }
        Ok(())
    }

    async fn create_request(&self, request: &ApprovalRequest) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO approval_requests
               (id, tenant_id, workflow_id, requester_id, requester_name, status, version,
                action_type, action_data, resource_type, resource_id, reason, priority,
                current_approver_id, current_approver_role, escalation_level, escalated_at,
                escalated_from_id, execution_id, expires_at, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                       $16, $17, $18, $19, $20, $21, $22)"#,
        )
        .bind(request.id)
        .bind(&request.tenant_id)
        .bind(request.workflow_id)
        .bind(request.requester_id)
        .bind(&request.requester_name)
        .bind(request.status)
        .bind(request.version)
        .bind(&request.action_type)
        .bind(&request.action_data)
        .bind(&request.resource_type)
        .bind(request.resource_id)
        .bind(&request.reason)
        .bind(&request.priority)
        .bind(request.current_approver_id)
        .bind(&request.current_approver_role)
        .bind(request.escalation_level)
        .bind(request.escalated_at)
        .bind(request.escalated_from_id)
        .bind(request.execution_id)
        .bind(request.expires_at)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<ApprovalRequest>, AppError> {
        let request =
            sqlx::query_as::<_, ApprovalRequest>("SELECT * FROM approval_requests WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(request)
    }

    async fn list_requests(
        &self,
        tenant_id: &str,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, AppError> {
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        let requests = sqlx::query_as::<_, ApprovalRequest>(
            r#"SELECT * FROM approval_requests
               WHERE tenant_id = $1
                 AND ($2::varchar IS NULL OR status = $2)
                 AND ($3::varchar IS NULL OR current_approver_role = $3
                      OR current_approver_role IS NULL)
               ORDER BY created_at DESC
               LIMIT $4 OFFSET $5"#,
        )
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&filter.approver_role)
        .bind(limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    async fn list_requests_by_requester(
        &self,
        tenant_id: &str,
        requester_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ApprovalRequest>, AppError> {
        let limit = if limit > 0 { limit } else { 50 };
        let requests = sqlx::query_as::<_, ApprovalRequest>(
            r#"SELECT * FROM approval_requests
               WHERE tenant_id = $1 AND requester_id = $2
               ORDER BY created_at DESC
               LIMIT $3 OFFSET $4"#,
        )
        .bind(tenant_id)
        .bind(requester_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    async fn commit_decision(
        &self,
        request_id: Uuid,
        decision: &Decision,
        new_status: RequestStatus,
        allowed_from: &[RequestStatus],
        execution_id: Option<Uuid>,
    ) -> Result<ApprovalRequest, AppError> {
        let mut tx = self.pool.begin().await?;

        // Re-load inside the transaction; a concurrent decision may have won
        // the race since the caller's pre-checks.
        let request = sqlx::query_as::<_, ApprovalRequest>(
            "SELECT * FROM approval_requests WHERE id = $1",
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::RequestNotFound)?;

        if !allowed_from.contains(&request.status) {
            return Err(AppError::RequestAlreadyDecided);
        }

        sqlx::query(
            r#"INSERT INTO approval_decisions
               (id, request_id, approver_id, approver_role, delegated_from, decision, comment,
                decided_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(decision.id)
        .bind(decision.request_id)
        .bind(decision.approver_id)
        .bind(&decision.approver_role)
        .bind(decision.delegated_from)
        .bind(decision.decision)
        .bind(&decision.comment)
        .bind(decision.decided_at)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query_as::<_, ApprovalRequest>(&format!(
            r#"UPDATE approval_requests
               SET status = $1, execution_id = COALESCE($2, execution_id),
                   version = version + 1, updated_at = NOW()
               WHERE id = $3 AND version = $4
               RETURNING {REQUEST_COLUMNS}"#,
        ))
        .bind(new_status)
        .bind(execution_id)
        .bind(request_id)
        .bind(request.version)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::VersionConflict)?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn update_request_status(
        &self,
        request: &ApprovalRequest,
        new_status: RequestStatus,
    ) -> Result<ApprovalRequest, AppError> {
        let updated = sqlx::query_as::<_, ApprovalRequest>(&format!(
            r#"UPDATE approval_requests
               SET status = $1, version = version + 1, updated_at = NOW()
               WHERE id = $2 AND version = $3
               RETURNING {REQUEST_COLUMNS}"#,
        ))
        .bind(new_status)
        .bind(request.id)
        .bind(request.version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::VersionConflict)?;
        Ok(updated)
    }

    async fn create_audit_entry(&self, entry: &AuditLogEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO approval_audit_log
               (id, request_id, tenant_id, event_type, actor_id, actor_role, metadata, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(entry.id)
        .bind(entry.request_id)
        .bind(&entry.tenant_id)
        .bind(&entry.event_type)
        .bind(entry.actor_id)
        .bind(&entry.actor_role)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn request_history(&self, request_id: Uuid) -> Result<Vec<AuditLogEntry>, AppError> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            "SELECT * FROM approval_audit_log WHERE request_id = $1 ORDER BY created_at ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn create_delegation(&self, delegation: &Delegation) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO approval_delegations
               (id, tenant_id, delegator_id, delegate_id, workflow_id, reason, start_date,
                end_date, is_active, revoked_at, revoked_by, revoke_reason, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
        )
        .bind(delegation.id)
        .bind(&delegation.tenant_id)
        .bind(delegation.delegator_id)
        .bind(delegation.delegate_id)
        .bind(delegation.workflow_id)
        .bind(&delegation.reason)
        .bind(delegation.start_date)
        .bind(delegation.end_date)
        .bind(delegation.is_active)
        .bind(delegation.revoked_at)
        .bind(delegation.revoked_by)
        .bind(&delegation.revoke_reason)
        .bind(delegation.created_at)
        .bind(delegation.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_delegation(&self, id: Uuid) -> Result<Option<Delegation>, AppError> {
        let delegation =
            sqlx::query_as::<_, Delegation>("SELECT * FROM approval_delegations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(delegation)
    }

    async fn find_active_delegations(
        &self,
        tenant_id: &str,
        delegate_id: Uuid,
        workflow_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delegation>, AppError> {
        let delegations = sqlx::query_as::<_, Delegation>(
            r#"SELECT * FROM approval_delegations
               WHERE tenant_id = $1 AND delegate_id = $2 AND is_active = true
                 AND revoked_at IS NULL
                 AND start_date <= $3 AND end_date > $3
                 AND (workflow_id IS NULL OR workflow_id = $4)
               ORDER BY created_at DESC"#,
        )
        .bind(tenant_id)
        .bind(delegate_id)
        .bind(now)
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(delegations)
    }

    async fn list_delegations_by_delegator(
        &self,
        tenant_id: &str,
        delegator_id: Uuid,
        include_expired: bool,
    ) -> Result<Vec<Delegation>, AppError> {
        let delegations = sqlx::query_as::<_, Delegation>(
            r#"SELECT * FROM approval_delegations
               WHERE tenant_id = $1 AND delegator_id = $2
                 AND ($3 OR (is_active = true AND end_date > NOW()))
               ORDER BY created_at DESC"#,
        )
        .bind(tenant_id)
        .bind(delegator_id)
        .bind(include_expired)
        .fetch_all(&self.pool)
        .await?;
        Ok(delegations)
    }

    async fn list_delegations_by_delegate(
        &self,
        tenant_id: &str,
        delegate_id: Uuid,
        include_expired: bool,
    ) -> Result<Vec<Delegation>, AppError> {
        let delegations = sqlx::query_as::<_, Delegation>(
            r#"SELECT * FROM approval_delegations
               WHERE tenant_id = $1 AND delegate_id = $2
                 AND ($3 OR (is_active = true AND end_date > NOW()))
               ORDER BY created_at DESC"#,
        )
        .bind(tenant_id)
        .bind(delegate_id)
        .bind(include_expired)
        .fetch_all(&self.pool)
        .await?;
        Ok(delegations)
    }

    async fn has_overlapping_delegation(
        &self,
        tenant_id: &str,
        delegator_id: Uuid,
        delegate_id: Uuid,
        workflow_id: Option<Uuid>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(
                 SELECT 1 FROM approval_delegations
                 WHERE tenant_id = $1 AND delegator_id = $2 AND delegate_id = $3
                   AND is_active = true AND revoked_at IS NULL
                   AND start_date < $4 AND end_date > $5
                   AND (workflow_id IS NOT DISTINCT FROM $6)
               )"#,
        )
        .bind(tenant_id)
        .bind(delegator_id)
        .bind(delegate_id)
        .bind(end_date)
        .bind(start_date)
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn revoke_delegation(
        &self,
        id: Uuid,
        revoked_by: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE approval_delegations
               SET is_active = false, revoked_at = $1, revoked_by = $2, revoke_reason = $3,
                   updated_at = $1
               WHERE id = $4 AND is_active = true"#,
        )
        .bind(now)
        .bind(revoked_by)
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_escalation_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, AppError> {
        let requests = sqlx::query_as::<_, ApprovalRequest>(
            r#"SELECT * FROM approval_requests
               WHERE status = 'pending' AND expires_at > $1
               ORDER BY created_at ASC"#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    async fn try_advance_escalation(
        &self,
        request_id: Uuid,
        expected_level: i32,
        update: &EscalationUpdate,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        // Claim the exact row we expect to advance. SKIP LOCKED makes a
        // racing worker see zero rows instead of blocking; a worker that
        // already advanced the level makes the predicate miss. Either way
        // this instance walks away without touching the row.
        let claimed = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT id FROM approval_requests
               WHERE id = $1 AND status = 'pending' AND escalation_level = $2
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(request_id)
        .bind(expected_level)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"UPDATE approval_requests
               SET escalation_level = $1, escalated_at = $2, escalated_from_id = $3,
                   current_approver_role = $4, current_approver_id = NULL,
                   version = version + 1, updated_at = NOW()
               WHERE id = $5"#,
        )
        .bind(update.escalation_level)
        .bind(update.escalated_at)
        .bind(update.escalated_from_id)
        .bind(&update.current_approver_role)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredRequest>, AppError> {
        let expired = sqlx::query_as::<_, ExpiredRequest>(
            r#"UPDATE approval_requests
               SET status = 'expired', version = version + 1, updated_at = NOW()
               WHERE status = 'pending' AND expires_at < $1
               RETURNING id, tenant_id, workflow_id, requester_id, action_type"#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(expired)
    }
}
