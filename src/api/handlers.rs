use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::audit::AuditLogEntry;
use crate::models::decision::DecisionKind;
use crate::models::delegation::Delegation;
use crate::models::request::{ApprovalRequest, RequestStatus};
use crate::models::workflow::Workflow;
use crate::service::{CheckResult, CreateDelegationInput, CreateRequestInput, WorkflowPatch};
use crate::store::RequestFilter;
use crate::AppState;

// ── Identity ─────────────────────────────────────────────────

/// Caller identity, taken from the gateway-injected headers
/// `X-Tenant-Id`, `X-Staff-Id` and `X-Staff-Role`.
pub struct Identity {
    pub tenant_id: String,
    pub staff_id: Uuid,
    pub staff_role: String,
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| -> Result<String, AppError> {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| AppError::InvalidInput(format!("missing {name} header")))
        };

        let tenant_id = header("x-tenant-id")?;
        let staff_id = header("x-staff-id")?
            .parse()
            .map_err(|_| AppError::InvalidInput("x-staff-id must be a UUID".into()))?;
        let staff_role = header("x-staff-role")?;

        Ok(Identity {
            tenant_id,
            staff_id,
            staff_role,
        })
    }
}

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CheckBody {
    pub action_type: String,
    #[serde(default)]
    pub action_data: Value,
}

#[derive(Deserialize)]
pub struct CreateRequestBody {
    pub action_type: String,
    #[serde(default)]
    pub action_data: Value,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub reason: Option<String>,
    pub priority: Option<String>,
}

#[derive(Deserialize)]
pub struct DecideBody {
    pub decision: DecisionKind,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<RequestStatus>,
    pub approver_role: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct DelegationListParams {
    #[serde(default)]
    pub include_expired: bool,
}

#[derive(Deserialize)]
pub struct CreateDelegationBody {
    pub delegate_id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub reason: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct RevokeDelegationBody {
    pub reason: Option<String>,
}

// ── Approval handlers ────────────────────────────────────────

/// POST /api/v1/approvals/check — does this action need approval?
pub async fn check_approval(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(body): Json<CheckBody>,
) -> Result<Json<CheckResult>, AppError> {
    let result = state
        .approvals
        .check(&identity.tenant_id, &body.action_type, &body.action_data)
        .await?;
    Ok(Json(result))
}

/// POST /api/v1/approvals/requests
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(body): Json<CreateRequestBody>,
) -> Result<Json<ApprovalRequest>, AppError> {
    let request = state
        .approvals
        .create_request(
            &identity.tenant_id,
            CreateRequestInput {
                requester_id: identity.staff_id,
                requester_name: None,
                action_type: body.action_type,
                action_data: body.action_data,
                resource_type: body.resource_type,
                resource_id: body.resource_id,
                reason: body.reason,
                priority: body.priority,
            },
        )
        .await?;
    Ok(Json(request))
}

/// GET /api/v1/approvals/requests
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ApprovalRequest>>, AppError> {
    let filter = RequestFilter {
        status: params.status,
        approver_role: params.approver_role,
        limit: params.limit.unwrap_or(50),
        offset: params.offset.unwrap_or(0),
    };
    let requests = state
        .approvals
        .list_requests(&identity.tenant_id, &filter)
        .await?;
    Ok(Json(requests))
}

/// GET /api/v1/approvals/requests/mine
pub async fn list_my_requests(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ApprovalRequest>>, AppError> {
    let requests = state
        .approvals
        .list_my_requests(
            &identity.tenant_id,
            identity.staff_id,
            params.limit.unwrap_or(50),
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(requests))
}

/// GET /api/v1/approvals/requests/:id
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalRequest>, AppError> {
    let request = state.approvals.get_request(id).await?;
    if request.tenant_id != identity.tenant_id {
        return Err(AppError::RequestNotFound);
    }
    Ok(Json(request))
}

/// POST /api/v1/approvals/requests/:id/decision
pub async fn decide_request(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<DecideBody>,
) -> Result<Json<ApprovalRequest>, AppError> {
    let request = state.approvals.get_request(id).await?;
    if request.tenant_id != identity.tenant_id {
        return Err(AppError::RequestNotFound);
    }
    let updated = state
        .approvals
        .decide(
            id,
            identity.staff_id,
            &identity.staff_role,
            body.decision,
            body.comment,
        )
        .await?;
    Ok(Json(updated))
}

/// POST /api/v1/approvals/requests/:id/cancel
pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalRequest>, AppError> {
    let request = state.approvals.get_request(id).await?;
    if request.tenant_id != identity.tenant_id {
        return Err(AppError::RequestNotFound);
    }
    let updated = state.approvals.cancel(id, identity.staff_id).await?;
    Ok(Json(updated))
}

/// GET /api/v1/approvals/requests/:id/history
pub async fn request_history(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    let request = state.approvals.get_request(id).await?;
    if request.tenant_id != identity.tenant_id {
        return Err(AppError::RequestNotFound);
    }
    let history = state.approvals.request_history(id).await?;
    Ok(Json(history))
}

// ── Workflow handlers ────────────────────────────────────────

/// GET /api/v1/workflows
pub async fn list_workflows(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Workflow>>, AppError> {
    let workflows = state.approvals.list_workflows(&identity.tenant_id).await?;
    Ok(Json(workflows))
}

/// PATCH /api/v1/workflows/:id
pub async fn update_workflow(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(patch): Json<WorkflowPatch>,
) -> Result<Json<Workflow>, AppError> {
    let workflow = state
        .approvals
        .update_workflow(&identity.tenant_id, id, patch)
        .await?;
    Ok(Json(workflow))
}

// ── Delegation handlers ──────────────────────────────────────

/// POST /api/v1/delegations
pub async fn create_delegation(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(body): Json<CreateDelegationBody>,
) -> Result<Json<Delegation>, AppError> {
    let delegation = state
        .delegations
        .create(
            &identity.tenant_id,
            CreateDelegationInput {
                delegator_id: identity.staff_id,
                delegate_id: body.delegate_id,
                workflow_id: body.workflow_id,
                reason: body.reason,
                start_date: body.start_date.unwrap_or_else(Utc::now),
                end_date: body.end_date,
            },
        )
        .await?;
    Ok(Json(delegation))
}

/// GET /api/v1/delegations/outgoing
pub async fn list_outgoing_delegations(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(params): Query<DelegationListParams>,
) -> Result<Json<Vec<Delegation>>, AppError> {
    let delegations = state
        .delegations
        .list_outgoing(&identity.tenant_id, identity.staff_id, params.include_expired)
        .await?;
    Ok(Json(delegations))
}

/// GET /api/v1/delegations/incoming
pub async fn list_incoming_delegations(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(params): Query<DelegationListParams>,
) -> Result<Json<Vec<Delegation>>, AppError> {
    let delegations = state
        .delegations
        .list_incoming(&identity.tenant_id, identity.staff_id, params.include_expired)
        .await?;
    Ok(Json(delegations))
}

/// POST /api/v1/delegations/:id/revoke
pub async fn revoke_delegation(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<RevokeDelegationBody>,
) -> Result<Json<Value>, AppError> {
    state
        .delegations
        .revoke(&identity.tenant_id, id, identity.staff_id, body.reason)
        .await?;
    Ok(Json(json!({"revoked": true, "id": id})))
}
