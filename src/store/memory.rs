//! In-memory [`ApprovalStore`] used by service and scheduler tests. Mirrors
//! the Postgres implementation's concurrency semantics (version CAS, single
//! winner on escalation advance) behind one mutex.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::audit::AuditLogEntry;
use crate::models::decision::Decision;
use crate::models::delegation::Delegation;
use crate::models::request::{ApprovalRequest, RequestStatus};
use crate::models::workflow::{Workflow, SYSTEM_TENANT};

use super::{ApprovalStore, EscalationUpdate, ExpiredRequest, RequestFilter};

#[derive(Default)]
struct State {
    workflows: HashMap<Uuid, Workflow>,
    requests: HashMap<Uuid, ApprovalRequest>,
    decisions: Vec<Decision>,
    delegations: HashMap<Uuid, Delegation>,
    audit: Vec<AuditLogEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions_for(&self, request_id: Uuid) -> Vec<Decision> {
        self.state
            .lock()
            .unwrap()
            .decisions
            .iter()
            .filter(|d| d.request_id == request_id)
            .cloned()
            .collect()
    }

    pub fn audit_events(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .audit
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn get_workflow_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Option<Workflow>, AppError> {
        let state = self.state.lock().unwrap();
        let tenant_match = state
            .workflows
            .values()
            .find(|w| w.tenant_id == tenant_id && w.name == name && w.is_active);
        if let Some(w) = tenant_match {
            return Ok(Some(w.clone()));
        }
        Ok(state
            .workflows
            .values()
            .find(|w| w.tenant_id == SYSTEM_TENANT && w.name == name && w.is_active)
            .cloned())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, AppError> {
        Ok(self.state.lock().unwrap().workflows.get(&id).cloned())
    }

    async fn list_workflows(&self, tenant_id: &str) -> Result<Vec<Workflow>, AppError> {
        let state = self.state.lock().unwrap();
        let mut workflows: Vec<_> = state
            .workflows
            .values()
            .filter(|w| (w.tenant_id == tenant_id || w.tenant_id == SYSTEM_TENANT) && w.is_active)
            .cloned()
            .collect();
        workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(workflows)
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        match state.workflows.get_mut(&workflow.id) {
            Some(existing) if existing.tenant_id == workflow.tenant_id => {
                *existing = workflow.clone();
                Ok(())
            }
            _ => Err(AppError::WorkflowNotFound),
        }
    }

    async fn create_request(&self, request: &ApprovalRequest) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .requests
            .insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<ApprovalRequest>, AppError> {
        Ok(self.state.lock().unwrap().requests.get(&id).cloned())
    }

    async fn list_requests(
        &self,
        tenant_id: &str,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, AppError> {
        let state = self.state.lock().unwrap();
        let mut requests: Vec<_> = state
            .requests
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| {
                filter.approver_role.as_deref().map_or(true, |role| {
                    r.current_approver_role.as_deref().map_or(true, |cr| cr == role)
                })
            })
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = if filter.limit > 0 { filter.limit as usize } else { 50 };
        Ok(requests
            .into_iter()
            .skip(filter.offset as usize)
            .take(limit)
            .collect())
    }

    async fn list_requests_by_requester(
        &self,
        tenant_id: &str,
        requester_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ApprovalRequest>, AppError> {
        let state = self.state.lock().unwrap();
        let mut requests: Vec<_> = state
            .requests
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.requester_id == requester_id)
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = if limit > 0 { limit as usize } else { 50 };
        Ok(requests.into_iter().skip(offset as usize).take(limit).collect())
    }

    async fn commit_decision(
        &self,
        request_id: Uuid,
        decision: &Decision,
        new_status: RequestStatus,
        allowed_from: &[RequestStatus],
        execution_id: Option<Uuid>,
    ) -> Result<ApprovalRequest, AppError> {
        let mut state = self.state.lock().unwrap();
        let request = state
            .requests
            .get(&request_id)
            .cloned()
            .ok_or(AppError::RequestNotFound)?;

        if !allowed_from.contains(&request.status) {
            return Err(AppError::RequestAlreadyDecided);
        }

        state.decisions.push(decision.clone());

        let stored = state
            .requests
            .get_mut(&request_id)
            .ok_or(AppError::RequestNotFound)?;
        if stored.version != request.version {
            return Err(AppError::VersionConflict);
        }
        stored.status = new_status;
        if execution_id.is_some() {
            stored.execution_id = execution_id;
        }
        stored.version += 1;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn update_request_status(
        &self,
        request: &ApprovalRequest,
        new_status: RequestStatus,
    ) -> Result<ApprovalRequest, AppError> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .requests
            .get_mut(&request.id)
            .ok_or(AppError::RequestNotFound)?;
        if stored.version != request.version {
            return Err(AppError::VersionConflict);
        }
        stored.status = new_status;
        stored.version += 1;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn create_audit_entry(&self, entry: &AuditLogEntry) -> Result<(), AppError> {
        self.state.lock().unwrap().audit.push(entry.clone());
        Ok(())
    }

    async fn request_history(&self, request_id: Uuid) -> Result<Vec<AuditLogEntry>, AppError> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<_> = state
            .audit
            .iter()
            .filter(|e| e.request_id == Some(request_id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    async fn create_delegation(&self, delegation: &Delegation) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .delegations
            .insert(delegation.id, delegation.clone());
        Ok(())
    }

    async fn get_delegation(&self, id: Uuid) -> Result<Option<Delegation>, AppError> {
        Ok(self.state.lock().unwrap().delegations.get(&id).cloned())
    }

    async fn find_active_delegations(
        &self,
        tenant_id: &str,
        delegate_id: Uuid,
        workflow_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delegation>, AppError> {
        let state = self.state.lock().unwrap();
        let mut delegations: Vec<_> = state
            .delegations
            .values()
            .filter(|d| d.tenant_id == tenant_id && d.delegate_id == delegate_id)
            .filter(|d| d.is_valid_at(now))
            .filter(|d| match (workflow_id, d.workflow_id) {
                (_, None) => true,
                (Some(wanted), Some(scoped)) => wanted == scoped,
                (None, Some(_)) => false,
            })
            .cloned()
            .collect();
        delegations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(delegations)
    }

    async fn list_delegations_by_delegator(
        &self,
        tenant_id: &str,
        delegator_id: Uuid,
        include_expired: bool,
    ) -> Result<Vec<Delegation>, AppError> {
        let now = Utc::now();
        let state = self.state.lock().unwrap();
        let mut delegations: Vec<_> = state
            .delegations
            .values()
            .filter(|d| d.tenant_id == tenant_id && d.delegator_id == delegator_id)
            .filter(|d| include_expired || (d.is_active && d.end_date > now))
            .cloned()
            .collect();
        delegations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(delegations)
    }

    async fn list_delegations_by_delegate(
        &self,
        tenant_id: &str,
        delegate_id: Uuid,
        include_expired: bool,
    ) -> Result<Vec<Delegation>, AppError> {
        let now = Utc::now();
        let state = self.state.lock().unwrap();
        let mut delegations: Vec<_> = state
            .delegations
            .values()
            .filter(|d| d.tenant_id == tenant_id && d.delegate_id == delegate_id)
            .filter(|d| include_expired || (d.is_active && d.end_date > now))
            .cloned()
            .collect();
        delegations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
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
        let state = self.state.lock().unwrap();
        Ok(state.delegations.values().any(|d| {
            d.tenant_id == tenant_id
                && d.delegator_id == delegator_id
                && d.delegate_id == delegate_id
                && d.is_active
                && d.revoked_at.is_none()
                && d.workflow_id == workflow_id
                && d.start_date < end_date
                && d.end_date > start_date
        }))
    }

    async fn revoke_delegation(
        &self,
        id: Uuid,
        revoked_by: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        match state.delegations.get_mut(&id) {
            Some(d) if d.is_active => {
                d.is_active = false;
                d.revoked_at = Some(now);
                d.revoked_by = Some(revoked_by);
                d.revoke_reason = reason;
                d.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_escalation_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, AppError> {
        let state = self.state.lock().unwrap();
        let mut requests: Vec<_> = state
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending && r.expires_at > now)
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }

    async fn try_advance_escalation(
        &self,
        request_id: Uuid,
        expected_level: i32,
        update: &EscalationUpdate,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        match state.requests.get_mut(&request_id) {
            Some(r)
                if r.status == RequestStatus::Pending && r.escalation_level == expected_level =>
            {
                r.escalation_level = update.escalation_level;
                r.escalated_at = Some(update.escalated_at);
                r.escalated_from_id = update.escalated_from_id;
                r.current_approver_role = Some(update.current_approver_role.clone());
                r.current_approver_id = None;
                r.version += 1;
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredRequest>, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut expired = Vec::new();
        for r in state.requests.values_mut() {
            if r.status == RequestStatus::Pending && r.expires_at < now {
                r.status = RequestStatus::Expired;
                r.version += 1;
                r.updated_at = now;
                expired.push(ExpiredRequest {
                    id: r.id,
                    tenant_id: r.tenant_id.clone(),
                    workflow_id: r.workflow_id,
                    requester_id: r.requester_id,
                    action_type: r.action_type.clone(),
                });
            }
        }
        Ok(expired)
    }
}
