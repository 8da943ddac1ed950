//! Background job: escalate stale pending approval requests and expire
//! timed-out ones.
//!
//! Runs on a fixed interval (plus once immediately at startup). Safe to run
//! on every service instance concurrently: the advance itself is a try-claim
//! store primitive, so exactly one of N racing workers moves a given request
//! and the rest skip it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::time;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::events::{ApprovalEvent, EventPublisher};
use crate::models::audit::{AuditEvent, AuditLogEntry};
use crate::models::request::ApprovalRequest;
use crate::models::workflow::{EscalationLevel, Workflow};
use crate::store::{ApprovalStore, EscalationUpdate};

/// Spawn the escalation sweep task. Call this once at startup. The first
/// tick fires immediately.
pub fn spawn(store: Arc<dyn ApprovalStore>, events: EventPublisher, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = run_sweep(store.as_ref(), &events, Utc::now()).await {
                error!("escalation sweep failed: {}", e);
            }
        }
    });
}

/// One full sweep: advance every request past its next escalation threshold,
/// then bulk-expire everything past `expires_at`. Per-request failures are
/// logged and skipped; they never abort the batch.
pub async fn run_sweep(
    store: &dyn ApprovalStore,
    events: &EventPublisher,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let candidates = store.find_escalation_candidates(now).await?;
    let mut workflows: HashMap<Uuid, Option<Workflow>> = HashMap::new();
    let mut advanced = 0usize;

    for request in &candidates {
        let workflow = match workflows.get(&request.workflow_id) {
            Some(cached) => cached.clone(),
            None => {
                let loaded = match store.get_workflow(request.workflow_id).await {
                    Ok(w) => w,
                    Err(e) => {
                        warn!(request_id = %request.id, error = %e, "workflow load failed, skipping");
                        continue;
                    }
                };
                workflows.insert(request.workflow_id, loaded.clone());
                loaded
            }
        };
        let Some(workflow) = workflow else {
            warn!(request_id = %request.id, "request references a missing workflow, skipping");
            continue;
        };

        match escalate_one(store, events, &workflow, request, now).await {
            Ok(true) => advanced += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "escalation failed, skipping");
            }
        }
    }

    let expired = store.expire_pending(now).await?;
    for request in &expired {
        events.publish(ApprovalEvent::expired(request));
    }

    if advanced > 0 || !expired.is_empty() {
        info!(
            candidates = candidates.len(),
            advanced,
            expired = expired.len(),
            "escalation sweep complete"
        );
    }
    Ok(())
}

/// Advance one request if its next escalation level is due. Returns whether
/// this worker performed the advance.
async fn escalate_one(
    store: &dyn ApprovalStore,
    events: &EventPublisher,
    workflow: &Workflow,
    request: &ApprovalRequest,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let Some(config) = workflow.escalation_config() else {
        return Ok(false);
    };
    if !config.enabled {
        return Ok(false);
    }

    // Levels are 1-based; a request at level N is waiting on levels[N].
    let Some(next) = next_level(&config.levels, request.escalation_level) else {
        // No further levels configured; the request expires naturally.
        return Ok(false);
    };

    let waiting_since = request.escalated_at.unwrap_or(request.created_at);
    if now - waiting_since < chrono::Duration::hours(next.after_hours) {
        return Ok(false);
    }

    let update = EscalationUpdate {
        escalation_level: request.escalation_level + 1,
        escalated_at: now,
        escalated_from_id: request.current_approver_id,
        current_approver_role: next.escalate_to_role.clone(),
    };
    let advanced = store
        .try_advance_escalation(request.id, request.escalation_level, &update)
        .await?;
    if !advanced {
        // A racing worker claimed it, or the request was decided meanwhile.
        return Ok(false);
    }

    let entry = AuditLogEntry::new(
        Some(request.id),
        &request.tenant_id,
        AuditEvent::Escalated,
        None,
        json!({
            "from_level": request.escalation_level,
            "to_level": update.escalation_level,
            "escalated_to_role": next.escalate_to_role,
        }),
    );
    if let Err(e) = store.create_audit_entry(&entry).await {
        warn!(request_id = %request.id, error = %e, "audit write failed, continuing");
    }

    if let Ok(Some(updated)) = store.get_request(request.id).await {
        events.publish(ApprovalEvent::escalated(
            &updated,
            request.escalation_level,
            &next.escalate_to_role,
        ));
    }

    info!(
        request_id = %request.id,
        tenant = %request.tenant_id,
        to_level = update.escalation_level,
        to_role = %next.escalate_to_role,
        "request escalated"
    );
    Ok(true)
}

fn next_level(levels: &[EscalationLevel], current_level: i32) -> Option<&EscalationLevel> {
    levels.get(current_level as usize)
}
