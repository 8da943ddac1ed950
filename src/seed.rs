//! Shared-scope default workflows, inserted by `gatekeeper workflow seed`.
//!
//! Seeded rows live under the `system` tenant and act as fallbacks for every
//! tenant that has not defined its own workflow of the same name.

use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::workflow::{Workflow, SYSTEM_TENANT};
use crate::store::ApprovalStore;

fn system_workflow(
    name: &str,
    display_name: &str,
    description: &str,
    trigger_type: &str,
    trigger_config: serde_json::Value,
    approver_config: serde_json::Value,
    timeout_hours: i32,
    escalation_config: Option<serde_json::Value>,
) -> Workflow {
    let now = Utc::now();
    Workflow {
        id: Uuid::new_v4(),
        tenant_id: SYSTEM_TENANT.to_string(),
        name: name.to_string(),
        display_name: display_name.to_string(),
        description: Some(description.to_string()),
        trigger_type: trigger_type.to_string(),
        trigger_config,
        approver_config,
        approval_chain: None,
        timeout_hours,
        escalation_config,
        is_active: true,
        is_system: true,
        created_at: now,
        updated_at: now,
    }
}

fn default_escalation() -> serde_json::Value {
    json!({
        "enabled": true,
        "levels": [
            {"after_hours": 24, "escalate_to_role": "admin"},
            {"after_hours": 48, "escalate_to_role": "owner"}
        ]
    })
}

pub fn system_workflows() -> Vec<Workflow> {
    vec![
        system_workflow(
            "refund_approval",
            "Refund Approval",
            "Approval workflow for order refunds, tiered by refund amount",
            "threshold",
            json!({
                "field": "amount",
                "thresholds": [
                    {"max": 1000.0, "auto_approve": true},
                    {"max": 5000.0, "approver_role": "manager"},
                    {"approver_role": "admin"}
                ]
            }),
            json!({"default_role": "manager"}),
            72,
            Some(default_escalation()),
        ),
        system_workflow(
            "order_cancellation",
            "Order Cancellation Approval",
            "Approval workflow for cancelling confirmed orders",
            "always",
            json!({}),
            json!({"default_role": "manager"}),
            48,
            Some(default_escalation()),
        ),
        system_workflow(
            "product_creation",
            "Product Publication Approval",
            "Approval workflow for publishing products from draft state",
            "always",
            json!({}),
            json!({"default_role": "manager", "require_different_user": false}),
            48,
            Some(default_escalation()),
        ),
        system_workflow(
            "role_escalation",
            "Role Promotion Approval",
            "Approval workflow for promoting staff, tiered by target role level",
            "role_level",
            json!({
                "rules": [
                    {"min_priority": 0, "max_priority": 50, "auto_approve": true},
                    {"min_priority": 51, "max_priority": 89, "approver_role": "admin"},
                    {"min_priority": 90, "approver_role": "owner"}
                ]
            }),
            json!({"default_role": "admin"}),
            48,
            None,
        ),
    ]
}

/// Insert the system workflows that do not exist yet. Existing rows are left
/// untouched so tenant operators can tune them without re-seeding overwrites.
pub async fn seed_system_workflows(store: &dyn ApprovalStore) -> Result<usize, AppError> {
    let mut created = 0;
    for workflow in system_workflows() {
        if store
            .get_workflow_by_name(SYSTEM_TENANT, &workflow.name)
            .await?
            .is_some()
        {
            continue;
        }
        store.create_workflow(&workflow).await?;
        info!(workflow = %workflow.name, "seeded system workflow");
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        let first = seed_system_workflows(&store).await.unwrap();
        assert_eq!(first, system_workflows().len());
        let second = seed_system_workflows(&store).await.unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn seeded_configs_parse() {
        for workflow in system_workflows() {
            match workflow.trigger_type.as_str() {
                "threshold" => {
                    serde_json::from_value::<crate::models::workflow::ThresholdTrigger>(
                        workflow.trigger_config.clone(),
                    )
                    .unwrap();
                }
                "role_level" => {
                    serde_json::from_value::<crate::models::workflow::RoleLevelTrigger>(
                        workflow.trigger_config.clone(),
                    )
                    .unwrap();
                }
                "always" => {}
                other => panic!("unexpected trigger type {other}"),
            }
            if let Some(config) = workflow.escalation_config() {
                assert!(config.enabled);
                assert!(!config.levels.is_empty());
            }
        }
    }
}
