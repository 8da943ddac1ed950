//! Trigger evaluation: decides whether an action needs approval and which
//! role must decide. Pure functions over a workflow and an action payload.

use serde_json::Value;
use tracing::warn;

use crate::models::workflow::{RoleLevelTrigger, ThresholdTrigger, Workflow};
use crate::roles::RoleTable;

/// Outcome of evaluating a workflow's trigger against an action payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutcome {
    pub requires_approval: bool,
    pub auto_approved: bool,
    pub required_role: Option<String>,
}

impl TriggerOutcome {
    fn none() -> Self {
        Self {
            requires_approval: false,
            auto_approved: false,
            required_role: None,
        }
    }

    fn auto_approved() -> Self {
        Self {
            requires_approval: false,
            auto_approved: true,
            required_role: None,
        }
    }

    fn requires(role: String) -> Self {
        Self {
            requires_approval: true,
            auto_approved: false,
            required_role: Some(role),
        }
    }
}

/// Evaluate a workflow's trigger against an action payload.
///
/// Unknown trigger types fail closed: approval is required with the
/// workflow's default approver role. (The permissive legacy behavior let
/// misconfigured workflows wave actions through silently.)
pub fn evaluate(workflow: &Workflow, action_data: &Value, roles: &RoleTable) -> TriggerOutcome {
    match workflow.trigger_type.as_str() {
        "threshold" => evaluate_threshold(workflow, action_data),
        "role_level" => evaluate_role_level(workflow, action_data, roles),
        "always" => TriggerOutcome::requires(workflow.default_approver_role()),
        other => {
            warn!(
                workflow = %workflow.name,
                trigger_type = other,
                "unknown trigger type, failing closed"
            );
            TriggerOutcome::requires(workflow.default_approver_role())
        }
    }
}

/// First band whose `max` is unset or >= the extracted value wins. Bands are
/// taken in the order the workflow author supplied them.
fn evaluate_threshold(workflow: &Workflow, action_data: &Value) -> TriggerOutcome {
    let config: ThresholdTrigger = match serde_json::from_value(workflow.trigger_config.clone()) {
        Ok(c) => c,
        Err(e) => {
            warn!(workflow = %workflow.name, error = %e, "malformed threshold config");
            return TriggerOutcome::none();
        }
    };

    let Some(value) = action_data.get(&config.field).and_then(Value::as_f64) else {
        // Field absent or non-numeric: the trigger has nothing to measure.
        return TriggerOutcome::none();
    };

    for band in &config.thresholds {
        if band.max.is_none() || value <= band.max.unwrap() {
            if band.auto_approve {
                return TriggerOutcome::auto_approved();
            }
            let role = band
                .approver_role
                .clone()
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| workflow.default_approver_role());
            return TriggerOutcome::requires(role);
        }
    }

    TriggerOutcome::none()
}

/// Rules are matched against a role priority taken either from a
/// `target_role` name (translated via the role table) or a raw
/// `target_priority` number. First matching rule wins.
fn evaluate_role_level(workflow: &Workflow, action_data: &Value, roles: &RoleTable) -> TriggerOutcome {
    let config: RoleLevelTrigger = match serde_json::from_value(workflow.trigger_config.clone()) {
        Ok(c) => c,
        Err(e) => {
            warn!(workflow = %workflow.name, error = %e, "malformed role_level config");
            return TriggerOutcome::none();
        }
    };

    let priority = if let Some(role) = action_data.get("target_role").and_then(Value::as_str) {
        roles.priority(role)
    } else if let Some(p) = action_data.get("target_priority").and_then(Value::as_f64) {
        p as i32
    } else {
        return TriggerOutcome::none();
    };

    for rule in &config.rules {
        if priority >= rule.min_priority && (rule.max_priority == 0 || priority <= rule.max_priority)
        {
            if rule.auto_approve {
                return TriggerOutcome::auto_approved();
            }
            let role = rule
                .approver_role
                .clone()
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| workflow.default_approver_role());
            return TriggerOutcome::requires(role);
        }
    }

    TriggerOutcome::none()
}
