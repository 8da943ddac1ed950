pub mod approval;
pub mod delegation;

pub use approval::{ApprovalService, CheckResult, CreateRequestInput, WorkflowPatch};
pub use delegation::{CreateDelegationInput, DelegationService};

/// Canonical workflow name for a well-known action type. Unknown action
/// types use the action type itself as the workflow name, so tenants can
/// define workflows for their own action vocabulary.
pub fn workflow_name_for_action(action_type: &str) -> &str {
    match action_type {
        "order.refund" => "refund_approval",
        "order.cancel" => "order_cancellation",
        "discount.apply" => "discount_approval",
        "vendor.payout" => "payout_approval",
        "gateway.configure" => "gateway_config_approval",
        "staff.invite" => "staff_invitation",
        "staff.role_assign" => "role_assignment",
        "staff.role_promote" => "role_escalation",
        "staff.remove" => "staff_removal",
        "vendor.onboard" | "vendor.activate" => "vendor_onboarding",
        "vendor.status_change" | "vendor.suspend" | "vendor.terminate" => "vendor_status_change",
        "vendor.commission_change" => "vendor_commission_change",
        "vendor.contract_change" => "vendor_contract_change",
        "vendor.large_payout" => "vendor_large_payout",
        other => other,
    }
}
