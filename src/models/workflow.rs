use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The tenant id under which shared fallback workflows live.
/// Tenant-specific workflows always shadow these.
pub const SYSTEM_TENANT: &str = "system";

/// Hard fallback when a workflow names no approver at all.
pub const FALLBACK_APPROVER_ROLE: &str = "manager";

/// A named approval policy template, scoped to a tenant or to the shared
/// `system` scope.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Workflow {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    /// One of "threshold", "role_level", "always".
    pub trigger_type: String,
    pub trigger_config: serde_json::Value,
    pub approver_config: serde_json::Value,
    pub approval_chain: Option<serde_json::Value>,
    /// Hours until a pending request expires.
    pub timeout_hours: i32,
    pub escalation_config: Option<serde_json::Value>,
    pub is_active: bool,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Trigger configuration ────────────────────────────────────

/// Config for `trigger_type = "threshold"`: a numeric field and an ordered
/// list of bands. Bands must be supplied in ascending `max` order; the
/// evaluator does not sort them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdTrigger {
    pub field: String,
    pub thresholds: Vec<ThresholdBand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdBand {
    /// Upper bound (inclusive). `None` means the band matches any value.
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub approver_role: Option<String>,
    #[serde(default)]
    pub auto_approve: bool,
}

/// Config for `trigger_type = "role_level"`: rules matched against a role
/// priority. The payload may carry a `target_role` name or a raw
/// `target_priority` number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleLevelTrigger {
    pub rules: Vec<RoleLevelRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleLevelRule {
    pub min_priority: i32,
    /// 0 means no upper limit.
    #[serde(default)]
    pub max_priority: i32,
    #[serde(default)]
    pub approver_role: Option<String>,
    #[serde(default)]
    pub auto_approve: bool,
}

// ── Approver configuration ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproverConfig {
    #[serde(default = "default_true")]
    pub require_different_user: bool,
    #[serde(default)]
    pub default_role: Option<String>,
    #[serde(default)]
    pub chain: Vec<ChainStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub role: String,
}

impl Default for ApproverConfig {
    fn default() -> Self {
        Self {
            require_different_user: true,
            default_role: None,
            chain: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ── Escalation configuration ─────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub levels: Vec<EscalationLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationLevel {
    pub after_hours: i64,
    pub escalate_to_role: String,
}

// ── Accessors ────────────────────────────────────────────────

impl Workflow {
    pub fn approver_config(&self) -> ApproverConfig {
        serde_json::from_value(self.approver_config.clone()).unwrap_or_default()
    }

    /// Whether an approver must differ from the requester. Defaults to true
    /// when the config is absent or unparseable.
    pub fn require_different_user(&self) -> bool {
        self.approver_config().require_different_user
    }

    pub fn escalation_config(&self) -> Option<EscalationConfig> {
        self.escalation_config
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Resolve the role that must decide when the trigger itself names none:
    /// explicit default role, then the first chain entry, then the hard
    /// fallback.
    pub fn default_approver_role(&self) -> String {
        let config = self.approver_config();
        if let Some(role) = config.default_role {
            if !role.is_empty() {
                return role;
            }
        }
        if let Some(step) = config.chain.first() {
            if !step.role.is_empty() {
                return step.role.clone();
            }
        }
        if let Some(chain) = &self.approval_chain {
            if let Ok(steps) = serde_json::from_value::<Vec<ChainStep>>(chain.clone()) {
                if let Some(step) = steps.first() {
                    if !step.role.is_empty() {
                        return step.role.clone();
                    }
                }
            }
        }
        FALLBACK_APPROVER_ROLE.to_string()
    }
}
