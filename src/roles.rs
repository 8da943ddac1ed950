//! Role-name-to-priority resolution.
//!
//! The table is an injected configuration object rather than a hard-coded
//! map: tenants can override or extend the built-in priorities without code
//! changes, and tests can construct arbitrary tables.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Priority assigned to roles the table does not know.
pub const UNKNOWN_ROLE_PRIORITY: i32 = 0;

static BUILTIN_PRIORITIES: Lazy<Vec<(&'static str, i32)>> = Lazy::new(|| {
    vec![
        ("viewer", 10),
        ("customer_support", 50),
        ("inventory_manager", 60),
        ("marketing_manager", 60),
        ("order_manager", 60),
        ("manager", 70),
        ("store_manager", 70),
        ("admin", 90),
        ("store_admin", 90),
        ("owner", 100),
        ("store_owner", 100),
        ("super_admin", 100),
    ]
});

/// Maps role names to integer priority levels and compares roles.
#[derive(Debug, Clone)]
pub struct RoleTable {
    priorities: HashMap<String, i32>,
}

impl Default for RoleTable {
    fn default() -> Self {
        Self {
            priorities: BUILTIN_PRIORITIES
                .iter()
                .map(|(name, p)| (name.to_string(), *p))
                .collect(),
        }
    }
}

impl RoleTable {
    /// Built-in table with per-deployment overrides layered on top.
    pub fn with_overrides(overrides: HashMap<String, i32>) -> Self {
        let mut table = Self::default();
        table.priorities.extend(overrides);
        table
    }

    /// Priority for a role name; unknown roles rank below everything.
    pub fn priority(&self, role: &str) -> i32 {
        self.priorities
            .get(role)
            .copied()
            .unwrap_or(UNKNOWN_ROLE_PRIORITY)
    }

    /// Whether `actor_role` may decide a request requiring `required_role`.
    /// A role strictly above the requirement always qualifies; there is no
    /// exact-match requirement.
    pub fn satisfies(&self, actor_role: &str, required_role: &str) -> bool {
        self.priority(actor_role) >= self.priority(required_role)
    }
}
