//! Role to permission mapping.
//!
//! Permissions are `resource:action` strings. A grant of `resource:*` covers
//! every action on that resource and `*:*` covers everything. Any consumer
//! checking permissions must go through [`permits`] so wildcards are honoured.

use crate::types::Role;

/// Static permission table.
#[must_use]
pub fn permissions_for(role: Role) -> Vec<String> {
    let granted: &[&str] = match role {
        Role::Admin => &["*:*"],
        Role::Physician => &[
            "patients:*",
            "encounters:*",
            "observations:*",
            "prescriptions:*",
            "allergies:*",
            "documents:*",
            "appointments:read",
            "appointments:update",
        ],
        Role::Nurse => &[
            "patients:read",
            "patients:update",
            "encounters:read",
            "observations:*",
            "allergies:*",
            "prescriptions:read",
            "appointments:read",
            "documents:read",
        ],
        Role::Receptionist => &[
            "patients:read",
            "patients:create",
            "patients:update",
            "appointments:*",
            "documents:read",
        ],
        Role::Billing => &[
            "patients:read",
            "encounters:read",
            "billing:*",
            "documents:read",
        ],
        Role::Patient => &["profile:read", "appointments:read", "documents:read"],
    };
    granted.iter().map(|p| (*p).to_string()).collect()
}

/// Returns `true` if any granted permission covers `required`.
///
/// `required` must be a concrete `resource:action` pair.
#[must_use]
pub fn permits<S: AsRef<str>>(granted: &[S], required: &str) -> bool {
    let Some((resource, action)) = required.split_once(':') else {
        return false;
    };
    granted.iter().any(|grant| {
        let Some((g_resource, g_action)) = grant.as_ref().split_once(':') else {
            return false;
        };
        (g_resource == "*" || g_resource == resource) && (g_action == "*" || g_action == action)
    })
}
