//! Effective permission resolution.
//!
//! Answers "what can this role do": built-in roles combine their registry
//! statements, custom roles use the permission map parsed from the
//! membership. Pure functions, no I/O.

use super::models::{OrgRole, PermissionMap};
use super::roles;

/// Union of a role's statement maps. Deterministic and order-independent.
pub fn combine_role_statements(statements: &[&PermissionMap]) -> PermissionMap {
    statements
        .iter()
        .fold(PermissionMap::new(), |mut acc, statement| {
            acc.extend(statement);
            acc
        })
}

/// Resolve the effective RBAC permission map for a role.
///
/// `combine` receives every statement map that belongs to a built-in role;
/// custom roles bypass it and return their own (already filtered) map.
pub fn resolve_granted_permissions<F>(role: &OrgRole, combine: F) -> PermissionMap
where
    F: Fn(&[&PermissionMap]) -> PermissionMap,
{
    match role {
        OrgRole::BuiltIn(key) => combine(&roles::statements_for(*key)),
        OrgRole::Custom(permissions) => permissions.clone(),
    }
}

/// Shorthand using [`combine_role_statements`].
pub fn effective_permissions(role: &OrgRole) -> PermissionMap {
    resolve_granted_permissions(role, combine_role_statements)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
