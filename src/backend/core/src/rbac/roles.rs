//! Built-in role statement registry.
//!
//! Every organization ships with six built-in roles. A role is its own
//! statement map plus the statements of the roles it inherits:
//!
//! | Role         | Inherits             | Adds                                               |
//! |--------------|----------------------|----------------------------------------------------|
//! | `member`     |                      | own profile, absences and leave requests           |
//! | `manager`    | member               | team visibility, approvals                         |
//! | `hrAdmin`    | manager              | profile and leave policy administration            |
//! | `compliance` | member               | audit trail, compliance items, residency review    |
//! | `orgAdmin`   | hrAdmin              | organization settings, roles, ABAC policies        |
//! | `owner`      | orgAdmin, compliance | ownership transfer, deletion, residency enforcement|

use std::collections::HashSet;
use std::sync::OnceLock;

use super::models::{OrgRoleKey, PermissionMap};

static STATEMENTS: OnceLock<Vec<(OrgRoleKey, PermissionMap)>> = OnceLock::new();

/// Resource and action that mark organization-governance rights.
pub const GOVERNANCE_RESOURCE: &str = "organization";
pub const GOVERNANCE_ACTION: &str = "governance";

fn own_statements(key: OrgRoleKey) -> PermissionMap {
    match key {
        OrgRoleKey::Member => PermissionMap::from_pairs([
            ("employeeProfile", vec!["read"]),
            ("absence", vec!["read", "create"]),
            ("leaveRequest", vec!["read", "create", "cancel"]),
            ("leavePolicy", vec!["read"]),
            ("notification", vec!["read"]),
        ]),
        OrgRoleKey::Manager => PermissionMap::from_pairs([
            ("employeeProfile", vec!["list"]),
            ("absence", vec!["list", "approve"]),
            ("leaveRequest", vec!["list", "approve", "reject"]),
            ("team", vec!["read", "manage"]),
        ]),
        OrgRoleKey::HrAdmin => PermissionMap::from_pairs([
            ("employeeProfile", vec!["create", "update", "delete"]),
            ("absence", vec!["update", "delete"]),
            ("leavePolicy", vec!["create", "update", "delete"]),
            ("compliance", vec!["read"]),
        ]),
        OrgRoleKey::Compliance => PermissionMap::from_pairs([
            ("audit", vec!["read", "export"]),
            ("compliance", vec!["read", "update"]),
            ("residency", vec!["read"]),
        ]),
        OrgRoleKey::OrgAdmin => PermissionMap::from_pairs([
            (GOVERNANCE_RESOURCE, vec!["read", "update", GOVERNANCE_ACTION]),
            ("member", vec!["invite", "update", "remove"]),
            ("role", vec!["list", "create", "update", "delete"]),
            ("abacPolicy", vec!["read", "update"]),
            ("settings", vec!["read", "update"]),
        ]),
        OrgRoleKey::Owner => PermissionMap::from_pairs([
            (GOVERNANCE_RESOURCE, vec!["delete", "transfer"]),
            ("residency", vec!["enforce"]),
        ]),
    }
}

/// Roles whose statements a role inherits.
pub fn inherits(key: OrgRoleKey) -> &'static [OrgRoleKey] {
    match key {
        OrgRoleKey::Member => &[],
        OrgRoleKey::Manager => &[OrgRoleKey::Member],
        OrgRoleKey::HrAdmin => &[OrgRoleKey::Manager],
        OrgRoleKey::Compliance => &[OrgRoleKey::Member],
        OrgRoleKey::OrgAdmin => &[OrgRoleKey::HrAdmin],
        OrgRoleKey::Owner => &[OrgRoleKey::OrgAdmin, OrgRoleKey::Compliance],
    }
}

fn registry() -> &'static [(OrgRoleKey, PermissionMap)] {
    STATEMENTS.get_or_init(|| {
        OrgRoleKey::ALL
            .into_iter()
            .map(|key| (key, own_statements(key)))
            .collect()
    })
}

fn own(key: OrgRoleKey) -> &'static PermissionMap {
    registry()
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, statements)| statements)
        .unwrap_or_else(|| unreachable!("every OrgRoleKey is registered"))
}

/// All statement maps that make up a role: its own first, then every
/// inherited role's, each role visited once.
pub fn statements_for(key: OrgRoleKey) -> Vec<&'static PermissionMap> {
    let mut visited = HashSet::new();
    let mut stack = vec![key];
    let mut statements = Vec::new();

    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        statements.push(own(current));
        stack.extend(inherits(current).iter().rev().copied());
    }

    statements
}

/// Union of every built-in statement, used to build selector allowlists.
pub fn all_statements() -> PermissionMap {
    registry()
        .iter()
        .fold(PermissionMap::new(), |acc, (_, statements)| acc.union(statements))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
