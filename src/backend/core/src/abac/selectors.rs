//! Compiled-in bootstrap policies and the selector allowlist used when
//! tenant policies are written.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use serde_json::{json, Value};

use super::normalize::{normalize_policies, NormalizeOptions};
use super::types::AbacPolicy;
use crate::error::{AuthzError, Result};
use crate::rbac::{roles, PermissionMap};

static DEFAULT_BOOTSTRAP_POLICIES: OnceLock<Vec<Value>> = OnceLock::new();

/// Platform actions that are valid selectors without appearing in any role.
const PLATFORM_ACTIONS: &[&str] = &[
    "org.abac.read",
    "org.abac.update",
    "org.organization.read",
    "org.organization.update",
    "org.role.list",
    "org.role.create",
    "org.role.update",
    "org.role.delete",
    "org.invitation.list",
    "org.invitation.create",
    "org.invitation.revoke",
    "notifications:list",
    "notifications:read",
    "notifications:delete",
    "auth.session.list",
    "auth.session.revoke",
];

/// Platform resources that are valid selectors without appearing in any role.
const PLATFORM_RESOURCES: &[&str] = &[
    "org.abac.policy",
    "org.organization",
    "org.role",
    "org.invitation",
    "org.membership",
    "org.leave-settings",
    "leave-request",
    "notification",
    "auth.session",
    "security_event",
];

/// Raw bootstrap policies every new organization starts with.
///
/// Owners and org admins get full access; everybody may read their own
/// employee profile and manage their own absences and leave requests.
pub fn default_bootstrap_policies() -> &'static [Value] {
    DEFAULT_BOOTSTRAP_POLICIES.get_or_init(|| {
        vec![
            json!({
                "id": "bootstrap:owner-full-access",
                "description": "Organization owners may perform any action",
                "effect": "allow",
                "actions": ["*"],
                "resources": ["*"],
                "condition": {"subject": {"roles": ["owner"]}},
                "priority": 100
            }),
            json!({
                "id": "bootstrap:org-admin-full-access",
                "description": "Organization admins may perform any action",
                "effect": "allow",
                "actions": ["*"],
                "resources": ["*"],
                "condition": {"subject": {"roles": ["orgAdmin"]}},
                "priority": 90
            }),
            json!({
                "id": "bootstrap:self-profile-read",
                "description": "Members may read their own employee profile",
                "effect": "allow",
                "actions": ["read"],
                "resources": ["employeeProfile"],
                "condition": {"resource": {"userId": "$subject.userId"}},
                "priority": 10
            }),
            json!({
                "id": "bootstrap:self-service-leave",
                "description": "Members may manage their own absences and leave requests",
                "effect": "allow",
                "actions": ["read", "create", "cancel"],
                "resources": ["absence", "leaveRequest"],
                "condition": {"resource": {"userId": "$subject.userId"}},
                "priority": 10
            }),
        ]
    })
}

/// Bootstrap policies parsed without validation.
pub fn bootstrap_policies() -> Vec<AbacPolicy> {
    // Trusted input cannot fail in this mode; fall back to nothing rather than panic.
    normalize_policies(default_bootstrap_policies(), NormalizeOptions::trusted()).unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Allowlist
// ═══════════════════════════════════════════════════════════════════════════════

/// Known action and resource selectors.
#[derive(Debug, Clone, Default)]
pub struct SelectorAllowlist {
    actions: BTreeSet<String>,
    resources: BTreeSet<String>,
}

impl SelectorAllowlist {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Role statements, bootstrap policies and platform selectors.
    pub fn platform() -> Self {
        let mut allowlist = Self::empty();
        allowlist.extend_from_permissions(&roles::all_statements());

        for policy in bootstrap_policies() {
            allowlist.actions.extend(policy.actions);
            allowlist.resources.extend(policy.resources);
        }

        allowlist.actions.extend(PLATFORM_ACTIONS.iter().map(|s| s.to_string()));
        allowlist.resources.extend(PLATFORM_RESOURCES.iter().map(|s| s.to_string()));
        allowlist
    }

    /// Add tenant-defined permission resources.
    pub fn extend_from_permissions(&mut self, permissions: &PermissionMap) {
        for (resource, actions) in permissions.iter() {
            self.resources.insert(resource.clone());
            self.actions.extend(actions.iter().cloned());
        }
    }

    pub fn allows_action(&self, selector: &str) -> bool {
        Self::allows(selector, &self.actions)
    }

    pub fn allows_resource(&self, selector: &str) -> bool {
        Self::allows(selector, &self.resources)
    }

    /// Wildcards are valid as long as they could match a known selector.
    fn allows(selector: &str, known: &BTreeSet<String>) -> bool {
        if selector == "*" || known.contains(selector) {
            return true;
        }
        match selector.strip_suffix('*') {
            Some(prefix) if !prefix.is_empty() => known.iter().any(|k| k.starts_with(prefix)),
            _ => false,
        }
    }

    /// Reject the first policy that uses an unknown selector.
    pub fn assert_known_selectors(&self, policies: &[AbacPolicy]) -> Result<()> {
        for policy in policies {
            if let Some(action) = policy.actions.iter().find(|a| !self.allows_action(a)) {
                return Err(AuthzError::UnknownSelector {
                    policy_id: policy.id.clone(),
                    kind: "action",
                    selector: action.clone(),
                });
            }
            if let Some(resource) = policy.resources.iter().find(|r| !self.allows_resource(r)) {
                return Err(AuthzError::UnknownSelector {
                    policy_id: policy.id.clone(),
                    kind: "resource",
                    selector: resource.clone(),
                });
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
