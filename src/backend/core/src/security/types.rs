//! Security policy engine types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::guard::AccessContext;
use crate::rbac::OrganizationId;

// ═══════════════════════════════════════════════════════════════════════════════
// Conditions
// ═══════════════════════════════════════════════════════════════════════════════

/// What a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    DataClassification,
    DataResidency,
    UserRole,
    IpAddress,
    MfaStatus,
    TimeBased,
    DeviceCompliance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    MatchesRegex,
}

/// One predicate of a policy. All conditions of a policy must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub operator: ConditionOperator,
    pub value: Value,
}

impl SecurityCondition {
    pub fn new(kind: ConditionKind, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self {
            kind,
            operator,
            value: value.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Actions
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RequireMfa,
    LogEvent,
    NotifyAdmin,
    RestrictAccess,
    QuarantineData,
    Allow,
    Deny,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequireMfa => "require_mfa",
            Self::LogEvent => "log_event",
            Self::NotifyAdmin => "notify_admin",
            Self::RestrictAccess => "restrict_access",
            Self::QuarantineData => "quarantine_data",
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An obligation attached to a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl SecurityAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// A conditional set of actions. Lower priority values are evaluated first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Restricts the policy to one tenant; `None` applies everywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrganizationId>,
    #[serde(default)]
    pub conditions: Vec<SecurityCondition>,
    pub actions: Vec<SecurityAction>,
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl SecurityPolicy {
    pub fn new(id: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            org_id: None,
            conditions: Vec::new(),
            actions: Vec::new(),
            priority,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn scoped_to(mut self, org_id: OrganizationId) -> Self {
        self.org_id = Some(org_id);
        self
    }

    pub fn applies_to(&self, org_id: &OrganizationId) -> bool {
        self.org_id.as_ref().map_or(true, |scope| scope == org_id)
    }

    pub fn with_condition(mut self, condition: SecurityCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: SecurityAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn has_action(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|action| action.kind == kind)
    }

    pub fn is_deny(&self) -> bool {
        self.has_action(ActionKind::Deny)
    }

    /// Whether a condition reads the client IP or the session role list.
    pub fn depends_on_session(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| matches!(c.kind, ConditionKind::IpAddress | ConditionKind::UserRole))
    }
}

/// Accumulated outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluationResult {
    pub allowed: bool,
    pub actions: Vec<SecurityAction>,
    pub matched_policies: Vec<SecurityPolicy>,
    pub decision_log: Vec<String>,
}

impl PolicyEvaluationResult {
    pub fn matched_policy_ids(&self) -> Vec<&str> {
        self.matched_policies.iter().map(|p| p.id.as_str()).collect()
    }

    /// First matched policy carrying an action of `kind`.
    pub fn policy_with_action(&self, kind: ActionKind) -> Option<&SecurityPolicy> {
        self.matched_policies.iter().find(|p| p.has_action(kind))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request Context
// ═══════════════════════════════════════════════════════════════════════════════

/// A granted access context plus session signals.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub access: AccessContext,
    pub mfa_verified: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Role tokens checked by `user_role` `contains` conditions.
    pub roles: Vec<String>,
}

impl SecurityContext {
    pub fn new(access: AccessContext) -> Self {
        let roles = access.role_tokens();
        Self {
            access,
            mfa_verified: false,
            ip_address: None,
            user_agent: None,
            roles,
        }
    }

    pub fn with_mfa_verified(mut self, verified: bool) -> Self {
        self.mfa_verified = verified;
        self
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// What enforcement did beyond allowing the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementReport {
    /// Parameters of every `restrict_access` action, later actions winning.
    pub session_restrictions: Map<String, Value>,
    pub quarantined: bool,
    pub events_emitted: usize,
    pub mfa_checked: bool,
}
