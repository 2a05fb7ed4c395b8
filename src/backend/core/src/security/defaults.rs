//! Per-organization security settings and the default policy set built
//! from them.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::types::{
    ActionKind, ConditionKind, ConditionOperator, SecurityAction, SecurityCondition, SecurityPolicy,
};
use crate::guard::{DataClassificationLevel, DataResidencyZone};
use crate::rbac::OrganizationId;

/// Security settings of one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrgSecurityPolicies {
    /// Classifications that require a verified MFA session.
    pub mfa_required_classifications: Vec<DataClassificationLevel>,
    /// Roles that always require a verified MFA session.
    pub mfa_enforced_roles: Vec<String>,
    pub default_residency: DataResidencyZone,
    /// Data at or above this level is audit logged on every access.
    pub audit_classification_floor: DataClassificationLevel,
    /// Quarantine data accessed from outside the default residency zone.
    pub auto_quarantine: bool,
    pub session_timeout_minutes: u32,
    /// Client IPs allowed to reach the tenant; empty disables the check.
    pub ip_allowlist: Vec<String>,
}

impl Default for OrgSecurityPolicies {
    fn default() -> Self {
        Self {
            mfa_required_classifications: vec![
                DataClassificationLevel::Secret,
                DataClassificationLevel::TopSecret,
            ],
            mfa_enforced_roles: vec![
                "owner".to_string(),
                "orgAdmin".to_string(),
                "compliance".to_string(),
            ],
            default_residency: DataResidencyZone::UkOnly,
            audit_classification_floor: DataClassificationLevel::OfficialSensitive,
            auto_quarantine: false,
            session_timeout_minutes: 480,
            ip_allowlist: Vec::new(),
        }
    }
}

fn log_event(severity: &str) -> SecurityAction {
    SecurityAction::new(ActionKind::LogEvent).with_parameter("severity", severity)
}

fn mfa_not_verified() -> SecurityCondition {
    SecurityCondition::new(ConditionKind::MfaStatus, ConditionOperator::Equals, false)
}

/// Build the default policies of `org_id`, each scoped to that organization.
///
/// Priorities:
/// - 1: IP allowlist (deny)
/// - 5: top secret access
/// - 10: MFA per classification
/// - 20: MFA per role
/// - 30: classified data audit
/// - 40: residency mismatch
/// - 100: session limits
pub fn build_default_security_policies(
    org_id: &OrganizationId,
    settings: &OrgSecurityPolicies,
) -> Vec<SecurityPolicy> {
    let id = |slug: &str| format!("{org_id}:{slug}");
    let mut policies = Vec::new();

    if !settings.ip_allowlist.is_empty() {
        let mut policy = SecurityPolicy::new(id("ip-allowlist"), "Block unlisted client addresses", 1)
            .with_description("Denies requests from addresses outside the tenant allowlist")
            .with_condition(SecurityCondition::new(
                ConditionKind::IpAddress,
                ConditionOperator::MatchesRegex,
                ".+",
            ));
        for ip in &settings.ip_allowlist {
            policy = policy.with_condition(SecurityCondition::new(
                ConditionKind::IpAddress,
                ConditionOperator::NotEquals,
                ip.as_str(),
            ));
        }
        policies.push(
            policy
                .with_action(log_event("high"))
                .with_action(SecurityAction::new(ActionKind::Deny)),
        );
    }

    policies.push(
        SecurityPolicy::new(id("top-secret-access"), "Top secret access", 5)
            .with_description("Audits and time-boxes every session touching top secret data")
            .with_condition(SecurityCondition::new(
                ConditionKind::DataClassification,
                ConditionOperator::Equals,
                DataClassificationLevel::TopSecret.as_str(),
            ))
            .with_action(log_event("critical"))
            .with_action(SecurityAction::new(ActionKind::NotifyAdmin))
            .with_action(
                SecurityAction::new(ActionKind::RestrictAccess).with_parameter("maxSessionMinutes", 15),
            ),
    );

    for level in &settings.mfa_required_classifications {
        policies.push(
            SecurityPolicy::new(
                id(&format!("mfa-classification-{}", level.as_str().to_lowercase())),
                format!("MFA for {level} data"),
                10,
            )
            .with_condition(SecurityCondition::new(
                ConditionKind::DataClassification,
                ConditionOperator::Equals,
                level.as_str(),
            ))
            .with_condition(mfa_not_verified())
            .with_action(SecurityAction::new(ActionKind::RequireMfa))
            .with_action(log_event("medium")),
        );
    }

    for role in &settings.mfa_enforced_roles {
        policies.push(
            SecurityPolicy::new(id(&format!("mfa-role-{role}")), format!("MFA for {role}"), 20)
                .with_condition(SecurityCondition::new(
                    ConditionKind::UserRole,
                    ConditionOperator::Contains,
                    role.as_str(),
                ))
                .with_condition(mfa_not_verified())
                .with_action(SecurityAction::new(ActionKind::RequireMfa)),
        );
    }

    // Equality conditions only, so one policy per level at or above the floor.
    for level in [
        DataClassificationLevel::OfficialSensitive,
        DataClassificationLevel::Secret,
    ] {
        if level.rank() >= settings.audit_classification_floor.rank() {
            policies.push(
                SecurityPolicy::new(
                    id(&format!("audit-{}", level.as_str().to_lowercase())),
                    format!("Audit {level} access"),
                    30,
                )
                .with_condition(SecurityCondition::new(
                    ConditionKind::DataClassification,
                    ConditionOperator::Equals,
                    level.as_str(),
                ))
                .with_action(log_event("medium")),
            );
        }
    }

    let mut residency = SecurityPolicy::new(id("residency-mismatch"), "Residency outside default zone", 40)
        .with_condition(SecurityCondition::new(
            ConditionKind::DataResidency,
            ConditionOperator::NotEquals,
            settings.default_residency.as_str(),
        ))
        .with_action(log_event("high"))
        .with_action(SecurityAction::new(ActionKind::NotifyAdmin));
    if settings.auto_quarantine {
        residency = residency.with_action(SecurityAction::new(ActionKind::QuarantineData));
    }
    policies.push(residency);

    policies.push(
        SecurityPolicy::new(id("session-limits"), "Session limits", 100).with_action(
            SecurityAction::new(ActionKind::RestrictAccess)
                .with_parameter("sessionTimeoutMinutes", json!(settings.session_timeout_minutes)),
        ),
    );

    policies
        .into_iter()
        .map(|policy| policy.scoped_to(org_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set() {
        let org = OrganizationId::new("org-1");
        let policies = build_default_security_policies(&org, &OrgSecurityPolicies::default());

        assert!(policies.iter().all(|p| p.org_id.as_ref() == Some(&org)));
        assert!(policies.iter().all(|p| p.id.starts_with("org-1:")));
        assert!(!policies.iter().any(|p| p.id.ends_with("ip-allowlist")));
        assert!(!policies.iter().any(SecurityPolicy::is_deny));

        let ids: Vec<&str> = policies.iter().map(|p| p.id.as_str()).collect();
        assert!(ids.contains(&"org-1:mfa-classification-secret"));
        assert!(ids.contains(&"org-1:mfa-role-orgAdmin"));
        assert!(ids.contains(&"org-1:audit-official_sensitive"));
    }

    #[test]
    fn test_ip_allowlist_and_quarantine() {
        let settings = OrgSecurityPolicies {
            ip_allowlist: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            auto_quarantine: true,
            audit_classification_floor: DataClassificationLevel::Secret,
            ..Default::default()
        };
        let policies = build_default_security_policies(&OrganizationId::new("o"), &settings);

        let allowlist = policies.iter().find(|p| p.id == "o:ip-allowlist").unwrap();
        assert!(allowlist.is_deny());
        assert_eq!(allowlist.conditions.len(), 3);

        let residency = policies.iter().find(|p| p.id == "o:residency-mismatch").unwrap();
        assert!(residency.has_action(ActionKind::QuarantineData));

        assert!(!policies.iter().any(|p| p.id == "o:audit-official_sensitive"));
        assert!(policies.iter().any(|p| p.id == "o:audit-secret"));
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: OrgSecurityPolicies =
            serde_json::from_value(json!({"autoQuarantine": true, "defaultResidency": "UK_AND_EEA"})).unwrap();
        assert!(settings.auto_quarantine);
        assert_eq!(settings.default_residency, DataResidencyZone::UkAndEea);
        assert_eq!(settings.mfa_enforced_roles.len(), 3);
    }
}
