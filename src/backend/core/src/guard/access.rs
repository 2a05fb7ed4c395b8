//! Org access guard: membership, RBAC and tenant constraints, then
//! optionally ABAC.
//!
//! Every failure is an error and every error is final for the request.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::context::{AccessContext, DataClassificationLevel, DataResidencyZone};
use super::membership::{MembershipRecord, MembershipRepository, MembershipStatus};
use crate::abac::{attribute_map_from_json, AbacEvaluator, AttributeMap, AttributeValue};
use crate::config::{Config, GuardConfig};
use crate::error::{AuthzError, Result};
use crate::rbac::roles::{GOVERNANCE_ACTION, GOVERNANCE_RESOURCE};
use crate::rbac::{effective_permissions, OrgRole, OrganizationId, PermissionMap, UserId};
use crate::telemetry::{AuthzMetrics, DecisionEngine};

/// Membership metadata markers written by the bootstrap tooling.
const DEVELOPMENT_ADMIN_SEED_SOURCES: &[&str] =
    &["bootstrap:development-admin", "bootstrap:global-admin"];

// ═══════════════════════════════════════════════════════════════════════════════
// Input
// ═══════════════════════════════════════════════════════════════════════════════

/// What the caller wants to do, and under which constraints.
#[derive(Debug, Clone)]
pub struct OrgAccessInput {
    pub org_id: OrganizationId,
    pub user_id: UserId,
    /// Every listed permission must be granted.
    pub required_permissions: Option<PermissionMap>,
    /// At least one of these permission sets must be granted in full.
    pub required_any_permissions: Vec<PermissionMap>,
    pub expected_classification: Option<DataClassificationLevel>,
    pub expected_residency: Option<DataResidencyZone>,
    pub audit_source: Option<String>,
    pub correlation_id: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_attributes: AttributeMap,
}

impl OrgAccessInput {
    pub fn new(org_id: impl Into<OrganizationId>, user_id: impl Into<UserId>) -> Self {
        Self {
            org_id: org_id.into(),
            user_id: user_id.into(),
            required_permissions: None,
            required_any_permissions: Vec::new(),
            expected_classification: None,
            expected_residency: None,
            audit_source: None,
            correlation_id: None,
            action: None,
            resource_type: None,
            resource_attributes: AttributeMap::new(),
        }
    }

    /// Require `actions` on `resource` (added to any earlier requirements).
    pub fn require<'a>(mut self, resource: &str, actions: impl IntoIterator<Item = &'a str>) -> Self {
        let required = self.required_permissions.get_or_insert_with(PermissionMap::new);
        for action in actions {
            required.grant(resource, action);
        }
        self
    }

    pub fn require_permissions(mut self, permissions: PermissionMap) -> Self {
        self.required_permissions = Some(permissions);
        self
    }

    /// Add one alternative permission set.
    pub fn require_any(mut self, alternative: PermissionMap) -> Self {
        self.required_any_permissions.push(alternative);
        self
    }

    pub fn expect_classification(mut self, classification: DataClassificationLevel) -> Self {
        self.expected_classification = Some(classification);
        self
    }

    pub fn expect_residency(mut self, residency: DataResidencyZone) -> Self {
        self.expected_residency = Some(residency);
        self
    }

    pub fn audit_source(mut self, source: impl Into<String>) -> Self {
        self.audit_source = Some(source.into());
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Request an ABAC check for `action` on `resource_type`.
    pub fn abac(mut self, action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn resource_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.resource_attributes.insert(key.into(), value.into());
        self
    }

    pub fn resource_attributes(mut self, attributes: AttributeMap) -> Self {
        self.resource_attributes.extend(attributes);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Guard
// ═══════════════════════════════════════════════════════════════════════════════

/// Turns an [`OrgAccessInput`] into an [`AccessContext`] or a denial.
#[derive(Clone)]
pub struct OrgAccessGuard {
    memberships: Arc<dyn MembershipRepository>,
    abac: AbacEvaluator,
    config: GuardConfig,
    development_bypass: bool,
}

impl OrgAccessGuard {
    pub fn new(memberships: Arc<dyn MembershipRepository>, abac: AbacEvaluator, config: &Config) -> Self {
        Self {
            memberships,
            abac,
            config: config.guard.clone(),
            development_bypass: config.development_bypass_enabled(),
        }
    }

    pub fn abac(&self) -> &AbacEvaluator {
        &self.abac
    }

    /// Membership lookup, context construction and RBAC/tenant checks.
    #[instrument(level = "debug", skip(self, input), fields(org_id = %input.org_id, user_id = %input.user_id))]
    pub async fn assert_org_access(&self, input: &OrgAccessInput) -> Result<AccessContext> {
        let result = self.build_and_authorize(input).await;
        self.finish(result)
    }

    /// [`assert_org_access`](Self::assert_org_access) followed by ABAC.
    #[instrument(level = "debug", skip(self, input), fields(org_id = %input.org_id, user_id = %input.user_id))]
    pub async fn assert_org_access_with_abac(&self, input: &OrgAccessInput) -> Result<AccessContext> {
        let result = match self.build_and_authorize(input).await {
            Ok(context) => self.authorize_abac(input, &context).await.map(|_| context),
            Err(err) => Err(err),
        };
        self.finish(result)
    }

    /// Run `handler` with a granted context.
    pub async fn with_org_context<T, F, Fut>(&self, input: &OrgAccessInput, handler: F) -> Result<T>
    where
        F: FnOnce(AccessContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let context = self.assert_org_access(input).await?;
        handler(context).await
    }

    fn finish(&self, result: Result<AccessContext>) -> Result<AccessContext> {
        AuthzMetrics::record_decision(DecisionEngine::Guard, result.is_ok());
        match &result {
            Ok(context) => debug!(
                role = %context.role_key(),
                correlation_id = %context.correlation_id(),
                "Org access granted"
            ),
            Err(err) => err.log(),
        }
        result
    }

    async fn build_and_authorize(&self, input: &OrgAccessInput) -> Result<AccessContext> {
        let context = self.build_context(input).await?;
        authorize_rbac(input, &context)?;
        Ok(context)
    }

    async fn build_context(&self, input: &OrgAccessInput) -> Result<AccessContext> {
        if input.org_id.as_str().is_empty() || input.user_id.as_str().is_empty() {
            return Err(AuthzError::Unauthenticated);
        }

        let audit_source = input
            .audit_source
            .clone()
            .unwrap_or_else(|| self.config.default_audit_source.clone());

        if self.config.require_uuid_identifiers {
            validate_identifier("orgId", input.org_id.as_str(), &audit_source)?;
            validate_identifier("userId", input.user_id.as_str(), &audit_source)?;
        }

        let membership = self
            .memberships
            .find_membership(&input.org_id, &input.user_id)
            .await?
            .ok_or(AuthzError::MembershipNotFound)?;

        if membership.status != MembershipStatus::Active {
            return Err(AuthzError::MembershipInactive {
                status: membership.status.to_string(),
            });
        }

        let role = membership_role(&membership);
        let permissions = effective_permissions(&role);
        let development_super_admin = self.is_development_super_admin(&membership, &permissions);

        Ok(AccessContext::new(
            input.org_id.clone(),
            input.user_id.clone(),
            role.key(),
            membership.role_name.clone(),
            permissions,
            membership.organization.data_residency,
            membership.organization.data_classification,
            audit_source,
            metadata_str(&membership.metadata, "auditBatchId"),
            input
                .correlation_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            development_super_admin,
            attribute_map_from_json(&membership.metadata["abacSubjectAttributes"]),
        ))
    }

    fn is_development_super_admin(&self, membership: &MembershipRecord, permissions: &PermissionMap) -> bool {
        self.development_bypass
            && permissions.allows(GOVERNANCE_RESOURCE, GOVERNANCE_ACTION)
            && metadata_str(&membership.metadata, "seedSource")
                .is_some_and(|source| DEVELOPMENT_ADMIN_SEED_SOURCES.contains(&source.as_str()))
    }

    /// ABAC step. Skipped when the input names no action or resource type.
    pub async fn authorize_abac(&self, input: &OrgAccessInput, context: &AccessContext) -> Result<()> {
        let (Some(action), Some(resource_type)) = (input.action.as_deref(), input.resource_type.as_deref()) else {
            debug!("No ABAC action/resource on input; skipping ABAC");
            return Ok(());
        };

        let subject = subject_attributes(context);
        let resource = resource_attributes(context, &input.resource_attributes);
        self.abac
            .require_abac_allowance(context.org_id(), action, resource_type, &subject, &resource)
            .await
    }
}

fn membership_role(membership: &MembershipRecord) -> OrgRole {
    OrgRole::from_membership(membership.role_name.as_deref(), membership.role_permissions.as_ref())
}

fn metadata_str(metadata: &Value, key: &str) -> Option<String> {
    metadata.get(key).and_then(Value::as_str).map(str::to_string)
}

fn validate_identifier(field: &'static str, value: &str, audit_source: &str) -> Result<()> {
    if Uuid::parse_str(value).is_ok() {
        return Ok(());
    }
    // Value intentionally omitted.
    warn!(field = field, source = %audit_source, "Invalid identifier format");
    Err(AuthzError::InvalidIdentity {
        field,
        source_hint: audit_source.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// RBAC And Tenant Constraints
// ═══════════════════════════════════════════════════════════════════════════════

/// Check permission requirements and tenant constraints against a context.
///
/// The development super admin skips the permission requirements; tenant
/// constraints always apply.
pub fn authorize_rbac(input: &OrgAccessInput, context: &AccessContext) -> Result<()> {
    if !context.is_development_super_admin() {
        assert_permissions(input, context.permissions())?;
    } else {
        warn!(
            org_id = %context.org_id(),
            correlation_id = %context.correlation_id(),
            "Development super admin bypassed RBAC requirements"
        );
    }

    if let Some(expected) = input.expected_classification {
        if expected != context.data_classification() {
            return Err(AuthzError::tenant_constraint(format!(
                "expected classification {} but organization is {}",
                expected,
                context.data_classification()
            )));
        }
    }

    if let Some(expected) = input.expected_residency {
        if expected != context.data_residency() {
            return Err(AuthzError::tenant_constraint(format!(
                "expected residency {} but organization is {}",
                expected,
                context.data_residency()
            )));
        }
    }

    Ok(())
}

fn assert_permissions(input: &OrgAccessInput, granted: &PermissionMap) -> Result<()> {
    if let Some(required) = input.required_permissions.as_ref() {
        if let Some(missing) = granted.first_missing(required) {
            return Err(AuthzError::rbac(format!("missing required permission {}", missing)));
        }
    }

    let alternatives: Vec<&PermissionMap> = input
        .required_any_permissions
        .iter()
        .filter(|alternative| !alternative.is_empty())
        .collect();
    if !alternatives.is_empty() && !alternatives.iter().any(|alt| granted.satisfies(alt)) {
        return Err(AuthzError::rbac(format!(
            "none of the {} accepted permission sets is granted",
            alternatives.len()
        )));
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ABAC Attributes
// ═══════════════════════════════════════════════════════════════════════════════

/// Subject attributes: membership-provided attributes overlaid with the
/// identity, role and tenant attributes resolved by the guard.
pub fn subject_attributes(context: &AccessContext) -> AttributeMap {
    let mut subject = context.abac_subject_attributes().clone();
    subject.insert("orgId".to_string(), context.org_id().as_str().into());
    subject.insert("userId".to_string(), context.user_id().as_str().into());
    subject.insert("roles".to_string(), context.role_tokens().into());
    subject.insert("residency".to_string(), context.data_residency().as_str().into());
    subject.insert("classification".to_string(), context.data_classification().as_str().into());
    subject
}

/// Resource attributes: tenant residency and classification, then the
/// caller's attributes.
pub fn resource_attributes(context: &AccessContext, overrides: &AttributeMap) -> AttributeMap {
    let mut resource = AttributeMap::new();
    resource.insert("residency".to_string(), context.data_residency().as_str().into());
    resource.insert("classification".to_string(), context.data_classification().as_str().into());
    resource.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    resource
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abac::InMemoryPolicyStore;
    use crate::guard::membership::{InMemoryMembershipRepository, OrganizationRecord};
    use crate::rbac::{OrgRoleKey, RoleKey};
    use serde_json::json;

    const ORG: &str = "7f1c1b9e-8a41-4a53-9d0c-3f7c1c2b9a10";
    const USER: &str = "0b6f3c52-1d7e-4f0a-8c59-2d4b8e6a7f31";

    fn organization() -> OrganizationRecord {
        OrganizationRecord {
            data_residency: DataResidencyZone::UkOnly,
            data_classification: DataClassificationLevel::Official,
        }
    }

    fn guard_with(record: MembershipRecord, config: &Config) -> OrgAccessGuard {
        let memberships = InMemoryMembershipRepository::new().with_membership(
            OrganizationId::new(ORG),
            UserId::new(USER),
            record,
        );
        OrgAccessGuard::new(
            Arc::new(memberships),
            AbacEvaluator::new(Arc::new(InMemoryPolicyStore::new())),
            config,
        )
    }

    #[tokio::test]
    async fn test_member_happy_path() {
        let guard = guard_with(MembershipRecord::active("member", organization()), &Config::default());
        let input = OrgAccessInput::new(ORG, USER).require("employeeProfile", ["read"]);

        let context = guard.assert_org_access(&input).await.unwrap();
        assert_eq!(context.role_key(), RoleKey::BuiltIn(OrgRoleKey::Member));
        assert_eq!(context.audit_source(), "org-guard");
        assert!(Uuid::parse_str(context.correlation_id()).is_ok());
    }

    #[tokio::test]
    async fn test_missing_permission_names_predicate() {
        let guard = guard_with(MembershipRecord::active("member", organization()), &Config::default());
        let input = OrgAccessInput::new(ORG, USER).require("leaveRequest", ["approve"]);

        match guard.assert_org_access(&input).await.unwrap_err() {
            AuthzError::RbacDenied { reason } => assert!(reason.contains("leaveRequest:approve")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_required_any_permissions() {
        let guard = guard_with(MembershipRecord::active("manager", organization()), &Config::default());

        let ok = OrgAccessInput::new(ORG, USER)
            .require_any(PermissionMap::from_pairs([("organization", ["update"])]))
            .require_any(PermissionMap::from_pairs([("leaveRequest", ["approve"])]));
        assert!(guard.assert_org_access(&ok).await.is_ok());

        let denied = OrgAccessInput::new(ORG, USER)
            .require_any(PermissionMap::from_pairs([("organization", ["update"])]));
        assert!(matches!(
            guard.assert_org_access(&denied).await,
            Err(AuthzError::RbacDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_identifiers_are_unauthenticated() {
        let guard = guard_with(MembershipRecord::active("member", organization()), &Config::default());
        let input = OrgAccessInput::new("", USER);
        assert!(matches!(guard.assert_org_access(&input).await, Err(AuthzError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_malformed_identifier_rejected() {
        let guard = guard_with(MembershipRecord::active("member", organization()), &Config::default());
        let input = OrgAccessInput::new(ORG, "not-a-uuid").audit_source("api:hr");
        match guard.assert_org_access(&input).await.unwrap_err() {
            AuthzError::InvalidIdentity { field, source_hint } => {
                assert_eq!(field, "userId");
                assert_eq!(source_hint, "api:hr");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_uuid_check_can_be_disabled() {
        let mut config = Config::default();
        config.guard.require_uuid_identifiers = false;
        let memberships = InMemoryMembershipRepository::new().with_membership(
            OrganizationId::new("org"),
            UserId::new("user"),
            MembershipRecord::active("member", organization()),
        );
        let guard = OrgAccessGuard::new(
            Arc::new(memberships),
            AbacEvaluator::new(Arc::new(InMemoryPolicyStore::new())),
            &config,
        );
        assert!(guard.assert_org_access(&OrgAccessInput::new("org", "user")).await.is_ok());
    }

    #[tokio::test]
    async fn test_custom_role_and_metadata() {
        let record = MembershipRecord::active("Payroll Clerk", organization())
            .with_role_permissions(json!({"payroll": ["read"], "bogus": []}))
            .with_metadata(json!({
                "auditBatchId": "batch-9",
                "abacSubjectAttributes": {"departmentId": "d-1", "nested": {"x": 1}}
            }));
        let guard = guard_with(record, &Config::default());
        let context = guard
            .assert_org_access(&OrgAccessInput::new(ORG, USER).require("payroll", ["read"]))
            .await
            .unwrap();

        assert_eq!(context.role_key(), RoleKey::Custom);
        assert_eq!(context.permissions().len(), 1);
        assert_eq!(context.audit_batch_id(), Some("batch-9"));
        assert_eq!(context.abac_subject_attributes().len(), 1);

        let subject = subject_attributes(&context);
        assert_eq!(subject["roles"], vec!["custom", "Payroll Clerk"].into());
        assert_eq!(subject["departmentId"], "d-1".into());
    }

    #[tokio::test]
    async fn test_super_admin_bypass_disabled_in_production() {
        let record = MembershipRecord::active("orgAdmin", organization())
            .with_metadata(json!({"seedSource": "bootstrap:development-admin"}));
        let guard = guard_with(record, &Config::default());
        let context = guard.assert_org_access(&OrgAccessInput::new(ORG, USER)).await.unwrap();
        assert!(!context.is_development_super_admin());
    }

    #[test]
    fn test_resource_attributes_caller_overrides() {
        let context = AccessContext::new(
            OrganizationId::new(ORG),
            UserId::new(USER),
            RoleKey::BuiltIn(OrgRoleKey::Member),
            None,
            PermissionMap::new(),
            DataResidencyZone::UkOnly,
            DataClassificationLevel::Secret,
            "t".to_string(),
            None,
            "c".to_string(),
            false,
            AttributeMap::new(),
        );
        let mut overrides = AttributeMap::new();
        overrides.insert("departmentId".to_string(), "d-2".into());
        overrides.insert("residency".to_string(), "UK_AND_EEA".into());

        let resource = resource_attributes(&context, &overrides);
        assert_eq!(resource["classification"], "SECRET".into());
        assert_eq!(resource["residency"], "UK_AND_EEA".into());
        assert_eq!(resource["departmentId"], "d-2".into());
    }
}
