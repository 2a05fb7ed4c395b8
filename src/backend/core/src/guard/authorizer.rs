//! Repository-level authorization.
//!
//! Data access layers wrap each operation in [`RepositoryAuthorizer::authorize`]
//! so that defaults (for example "every call needs `absence:read`") are
//! merged into the request before the guard runs, and returned records can
//! be checked against the caller's tenant.

use std::future::Future;

use super::access::{authorize_rbac, OrgAccessGuard, OrgAccessInput};
use super::context::{AccessContext, DataClassificationLevel, DataResidencyZone, TenantScope};
use crate::error::{AuthzError, Result};
use crate::rbac::{merge_permission_maps, OrganizationId, PermissionMap};

/// Requirements applied to every request unless the caller overrides them.
#[derive(Debug, Clone, Default)]
pub struct RepositoryAuthorizationDefaults {
    pub required_permissions: Option<PermissionMap>,
    pub expected_classification: Option<DataClassificationLevel>,
    pub expected_residency: Option<DataResidencyZone>,
    pub audit_source: Option<String>,
}

/// A record that belongs to exactly one organization.
pub trait TenantScopedRecord {
    fn org_id(&self) -> Option<&OrganizationId>;
}

/// Context handed to repository handlers.
#[derive(Debug, Clone)]
pub struct RepositoryAuthorizationContext {
    pub access: AccessContext,
    pub tenant_scope: TenantScope,
}

/// Guard wrapper for data access layers.
#[derive(Clone)]
pub struct RepositoryAuthorizer {
    guard: OrgAccessGuard,
    defaults: RepositoryAuthorizationDefaults,
}

impl RepositoryAuthorizer {
    pub fn new(guard: OrgAccessGuard) -> Self {
        Self {
            guard,
            defaults: RepositoryAuthorizationDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: RepositoryAuthorizationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Merge defaults, run the guard with ABAC and call `handler`.
    pub async fn authorize<T, F, Fut>(&self, input: OrgAccessInput, handler: F) -> Result<T>
    where
        F: FnOnce(RepositoryAuthorizationContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let merged = self.merge_with_defaults(input);
        let access = self.guard.assert_org_access_with_abac(&merged).await?;
        let tenant_scope = access.tenant_scope();
        handler(RepositoryAuthorizationContext { access, tenant_scope }).await
    }

    /// Reject missing records and records owned by another organization.
    pub fn assert_tenant_record<R: TenantScopedRecord>(
        &self,
        record: Option<R>,
        context: &AccessContext,
    ) -> Result<R> {
        let record = record.ok_or(AuthzError::RecordNotFound)?;
        match record.org_id() {
            Some(org_id) if org_id == context.org_id() => Ok(record),
            _ => {
                tracing::warn!(
                    org_id = %context.org_id(),
                    correlation_id = %context.correlation_id(),
                    "Cross-tenant record access blocked"
                );
                Err(AuthzError::CrossTenantAccess)
            }
        }
    }

    /// Re-check a single `resource:action` against an existing context.
    pub fn enforce_permission(&self, context: &AccessContext, resource: &str, action: &str) -> Result<()> {
        let input = OrgAccessInput::new(context.org_id().clone(), context.user_id().clone())
            .require(resource, [action])
            .audit_source(context.audit_source())
            .expect_classification(context.data_classification())
            .expect_residency(context.data_residency());
        authorize_rbac(&input, context)
    }

    fn merge_with_defaults(&self, mut input: OrgAccessInput) -> OrgAccessInput {
        input.required_permissions = merge_permission_maps(
            self.defaults.required_permissions.as_ref(),
            input.required_permissions.as_ref(),
        );
        input.expected_classification = input
            .expected_classification
            .or(self.defaults.expected_classification);
        input.expected_residency = input.expected_residency.or(self.defaults.expected_residency);
        if input.audit_source.is_none() {
            input.audit_source = self.defaults.audit_source.clone();
        }
        input
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
