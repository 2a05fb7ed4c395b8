//! Production composition of the authorization services.
//!
//! The guard (RBAC, tenant constraints, then ABAC; default deny) always runs
//! first. The security policy engine (default allow) only sees contexts the
//! guard granted, so it can add obligations or deny but never grant.

use std::sync::Arc;
use tracing::info;

use crate::abac::{AbacEvaluator, AbacPolicyStore, TenantPolicyService};
use crate::config::Config;
use crate::error::Result;
use crate::guard::{AccessContext, MembershipRepository, OrgAccessGuard, OrgAccessInput, RepositoryAuthorizer};
use crate::security::{EnforcementReport, SecurityContext, SecurityEventSink, SecurityPolicyEngine};

/// Per-request session signals consumed by the security policy engine.
#[derive(Debug, Clone, Default)]
pub struct SessionSignals {
    pub mfa_verified: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SessionSignals {
    fn apply(self, access: AccessContext) -> SecurityContext {
        let mut context = SecurityContext::new(access).with_mfa_verified(self.mfa_verified);
        context.ip_address = self.ip_address;
        context.user_agent = self.user_agent;
        context
    }
}

/// Outcome of a fully authorized operation.
#[derive(Debug, Clone)]
pub struct AuthorizedOperation {
    pub context: AccessContext,
    pub report: EnforcementReport,
}

/// Every authorization service, wired from one [`Config`].
#[derive(Clone)]
pub struct AuthorizationServices {
    pub config: Arc<Config>,
    pub guard: OrgAccessGuard,
    pub tenant_policies: Arc<TenantPolicyService>,
    pub security_engine: Arc<SecurityPolicyEngine>,
}

impl AuthorizationServices {
    /// Validate `config` and build the services over the given collaborators.
    pub fn default_wiring(
        config: Config,
        memberships: Arc<dyn MembershipRepository>,
        policy_store: Arc<dyn AbacPolicyStore>,
        sink: Arc<dyn SecurityEventSink>,
    ) -> Result<Self> {
        config.validate()?;

        let evaluator = AbacEvaluator::new(Arc::clone(&policy_store));
        let guard = OrgAccessGuard::new(memberships, evaluator, &config);
        let tenant_policies = Arc::new(TenantPolicyService::new(policy_store, &config.abac));
        let security_engine = Arc::new(SecurityPolicyEngine::new(&config.security_engine, sink));

        info!(
            environment = %config.environment,
            caching = config.security_engine.enable_caching,
            development_bypass = config.development_bypass_enabled(),
            "Authorization services wired"
        );

        Ok(Self {
            config: Arc::new(config),
            guard,
            tenant_policies,
            security_engine,
        })
    }

    pub fn repository_authorizer(&self) -> RepositoryAuthorizer {
        RepositoryAuthorizer::new(self.guard.clone())
    }

    /// Guard with ABAC, then enforce security policies on the granted context.
    pub async fn authorize_operation(
        &self,
        input: &OrgAccessInput,
        session: SessionSignals,
        operation: &str,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> Result<AuthorizedOperation> {
        let access = self.guard.assert_org_access_with_abac(input).await?;
        let context = session.apply(access);
        let report = self
            .security_engine
            .enforce_policies(&context, operation, resource_type, resource_id)
            .await?;
        Ok(AuthorizedOperation {
            context: context.access,
            report,
        })
    }
}
