//! # OrgAuth Core
//!
//! Tenant-isolated authorization for multi-organization HR platforms.
//!
//! ## Architecture
//!
//! - **RBAC**: built-in role statements, inheritance and permission resolution
//! - **ABAC**: tenant policy store, normalizer and evaluator (default deny)
//! - **Guard**: membership resolution, RBAC and tenant constraints, then ABAC
//! - **Security**: conditional obligations (MFA, audit, quarantine, session
//!   restrictions) with a TTL result cache (default allow)
//! - **Telemetry**: structured logging and authorization metrics
//!
//! The guard always decides first; the security policy engine only runs on
//! contexts the guard granted. See [`wiring::AuthorizationServices`].

pub mod abac;
pub mod config;
pub mod error;
pub mod guard;
pub mod rbac;
pub mod security;
pub mod telemetry;
pub mod wiring;

pub use error::{AuthzError, ErrorCode, ErrorSeverity, Result};
pub use wiring::{AuthorizationServices, AuthorizedOperation, SessionSignals};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::abac::{
        AbacEvaluator, AbacPolicy, AbacPolicyStore, AttributeMap, AttributeValue, InMemoryPolicyStore,
        NormalizeOptions, PolicyEffect, TenantPolicyService,
    };
    pub use crate::config::{Config, Environment};
    pub use crate::error::{AuthzError, ErrorCode, ErrorSeverity, Result};
    pub use crate::guard::{
        AccessContext, DataClassificationLevel, DataResidencyZone, InMemoryMembershipRepository,
        MembershipRecord, MembershipRepository, MembershipStatus, OrgAccessGuard, OrgAccessInput,
        OrganizationRecord, RepositoryAuthorizer, TenantScope,
    };
    pub use crate::rbac::{
        effective_permissions, OrgRole, OrgRoleKey, OrganizationId, PermissionMap, RoleKey, UserId,
    };
    pub use crate::security::{
        ActionKind, ConditionKind, ConditionOperator, EnforcementReport, InMemoryEventSink,
        OrgSecurityPolicies, PolicyEvaluationResult, SecurityAction, SecurityCondition,
        SecurityContext, SecurityEventSink, SecurityPolicy, SecurityPolicyEngine, TracingEventSink,
    };
    pub use crate::wiring::{AuthorizationServices, AuthorizedOperation, SessionSignals};
}
