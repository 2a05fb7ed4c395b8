//! Org access guard.
//!
//! This module provides:
//! - **Context**: the immutable [`AccessContext`] and tenant attributes
//! - **Membership**: the membership lookup collaborator
//! - **Access**: [`OrgAccessGuard`], which resolves membership and role,
//!   enforces RBAC and tenant constraints, then optionally ABAC
//! - **Authorizer**: [`RepositoryAuthorizer`] for data access layers
//!
//! # Usage
//!
//! ```rust,ignore
//! use orgauth_core::guard::{OrgAccessGuard, OrgAccessInput};
//!
//! let input = OrgAccessInput::new(org_id, user_id)
//!     .require("leaveRequest", ["approve"])
//!     .abac("approve", "leave-request")
//!     .resource_attribute("departmentId", "d-7");
//!
//! let context = guard.assert_org_access_with_abac(&input).await?;
//! ```

pub mod access;
pub mod authorizer;
pub mod context;
pub mod membership;

pub use access::{
    authorize_rbac, resource_attributes, subject_attributes, OrgAccessGuard, OrgAccessInput,
};
pub use authorizer::{
    RepositoryAuthorizationContext, RepositoryAuthorizationDefaults, RepositoryAuthorizer,
    TenantScopedRecord,
};
pub use context::{AccessContext, DataClassificationLevel, DataResidencyZone, TenantScope};
pub use membership::{
    InMemoryMembershipRepository, MembershipRecord, MembershipRepository, MembershipStatus,
    OrganizationRecord,
};
