//! Role-Based Access Control (RBAC) foundations.
//!
//! This module provides:
//! - **Models**: tenant/user identifiers, [`PermissionMap`], and the
//!   [`OrgRole`] tagged union (built-in role or custom permission map)
//! - **Role registry**: built-in role statements with inheritance
//! - **Resolver**: effective permission maps for a principal's role
//!
//! # Usage
//!
//! ```rust,ignore
//! use orgauth_core::rbac::{effective_permissions, OrgRole, OrgRoleKey, PermissionMap};
//!
//! let granted = effective_permissions(&OrgRole::BuiltIn(OrgRoleKey::Manager));
//! let required = PermissionMap::from_pairs([("leaveRequest", ["approve"])]);
//! assert!(granted.satisfies(&required));
//! ```

pub mod models;
pub mod resolver;
pub mod roles;

pub use models::{
    merge_permission_maps, OrgRole, OrgRoleKey, OrganizationId, PermissionMap, RoleKey, UserId,
};
pub use resolver::{combine_role_statements, effective_permissions, resolve_granted_permissions};
