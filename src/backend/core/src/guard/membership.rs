//! Membership lookup collaborator.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::context::{DataClassificationLevel, DataResidencyZone};
use crate::error::Result;
use crate::rbac::{OrganizationId, UserId};

/// Lifecycle state of a tenant membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    Active,
    Invited,
    Suspended,
    Deactivated,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Invited => "INVITED",
            Self::Suspended => "SUSPENDED",
            Self::Deactivated => "DEACTIVATED",
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant attributes of the organization that owns a membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRecord {
    pub data_residency: DataResidencyZone,
    pub data_classification: DataClassificationLevel,
}

/// Membership as returned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    pub status: MembershipStatus,
    #[serde(default)]
    pub role_name: Option<String>,
    /// Untrusted `{resource: [action]}` payload of a custom role.
    #[serde(default)]
    pub role_permissions: Option<Value>,
    pub organization: OrganizationRecord,
    #[serde(default)]
    pub metadata: Value,
}

impl MembershipRecord {
    /// An active membership with the given role and no metadata.
    pub fn active(role_name: impl Into<String>, organization: OrganizationRecord) -> Self {
        Self {
            status: MembershipStatus::Active,
            role_name: Some(role_name.into()),
            role_permissions: None,
            organization,
            metadata: Value::Null,
        }
    }

    pub fn with_status(mut self, status: MembershipStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_role_permissions(mut self, permissions: Value) -> Self {
        self.role_permissions = Some(permissions);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Looks up a principal's membership in an organization.
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn find_membership(
        &self,
        org_id: &OrganizationId,
        user_id: &UserId,
    ) -> Result<Option<MembershipRecord>>;
}

/// In-memory repository for tests and the CLI.
#[derive(Debug, Default)]
pub struct InMemoryMembershipRepository {
    memberships: DashMap<(OrganizationId, UserId), MembershipRecord>,
}

impl InMemoryMembershipRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, org_id: OrganizationId, user_id: UserId, record: MembershipRecord) {
        self.memberships.insert((org_id, user_id), record);
    }

    pub fn with_membership(self, org_id: OrganizationId, user_id: UserId, record: MembershipRecord) -> Self {
        self.insert(org_id, user_id, record);
        self
    }

    pub fn remove(&self, org_id: &OrganizationId, user_id: &UserId) -> Option<MembershipRecord> {
        self.memberships
            .remove(&(org_id.clone(), user_id.clone()))
            .map(|(_, record)| record)
    }
}

#[async_trait]
impl MembershipRepository for InMemoryMembershipRepository {
    async fn find_membership(
        &self,
        org_id: &OrganizationId,
        user_id: &UserId,
    ) -> Result<Option<MembershipRecord>> {
        Ok(self
            .memberships
            .get(&(org_id.clone(), user_id.clone()))
            .map(|entry| entry.value().clone()))
    }
}
