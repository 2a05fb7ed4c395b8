//! Access context and tenant attributes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::abac::AttributeMap;
use crate::rbac::{OrganizationId, PermissionMap, RoleKey, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Tenant Attributes
// ═══════════════════════════════════════════════════════════════════════════════

/// Sensitivity level of an organization's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataClassificationLevel {
    Official,
    OfficialSensitive,
    Secret,
    TopSecret,
}

impl DataClassificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Official => "OFFICIAL",
            Self::OfficialSensitive => "OFFICIAL_SENSITIVE",
            Self::Secret => "SECRET",
            Self::TopSecret => "TOP_SECRET",
        }
    }

    /// Ordinal used for "at least" comparisons (1 = OFFICIAL).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Official => 1,
            Self::OfficialSensitive => 2,
            Self::Secret => 3,
            Self::TopSecret => 4,
        }
    }
}

impl fmt::Display for DataClassificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataClassificationLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFFICIAL" => Ok(Self::Official),
            "OFFICIAL_SENSITIVE" => Ok(Self::OfficialSensitive),
            "SECRET" => Ok(Self::Secret),
            "TOP_SECRET" => Ok(Self::TopSecret),
            _ => Err(()),
        }
    }
}

/// Where an organization's data may be stored and processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataResidencyZone {
    UkOnly,
    UkAndEea,
    GlobalRestricted,
}

impl DataResidencyZone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UkOnly => "UK_ONLY",
            Self::UkAndEea => "UK_AND_EEA",
            Self::GlobalRestricted => "GLOBAL_RESTRICTED",
        }
    }
}

impl fmt::Display for DataResidencyZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataResidencyZone {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UK_ONLY" => Ok(Self::UkOnly),
            "UK_AND_EEA" => Ok(Self::UkAndEea),
            "GLOBAL_RESTRICTED" => Ok(Self::GlobalRestricted),
            _ => Err(()),
        }
    }
}

/// Tenant coordinates handed to repositories with every scoped query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantScope {
    pub org_id: OrganizationId,
    pub data_residency: DataResidencyZone,
    pub data_classification: DataClassificationLevel,
    pub audit_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_batch_id: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Access Context
// ═══════════════════════════════════════════════════════════════════════════════

/// The immutable outcome of a successful guard evaluation.
///
/// Only the guard constructs contexts; residency and classification always
/// come from the organization record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessContext {
    org_id: OrganizationId,
    user_id: UserId,
    role_key: RoleKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    role_name: Option<String>,
    permissions: PermissionMap,
    data_residency: DataResidencyZone,
    data_classification: DataClassificationLevel,
    audit_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    audit_batch_id: Option<String>,
    correlation_id: String,
    development_super_admin: bool,
    abac_subject_attributes: AttributeMap,
}

impl AccessContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        org_id: OrganizationId,
        user_id: UserId,
        role_key: RoleKey,
        role_name: Option<String>,
        permissions: PermissionMap,
        data_residency: DataResidencyZone,
        data_classification: DataClassificationLevel,
        audit_source: String,
        audit_batch_id: Option<String>,
        correlation_id: String,
        development_super_admin: bool,
        abac_subject_attributes: AttributeMap,
    ) -> Self {
        Self {
            org_id,
            user_id,
            role_key,
            role_name,
            permissions,
            data_residency,
            data_classification,
            audit_source,
            audit_batch_id,
            correlation_id,
            development_super_admin,
            abac_subject_attributes,
        }
    }

    pub fn org_id(&self) -> &OrganizationId {
        &self.org_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn role_key(&self) -> RoleKey {
        self.role_key
    }

    /// Stored role name, when it differs from the role key (custom roles).
    pub fn role_name(&self) -> Option<&str> {
        self.role_name.as_deref()
    }

    pub fn permissions(&self) -> &PermissionMap {
        &self.permissions
    }

    pub fn data_residency(&self) -> DataResidencyZone {
        self.data_residency
    }

    pub fn data_classification(&self) -> DataClassificationLevel {
        self.data_classification
    }

    pub fn audit_source(&self) -> &str {
        &self.audit_source
    }

    pub fn audit_batch_id(&self) -> Option<&str> {
        self.audit_batch_id.as_deref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn is_development_super_admin(&self) -> bool {
        self.development_super_admin
    }

    pub fn abac_subject_attributes(&self) -> &AttributeMap {
        &self.abac_subject_attributes
    }

    /// Role tokens used as the ABAC subject's `roles` and by role conditions.
    pub fn role_tokens(&self) -> Vec<String> {
        let mut tokens = vec![self.role_key.as_str().to_string()];
        if let Some(name) = self.role_name.as_deref() {
            if name != self.role_key.as_str() {
                tokens.push(name.to_string());
            }
        }
        tokens
    }

    pub fn tenant_scope(&self) -> TenantScope {
        TenantScope {
            org_id: self.org_id.clone(),
            data_residency: self.data_residency,
            data_classification: self.data_classification,
            audit_source: self.audit_source.clone(),
            audit_batch_id: self.audit_batch_id.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
