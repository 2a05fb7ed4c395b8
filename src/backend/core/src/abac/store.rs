//! Tenant ABAC policy storage.
//!
//! The store persists raw JSON exactly as the tenant supplied it (after
//! write-path validation). Every read goes through the zero-trust
//! normalizer, so stored data is never trusted blindly.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, instrument};

use super::normalize::{normalize_policies, NormalizeOptions};
use super::selectors::{default_bootstrap_policies, SelectorAllowlist};
use super::types::AbacPolicy;
use crate::config::AbacConfig;
use crate::error::{AuthzError, Result};
use crate::rbac::OrganizationId;

/// Persistence collaborator for per-organization policy lists.
#[async_trait]
pub trait AbacPolicyStore: Send + Sync {
    /// Raw, unvalidated policies for an organization (empty when none).
    async fn get_policies_for_org(&self, org_id: &OrganizationId) -> Result<Vec<Value>>;

    /// Replace the organization's policy list.
    async fn set_policies_for_org(&self, org_id: &OrganizationId, policies: Vec<Value>) -> Result<()>;
}

/// In-memory store for tests, the CLI and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<OrganizationId, Vec<Value>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed raw policies, bypassing validation.
    pub fn with_policies(self, org_id: OrganizationId, policies: Vec<Value>) -> Self {
        self.policies.insert(org_id, policies);
        self
    }
}

#[async_trait]
impl AbacPolicyStore for InMemoryPolicyStore {
    async fn get_policies_for_org(&self, org_id: &OrganizationId) -> Result<Vec<Value>> {
        Ok(self
            .policies
            .get(org_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn set_policies_for_org(&self, org_id: &OrganizationId, policies: Vec<Value>) -> Result<()> {
        self.policies.insert(org_id.clone(), policies);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tenant Policy Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Read and write paths for tenant policies on top of an [`AbacPolicyStore`].
pub struct TenantPolicyService {
    store: Arc<dyn AbacPolicyStore>,
    allowlist: SelectorAllowlist,
    validate_selectors: bool,
}

impl TenantPolicyService {
    pub fn new(store: Arc<dyn AbacPolicyStore>, config: &AbacConfig) -> Self {
        Self {
            store,
            allowlist: SelectorAllowlist::platform(),
            validate_selectors: config.validate_selectors_on_write,
        }
    }

    pub fn with_allowlist(mut self, allowlist: SelectorAllowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn store(&self) -> &Arc<dyn AbacPolicyStore> {
        &self.store
    }

    /// Normalized policies for an organization; malformed entries are dropped.
    pub async fn get_policies(&self, org_id: &OrganizationId) -> Result<Vec<AbacPolicy>> {
        let raw = self.store.get_policies_for_org(org_id).await?;
        normalize_policies(&raw, NormalizeOptions::read_path())
    }

    /// Validate and persist a tenant's policy list. Nothing is written when
    /// any entry is malformed or uses an unknown selector.
    #[instrument(skip(self, org_id, raw), fields(org_id = %org_id, count = raw.len()))]
    pub async fn set_policies(&self, org_id: &OrganizationId, raw: Vec<Value>) -> Result<Vec<AbacPolicy>> {
        let policies = normalize_policies(&raw, NormalizeOptions::write_path())?;
        if self.validate_selectors {
            self.allowlist.assert_known_selectors(&policies)?;
        }

        let stored = policies
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AuthzError::repository("serialize ABAC policies", e))?;
        self.store.set_policies_for_org(org_id, stored).await?;

        info!(org_id = %org_id, policies = policies.len(), "ABAC policies updated");
        Ok(policies)
    }

    /// Install the compiled-in bootstrap policies for a new organization.
    pub async fn bootstrap_defaults(&self, org_id: &OrganizationId) -> Result<Vec<AbacPolicy>> {
        let raw = default_bootstrap_policies().to_vec();
        let policies = normalize_policies(&raw, NormalizeOptions::trusted())?;
        self.store.set_policies_for_org(org_id, raw).await?;
        info!(org_id = %org_id, policies = policies.len(), "Bootstrap ABAC policies installed");
        Ok(policies)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
