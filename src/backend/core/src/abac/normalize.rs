//! Policy normalization.
//!
//! Tenant policies are untrusted. The read path drops malformed entries so a
//! single bad policy cannot take authorization down; the write path rejects
//! the whole batch instead.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::types::AbacPolicy;
use crate::error::{AuthzError, Result};

/// Options controlling how strictly raw policies are parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Skip shape validation. Only for compiled-in, already-trusted input.
    pub assume_validated: bool,
    /// Reject the batch on the first invalid entry instead of dropping it.
    pub fail_on_invalid: bool,
}

impl NormalizeOptions {
    /// Zero-trust read path.
    pub fn read_path() -> Self {
        Self::default()
    }

    /// Persisting tenant input.
    pub fn write_path() -> Self {
        Self {
            assume_validated: false,
            fail_on_invalid: true,
        }
    }

    pub fn trusted() -> Self {
        Self {
            assume_validated: true,
            fail_on_invalid: false,
        }
    }
}

/// Outcome of a normalization run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub policies: Vec<AbacPolicy>,
    /// Entries dropped as malformed (always 0 on the write path).
    pub dropped: usize,
}

/// Validate, de-duplicate by id (last occurrence wins) and sort by priority
/// descending. Policies with equal priority keep their input order.
pub fn normalize_policies(raw: &[Value], options: NormalizeOptions) -> Result<Vec<AbacPolicy>> {
    normalize_with_report(raw, options).map(|normalized| normalized.policies)
}

/// [`normalize_policies`] that also reports how many entries were dropped.
pub fn normalize_with_report(raw: &[Value], options: NormalizeOptions) -> Result<Normalized> {
    let mut parsed = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;

    for (index, value) in raw.iter().enumerate() {
        match parse_policy(value, options.assume_validated) {
            Ok(policy) => parsed.push(policy),
            Err(reason) if options.fail_on_invalid => {
                return Err(AuthzError::PolicyValidation { index, reason });
            }
            Err(reason) => {
                debug!(index, reason = %reason, "Dropping malformed ABAC policy");
                dropped += 1;
            }
        }
    }

    if dropped > 0 {
        warn!(dropped, total = raw.len(), "Malformed ABAC policies ignored");
        metrics::counter!("authz_policies_dropped_total").increment(dropped as u64);
    }

    let mut policies = dedupe_by_id(parsed);
    policies.sort_by_key(|policy| std::cmp::Reverse(policy.effective_priority()));

    Ok(Normalized { policies, dropped })
}

fn parse_policy(value: &Value, assume_validated: bool) -> std::result::Result<AbacPolicy, String> {
    let policy: AbacPolicy = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    if !assume_validated {
        policy.validate()?;
    }
    Ok(policy)
}

/// Later entries replace earlier ones but keep the earlier slot.
fn dedupe_by_id(policies: Vec<AbacPolicy>) -> Vec<AbacPolicy> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(policies.len());
    let mut unique: Vec<AbacPolicy> = Vec::with_capacity(policies.len());

    for policy in policies {
        match slots.get(&policy.id) {
            Some(&slot) => unique[slot] = policy,
            None => {
                slots.insert(policy.id.clone(), unique.len());
                unique.push(policy);
            }
        }
    }
    unique
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
