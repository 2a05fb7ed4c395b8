//! ABAC evaluation.
//!
//! Default deny. Policies are visited in priority order (highest first); the
//! first matching `deny` is final, a matching `allow` grants but later
//! policies are still checked for a deny.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::normalize::{normalize_policies, NormalizeOptions};
use super::store::AbacPolicyStore;
use super::types::{
    AbacPolicy, AttributeBlock, AttributeMap, AttributeValue, ConditionValue, PolicyEffect,
    PredicateOp,
};
use crate::error::{AuthzError, Result};
use crate::rbac::OrganizationId;
use crate::telemetry::{AuthzMetrics, DecisionEngine, EvaluationTimer};

/// Result of running a request through a policy set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbacDecision {
    pub allowed: bool,
    /// The deny that ended evaluation, or the first allow that granted.
    pub deciding_policy: Option<String>,
    pub matched_policies: Vec<String>,
}

/// A single authorization request against a policy set.
#[derive(Debug, Clone, Copy)]
pub struct AbacRequest<'a> {
    pub action: &'a str,
    pub resource_type: &'a str,
    pub subject: &'a AttributeMap,
    pub resource: &'a AttributeMap,
}

/// Evaluate an already-normalized, priority-ordered policy set.
pub fn decide(policies: &[AbacPolicy], request: &AbacRequest<'_>) -> AbacDecision {
    let mut decision = AbacDecision {
        allowed: false,
        deciding_policy: None,
        matched_policies: Vec::new(),
    };

    for policy in policies {
        if !policy.covers_action(request.action) || !policy.covers_resource(request.resource_type) {
            continue;
        }
        if !condition_matches(policy, request.subject, request.resource) {
            continue;
        }

        decision.matched_policies.push(policy.id.clone());
        match policy.effect {
            PolicyEffect::Deny => {
                decision.allowed = false;
                decision.deciding_policy = Some(policy.id.clone());
                return decision;
            }
            PolicyEffect::Allow => {
                if !decision.allowed {
                    decision.allowed = true;
                    decision.deciding_policy = Some(policy.id.clone());
                }
            }
        }
    }

    decision
}

fn condition_matches(policy: &AbacPolicy, subject: &AttributeMap, resource: &AttributeMap) -> bool {
    let Some(condition) = &policy.condition else {
        return true;
    };
    let deny = policy.effect == PolicyEffect::Deny;
    let subject_ok = condition
        .subject
        .as_ref()
        .map_or(true, |block| block_matches(block, subject, None, deny));
    subject_ok
        && condition
            .resource
            .as_ref()
            .map_or(true, |block| block_matches(block, resource, Some(subject), deny))
}

/// `references` is the subject map when `"$subject.x"` values may be resolved.
///
/// A missing actual attribute or a dangling reference fails closed. It never
/// matches, except under an `ne` predicate of a deny policy, where it does.
fn block_matches(
    block: &AttributeBlock,
    actual: &AttributeMap,
    references: Option<&AttributeMap>,
    deny: bool,
) -> bool {
    block.iter().all(|(key, expected)| {
        let actual = actual.get(key);
        match expected {
            ConditionValue::Literal(value) => match (resolve(value, references), actual) {
                (Some(value), Some(actual)) => literal_matches(value, actual),
                _ => false,
            },
            ConditionValue::Predicate(predicate) => match (resolve(&predicate.value, references), actual) {
                (Some(value), Some(actual)) => predicate_matches(predicate.op, value, actual),
                _ => deny && predicate.op == PredicateOp::Ne,
            },
        }
    })
}

/// A dangling subject reference resolves to nothing.
fn resolve<'a>(value: &'a AttributeValue, references: Option<&'a AttributeMap>) -> Option<&'a AttributeValue> {
    match (references, value.subject_reference()) {
        (Some(subject), Some(attribute)) => subject.get(attribute),
        _ => Some(value),
    }
}

/// Equality, or superset containment when the expected value is a list.
fn literal_matches(expected: &AttributeValue, actual: &AttributeValue) -> bool {
    match (expected, actual) {
        (AttributeValue::List(wanted), AttributeValue::List(held)) => {
            wanted.iter().all(|item| held.contains(item))
        }
        (AttributeValue::List(_), _) => false,
        _ => expected == actual,
    }
}

fn predicate_matches(op: PredicateOp, expected: &AttributeValue, actual: &AttributeValue) -> bool {
    match op {
        PredicateOp::Eq => literal_matches(expected, actual),
        PredicateOp::Ne => !literal_matches(expected, actual),
        PredicateOp::In => {
            let AttributeValue::List(options) = expected else {
                return false;
            };
            match actual {
                AttributeValue::List(held) => held.iter().any(|item| options.contains(item)),
                scalar => options.contains(scalar),
            }
        }
        PredicateOp::Gt => compare(expected, actual).is_some_and(|(e, a)| a > e),
        PredicateOp::Lt => compare(expected, actual).is_some_and(|(e, a)| a < e),
    }
}

fn compare(expected: &AttributeValue, actual: &AttributeValue) -> Option<(f64, f64)> {
    Some((expected.as_f64()?, actual.as_f64()?))
}

/// Build an attribute map from a JSON object, keeping non-blank keys whose
/// values are literals or lists of literals.
pub fn attribute_map_from_json(value: &Value) -> AttributeMap {
    let Some(object) = value.as_object() else {
        return AttributeMap::new();
    };
    object
        .iter()
        .filter(|(key, _)| !key.trim().is_empty())
        .filter_map(|(key, raw)| {
            AttributeValue::try_from(raw)
                .ok()
                .map(|value| (key.clone(), value))
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Evaluator
// ═══════════════════════════════════════════════════════════════════════════════

/// Tenant-aware evaluator backed by an [`AbacPolicyStore`].
#[derive(Clone)]
pub struct AbacEvaluator {
    store: Arc<dyn AbacPolicyStore>,
}

impl AbacEvaluator {
    pub fn new(store: Arc<dyn AbacPolicyStore>) -> Self {
        Self { store }
    }

    /// Normalized policies for an organization (read path).
    pub async fn policies_for(&self, org_id: &OrganizationId) -> Result<Vec<AbacPolicy>> {
        let raw = self.store.get_policies_for_org(org_id).await?;
        normalize_policies(&raw, NormalizeOptions::read_path())
    }

    /// Non-throwing evaluation. A store failure is a deny.
    #[instrument(level = "debug", skip(self, org_id, subject, resource), fields(org_id = %org_id))]
    pub async fn evaluate(
        &self,
        org_id: &OrganizationId,
        action: &str,
        resource_type: &str,
        subject: &AttributeMap,
        resource: &AttributeMap,
    ) -> bool {
        let timer = EvaluationTimer::start(DecisionEngine::Abac);
        let policies = match self.policies_for(org_id).await {
            Ok(policies) => policies,
            Err(err) => {
                warn!(org_id = %org_id, error = %err, "ABAC policy lookup failed; denying");
                AuthzMetrics::record_decision(DecisionEngine::Abac, false);
                return false;
            }
        };

        let decision = decide(
            &policies,
            &AbacRequest {
                action,
                resource_type,
                subject,
                resource,
            },
        );

        debug!(
            allowed = decision.allowed,
            deciding_policy = ?decision.deciding_policy,
            matched = decision.matched_policies.len(),
            "ABAC evaluated"
        );
        AuthzMetrics::record_decision(DecisionEngine::Abac, decision.allowed);
        timer.finish();

        decision.allowed
    }

    /// Like [`evaluate`](Self::evaluate) but a denial is an error.
    pub async fn require_abac_allowance(
        &self,
        org_id: &OrganizationId,
        action: &str,
        resource_type: &str,
        subject: &AttributeMap,
        resource: &AttributeMap,
    ) -> Result<()> {
        if self.evaluate(org_id, action, resource_type, subject, resource).await {
            Ok(())
        } else {
            Err(AuthzError::abac(action, resource_type))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
