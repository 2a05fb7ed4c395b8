//! Attribute-Based Access Control (ABAC).
//!
//! Tenants configure policies as JSON. This module provides:
//! - **Types**: policies, conditions, predicates and attribute values
//! - **Normalizer**: zero-trust parsing, de-duplication and priority ordering
//! - **Store**: the persistence collaborator plus the tenant write path
//! - **Evaluator**: default-deny evaluation where any matching deny is final
//!
//! # Usage
//!
//! ```rust,ignore
//! use orgauth_core::abac::{AbacEvaluator, InMemoryPolicyStore, attribute_map_from_json};
//!
//! let evaluator = AbacEvaluator::new(Arc::new(InMemoryPolicyStore::new()));
//! let subject = attribute_map_from_json(&json!({"roles": ["manager"], "departmentId": "d1"}));
//! let resource = attribute_map_from_json(&json!({"departmentId": "d1"}));
//!
//! evaluator
//!     .require_abac_allowance(&org_id, "approve", "leave-request", &subject, &resource)
//!     .await?;
//! ```

pub mod evaluator;
pub mod normalize;
pub mod selectors;
pub mod store;
pub mod types;

pub use evaluator::{attribute_map_from_json, decide, AbacDecision, AbacEvaluator, AbacRequest};
pub use normalize::{normalize_policies, normalize_with_report, NormalizeOptions, Normalized};
pub use selectors::{bootstrap_policies, default_bootstrap_policies, SelectorAllowlist};
pub use store::{AbacPolicyStore, InMemoryPolicyStore, TenantPolicyService};
pub use types::{
    selector_matches, AbacPolicy, AttributeBlock, AttributeMap, AttributePredicate, AttributeValue,
    ConditionValue, PolicyCondition, PolicyEffect, PredicateOp,
};
