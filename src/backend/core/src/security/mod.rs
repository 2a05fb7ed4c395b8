//! Security policy engine.
//!
//! This module provides:
//! - **Types**: policies, conditions, actions and evaluation results
//! - **Conditions**: typed comparators per condition kind
//! - **Actions**: obligation execution (MFA, audit, quarantine, restrictions)
//! - **Cache**: TTL result cache with pluggable keys
//! - **Audit**: security event sink collaborator
//! - **Defaults**: per-organization default policy set
//!
//! # Usage
//!
//! ```rust,ignore
//! use orgauth_core::security::{SecurityContext, SecurityPolicyEngine};
//!
//! let access = guard.assert_org_access(&input).await?;
//! let context = SecurityContext::new(access).with_mfa_verified(session.mfa);
//!
//! let report = engine
//!     .enforce_policies(&context, "export", "payroll", Some(run_id))
//!     .await?;
//! ```

pub mod actions;
pub mod audit;
pub mod cache;
pub mod conditions;
pub mod defaults;
pub mod engine;
pub mod types;

pub use actions::execute_action;
pub use audit::{emit, EventSeverity, InMemoryEventSink, SecurityEvent, SecurityEventSink, TracingEventSink};
pub use cache::{
    session_suffix, CacheKeyStrategy, CacheStats, DefaultCacheKey, OperationTarget, PolicyCache,
    SessionAwareCacheKey,
};
pub use conditions::{condition_matches, policy_matches, Clock, FixedClock, SystemClock};
pub use defaults::{build_default_security_policies, OrgSecurityPolicies};
pub use engine::SecurityPolicyEngine;
pub use types::{
    ActionKind, ConditionKind, ConditionOperator, EnforcementReport, PolicyEvaluationResult,
    SecurityAction, SecurityCondition, SecurityContext, SecurityPolicy,
};
