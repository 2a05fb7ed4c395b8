//! Security policy engine.
//!
//! Runs on contexts the org guard already granted. Policies are evaluated
//! in ascending priority; every matching policy contributes its actions and
//! the first matching `deny` policy ends evaluation. Without a deny the
//! result is allowed.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::actions::{execute_action, security_event};
use super::audit::{emit, EventSeverity, SecurityEventSink, TracingEventSink};
use super::cache::{
    session_suffix, CacheKeyStrategy, CacheStats, DefaultCacheKey, OperationTarget, PolicyCache,
};
use super::conditions::{policy_matches, Clock, SystemClock};
use super::defaults::{build_default_security_policies, OrgSecurityPolicies};
use super::types::{EnforcementReport, PolicyEvaluationResult, SecurityContext, SecurityPolicy};
use crate::config::SecurityEngineConfig;
use crate::error::{AuthzError, Result};
use crate::rbac::OrganizationId;
use crate::telemetry::{AuthzMetrics, DecisionEngine, EvaluationTimer};

/// Ordered policy table plus a TTL result cache.
///
/// The table is copy-on-write: evaluations work on a snapshot, so a
/// concurrent `add_policy` never blocks a running evaluation. Changing the
/// table does not invalidate cached results; call
/// [`clear_cache`](Self::clear_cache) afterwards.
///
/// While an enabled policy of the tenant tests the IP address or role list,
/// the cache key carries both, so a result cached for one session is never
/// served to another.
pub struct SecurityPolicyEngine {
    policies: RwLock<Arc<Vec<SecurityPolicy>>>,
    cache: PolicyCache,
    enable_caching: bool,
    log_policy_evaluations: bool,
    sink: Arc<dyn SecurityEventSink>,
    clock: Arc<dyn Clock>,
    key_strategy: Arc<dyn CacheKeyStrategy>,
}

impl SecurityPolicyEngine {
    pub fn new(config: &SecurityEngineConfig, sink: Arc<dyn SecurityEventSink>) -> Self {
        Self {
            policies: RwLock::new(Arc::new(Vec::new())),
            cache: PolicyCache::with_capacity(config.cache_ttl, config.cache_max_entries),
            enable_caching: config.enable_caching,
            log_policy_evaluations: config.log_policy_evaluations,
            sink,
            clock: Arc::new(SystemClock),
            key_strategy: Arc::new(DefaultCacheKey),
        }
    }

    /// Engine with default settings that audits to tracing.
    pub fn with_defaults() -> Self {
        Self::new(&SecurityEngineConfig::default(), Arc::new(TracingEventSink))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_key_strategy(mut self, strategy: Arc<dyn CacheKeyStrategy>) -> Self {
        self.key_strategy = strategy;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Policy table
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace (by id) a policy. Equal priorities keep insertion order.
    pub fn add_policy(&self, policy: SecurityPolicy) {
        let mut table = self.policies.write();
        let mut next: Vec<SecurityPolicy> = table
            .iter()
            .filter(|existing| existing.id != policy.id)
            .cloned()
            .collect();
        debug!(policy_id = %policy.id, priority = policy.priority, "Security policy added");
        next.push(policy);
        next.sort_by_key(|p| p.priority);
        *table = Arc::new(next);
    }

    pub fn remove_policy(&self, policy_id: &str) -> bool {
        let mut table = self.policies.write();
        if !table.iter().any(|p| p.id == policy_id) {
            return false;
        }
        let next: Vec<SecurityPolicy> = table.iter().filter(|p| p.id != policy_id).cloned().collect();
        *table = Arc::new(next);
        debug!(policy_id = %policy_id, "Security policy removed");
        true
    }

    /// Copy of the table in evaluation order.
    pub fn get_policies(&self) -> Vec<SecurityPolicy> {
        self.snapshot().as_ref().clone()
    }

    /// Add the default policy set of `org_id`. Returns how many were added.
    pub fn initialize_default_policies(&self, org_id: &OrganizationId, settings: &OrgSecurityPolicies) -> usize {
        let policies = build_default_security_policies(org_id, settings);
        let count = policies.len();
        for policy in policies {
            self.add_policy(policy);
        }
        info!(org_id = %org_id, policies = count, "Default security policies initialized");
        count
    }

    fn snapshot(&self) -> Arc<Vec<SecurityPolicy>> {
        Arc::clone(&self.policies.read())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cache
    // ─────────────────────────────────────────────────────────────────────────

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop expired results now instead of waiting for lookups or a full
    /// cache. Returns how many were removed.
    pub fn cleanup_expired_cache(&self) -> u64 {
        self.cache.cleanup_expired()
    }

    fn cache_key(
        &self,
        policies: &[SecurityPolicy],
        context: &SecurityContext,
        target: &OperationTarget<'_>,
    ) -> String {
        let mut key = self.key_strategy.cache_key(context, target);
        let org_id = context.access.org_id();
        let session_bound = policies
            .iter()
            .any(|p| p.enabled && p.applies_to(org_id) && p.depends_on_session());
        if session_bound && !self.key_strategy.includes_session() {
            key.push_str(&session_suffix(context));
        }
        key
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Evaluation
    // ─────────────────────────────────────────────────────────────────────────

    /// Evaluate the table for one operation.
    ///
    /// A cache hit returns the stored result itself and replays no side
    /// effects.
    #[instrument(level = "debug", skip(self, context), fields(org_id = %context.access.org_id()))]
    pub async fn evaluate_policies(
        &self,
        context: &SecurityContext,
        operation: &str,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> Arc<PolicyEvaluationResult> {
        let target = OperationTarget {
            operation,
            resource_type,
            resource_id: resource_id.unwrap_or(""),
        };

        let policies = self.snapshot();
        let cache_key = self
            .enable_caching
            .then(|| self.cache_key(&policies, context, &target));
        if let Some(key) = cache_key.as_deref() {
            if let Some(cached) = self.cache.get(key) {
                return cached;
            }
        }

        let timer = EvaluationTimer::start(DecisionEngine::SecurityPolicy);
        let result = Arc::new(self.run_policies(&policies, context));

        if !result.allowed {
            let deciding = result.matched_policies.last().map(|p| p.id.clone()).unwrap_or_default();
            let event = security_event(
                context,
                &target,
                "security_policy_violation",
                EventSeverity::High,
                format!("Access denied by security policy {deciding}"),
            )
            .with_metadata("policyId", deciding)
            .with_metadata("decisionLog", result.decision_log.clone());
            emit(self.sink.as_ref(), event).await;
        } else if self.log_policy_evaluations {
            let event = security_event(
                context,
                &target,
                "security_policy_evaluation",
                EventSeverity::Low,
                format!("Security policies evaluated for {operation} on {resource_type}"),
            )
            .with_metadata("matchedPolicies", result.matched_policy_ids())
            .with_metadata("actions", result.actions.len());
            emit(self.sink.as_ref(), event).await;
        }

        if let Some(key) = cache_key {
            self.cache.insert(key, Arc::clone(&result));
        }

        AuthzMetrics::record_decision(DecisionEngine::SecurityPolicy, result.allowed);
        timer.finish();
        debug!(
            allowed = result.allowed,
            matched = result.matched_policies.len(),
            actions = result.actions.len(),
            "Security policies evaluated"
        );

        result
    }

    fn run_policies(&self, policies: &[SecurityPolicy], context: &SecurityContext) -> PolicyEvaluationResult {
        let org_id = context.access.org_id();
        let mut result = PolicyEvaluationResult {
            allowed: true,
            actions: Vec::new(),
            matched_policies: Vec::new(),
            decision_log: Vec::new(),
        };

        for policy in policies.iter().filter(|p| p.enabled && p.applies_to(org_id)) {
            if !policy_matches(policy, context, self.clock.as_ref()) {
                continue;
            }

            result.actions.extend(policy.actions.iter().cloned());
            result
                .decision_log
                .push(format!("Policy {} ({}) matched", policy.id, policy.name));
            result.matched_policies.push(policy.clone());

            if policy.is_deny() {
                result.allowed = false;
                result
                    .decision_log
                    .push(format!("Access denied by policy {}", policy.id));
                return result;
            }
        }

        if result.matched_policies.is_empty() {
            result.decision_log.push("No security policy matched".to_string());
        }
        result
    }

    /// Evaluate, then execute every accumulated action.
    ///
    /// Fails with `MfaRequired` when a `require_mfa` action meets an
    /// unverified session, and with `SecurityPolicyDenied` when the
    /// evaluation was not allowed.
    pub async fn enforce_policies(
        &self,
        context: &SecurityContext,
        operation: &str,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> Result<EnforcementReport> {
        let result = self
            .evaluate_policies(context, operation, resource_type, resource_id)
            .await;
        let target = OperationTarget {
            operation,
            resource_type,
            resource_id: resource_id.unwrap_or(""),
        };

        let mut report = EnforcementReport::default();
        for action in &result.actions {
            if let Err(err) =
                execute_action(action, context, &target, &result, self.sink.as_ref(), &mut report).await
            {
                err.log();
                return Err(err);
            }
        }

        if !result.allowed {
            warn!(
                org_id = %context.access.org_id(),
                user_id = %context.access.user_id(),
                operation = %operation,
                resource_type = %resource_type,
                "Operation denied by security policy"
            );
            let err = AuthzError::SecurityPolicyDenied {
                operation: operation.to_string(),
                resource_type: resource_type.to_string(),
                resource_id: target.resource_id.to_string(),
            };
            err.log();
            return Err(err);
        }

        Ok(report)
    }
}

impl std::fmt::Debug for SecurityPolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityPolicyEngine")
            .field("policies", &self.policies.read().len())
            .field("cache", &self.cache)
            .field("enable_caching", &self.enable_caching)
            .field("log_policy_evaluations", &self.log_policy_evaluations)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{DataClassificationLevel, DataResidencyZone};
    use crate::rbac::{OrgRoleKey, RoleKey};
    use crate::security::audit::InMemoryEventSink;
    use crate::security::types::{
        ActionKind, ConditionKind, ConditionOperator, SecurityAction, SecurityCondition,
    };
    use std::time::Duration;

    fn engine(sink: Arc<InMemoryEventSink>) -> SecurityPolicyEngine {
        SecurityPolicyEngine::new(&SecurityEngineConfig::default(), sink)
    }

    fn context(classification: DataClassificationLevel) -> SecurityContext {
        SecurityContext::new(crate::security::test_support::access_context(
            RoleKey::BuiltIn(OrgRoleKey::Manager),
            DataResidencyZone::UkOnly,
            classification,
        ))
    }

    fn deny_secret(priority: i32) -> SecurityPolicy {
        SecurityPolicy::new("deny-secret", "Deny secret", priority)
            .with_condition(SecurityCondition::new(
                ConditionKind::DataClassification,
                ConditionOperator::Equals,
                "SECRET",
            ))
            .with_action(SecurityAction::new(ActionKind::Deny))
    }

    fn log_all(id: &str, priority: i32) -> SecurityPolicy {
        SecurityPolicy::new(id, id, priority).with_action(SecurityAction::new(ActionKind::LogEvent))
    }

    #[test]
    fn test_table_is_sorted_and_stable() {
        let engine = engine(Arc::new(InMemoryEventSink::new()));
        engine.add_policy(log_all("b", 20));
        engine.add_policy(log_all("a", 10));
        engine.add_policy(log_all("c", 20));
        engine.add_policy(log_all("a", 30));

        let ids: Vec<String> = engine.get_policies().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        assert!(engine.remove_policy("c"));
        assert!(!engine.remove_policy("c"));
        assert_eq!(engine.get_policies().len(), 2);
    }

    #[tokio::test]
    async fn test_default_allow_without_matches() {
        let sink = Arc::new(InMemoryEventSink::new());
        let engine = engine(sink.clone());
        engine.add_policy(deny_secret(10));

        let result = engine
            .evaluate_policies(&context(DataClassificationLevel::Official), "read", "employee", None)
            .await;
        assert!(result.allowed);
        assert!(result.matched_policies.is_empty());
        assert_eq!(sink.events_of_type("security_policy_evaluation").len(), 1);
    }

    #[tokio::test]
    async fn test_deny_short_circuits() {
        let sink = Arc::new(InMemoryEventSink::new());
        let engine = engine(sink.clone());
        engine.add_policy(log_all("first", 1));
        engine.add_policy(deny_secret(10));
        engine.add_policy(log_all("after", 20));

        let result = engine
            .evaluate_policies(&context(DataClassificationLevel::Secret), "read", "employee", Some("e-1"))
            .await;

        assert!(!result.allowed);
        assert_eq!(result.matched_policy_ids(), vec!["first", "deny-secret"]);
        assert_eq!(result.actions.len(), 2);
        assert_eq!(sink.events_of_type("security_policy_violation").len(), 1);
        assert!(sink.events_of_type("security_policy_evaluation").is_empty());
    }

    #[tokio::test]
    async fn test_disabled_and_foreign_policies_are_skipped() {
        let engine = engine(Arc::new(InMemoryEventSink::new()));
        engine.add_policy(deny_secret(1).disabled());
        engine.add_policy(
            SecurityPolicy::new("foreign", "Foreign deny", 2)
                .scoped_to(OrganizationId::new("another-org"))
                .with_action(SecurityAction::new(ActionKind::Deny)),
        );

        let result = engine
            .evaluate_policies(&context(DataClassificationLevel::Secret), "read", "employee", None)
            .await;
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn test_cache_hit_has_no_side_effects() {
        let sink = Arc::new(InMemoryEventSink::new());
        let engine = engine(sink.clone());
        engine.add_policy(log_all("log", 1));
        let ctx = context(DataClassificationLevel::Official);

        let first = engine.evaluate_policies(&ctx, "read", "employee", Some("e-1")).await;
        let second = engine.evaluate_policies(&ctx, "read", "employee", Some("e-1")).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(sink.len(), 1);
        let stats = engine.cache_stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));

        engine.clear_cache();
        let third = engine.evaluate_policies(&ctx, "read", "employee", Some("e-1")).await;
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_ip_condition_widens_cache_key() {
        let sink = Arc::new(InMemoryEventSink::new());
        let engine = engine(sink.clone());
        engine.add_policy(
            SecurityPolicy::new("ip-allowlist", "IP allowlist", 1)
                .with_condition(SecurityCondition::new(
                    ConditionKind::IpAddress,
                    ConditionOperator::MatchesRegex,
                    ".+",
                ))
                .with_condition(SecurityCondition::new(
                    ConditionKind::IpAddress,
                    ConditionOperator::NotEquals,
                    "10.0.0.1",
                ))
                .with_action(SecurityAction::new(ActionKind::Deny)),
        );
        let office = context(DataClassificationLevel::Official).with_ip_address("10.0.0.1");
        let remote = context(DataClassificationLevel::Official).with_ip_address("203.0.113.9");

        assert!(engine.evaluate_policies(&office, "read", "employee", Some("e-1")).await.allowed);
        let denied = engine.evaluate_policies(&remote, "read", "employee", Some("e-1")).await;
        assert!(!denied.allowed);
        assert_eq!(denied.matched_policy_ids(), vec!["ip-allowlist"]);

        let stats = engine.cache_stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (0, 2, 2));
        assert!(engine.evaluate_policies(&office, "read", "employee", Some("e-1")).await.allowed);
        assert_eq!(engine.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_role_condition_widens_cache_key() {
        let engine = engine(Arc::new(InMemoryEventSink::new()));
        engine.add_policy(
            SecurityPolicy::new("deny-contractors", "Deny contractors", 1)
                .with_condition(SecurityCondition::new(
                    ConditionKind::UserRole,
                    ConditionOperator::Contains,
                    "contractor",
                ))
                .with_action(SecurityAction::new(ActionKind::Deny)),
        );
        let staff = context(DataClassificationLevel::Official).with_roles(vec!["staff".to_string()]);
        let contractor = context(DataClassificationLevel::Official).with_roles(vec!["contractor".to_string()]);

        assert!(engine.evaluate_policies(&staff, "read", "employee", None).await.allowed);
        assert!(!engine.evaluate_policies(&contractor, "read", "employee", None).await.allowed);
    }

    #[tokio::test]
    async fn test_session_free_policies_share_cache_entry() {
        let engine = engine(Arc::new(InMemoryEventSink::new()));
        engine.add_policy(deny_secret(1));
        let office = context(DataClassificationLevel::Official).with_ip_address("10.0.0.1");
        let remote = context(DataClassificationLevel::Official).with_ip_address("203.0.113.9");

        let first = engine.evaluate_policies(&office, "read", "employee", None).await;
        let second = engine.evaluate_policies(&remote, "read", "employee", None).await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_cache_is_bounded_and_swept() {
        let config = SecurityEngineConfig {
            cache_ttl: Duration::from_millis(10),
            cache_max_entries: 5,
            log_policy_evaluations: false,
            ..SecurityEngineConfig::default()
        };
        let engine = SecurityPolicyEngine::new(&config, Arc::new(InMemoryEventSink::new()));
        let ctx = context(DataClassificationLevel::Official);

        for i in 0..20 {
            let id = format!("e-{i}");
            engine.evaluate_policies(&ctx, "read", "employee", Some(&id)).await;
        }
        assert!(engine.cache_stats().entries <= 5);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.cleanup_expired_cache() >= 1);
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_caching_disabled() {
        let config = SecurityEngineConfig {
            enable_caching: false,
            log_policy_evaluations: false,
            cache_ttl: Duration::from_secs(60),
            ..SecurityEngineConfig::default()
        };
        let sink = Arc::new(InMemoryEventSink::new());
        let engine = SecurityPolicyEngine::new(&config, sink.clone());
        let ctx = context(DataClassificationLevel::Official);

        let first = engine.evaluate_policies(&ctx, "read", "employee", None).await;
        let second = engine.evaluate_policies(&ctx, "read", "employee", None).await;
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cache_stats().entries, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_enforce_reports_restrictions() {
        let engine = engine(Arc::new(InMemoryEventSink::new()));
        engine.add_policy(
            SecurityPolicy::new("restrict", "Restrict", 1).with_action(
                SecurityAction::new(ActionKind::RestrictAccess).with_parameter("maxSessionMinutes", 15),
            ),
        );

        let report = engine
            .enforce_policies(&context(DataClassificationLevel::Official), "read", "employee", None)
            .await
            .unwrap();
        assert_eq!(report.session_restrictions["maxSessionMinutes"], serde_json::json!(15));
        assert!(!report.quarantined);
    }

    #[tokio::test]
    async fn test_enforce_denial() {
        let engine = engine(Arc::new(InMemoryEventSink::new()));
        engine.add_policy(deny_secret(1));

        let err = engine
            .enforce_policies(&context(DataClassificationLevel::Secret), "export", "payroll", Some("run-9"))
            .await
            .unwrap_err();
        match err {
            AuthzError::SecurityPolicyDenied {
                operation,
                resource_type,
                resource_id,
            } => {
                assert_eq!(operation, "export");
                assert_eq!(resource_type, "payroll");
                assert_eq!(resource_id, "run-9");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_initialize_default_policies() {
        let engine = engine(Arc::new(InMemoryEventSink::new()));
        let org = OrganizationId::new(crate::security::test_support::ORG);
        let added = engine.initialize_default_policies(&org, &OrgSecurityPolicies::default());
        assert_eq!(added, engine.get_policies().len());

        let err = engine
            .enforce_policies(&context(DataClassificationLevel::Secret), "read", "employee", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::MfaRequired { ref policy_id } if policy_id.ends_with("mfa-classification-secret")));

        let verified = context(DataClassificationLevel::Secret).with_mfa_verified(true);
        assert!(engine.enforce_policies(&verified, "read", "employee", None).await.is_ok());
    }
}
