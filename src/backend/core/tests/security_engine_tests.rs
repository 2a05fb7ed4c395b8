//! Integration tests for the security policy engine and its composition with
//! the org guard.

use chrono::{DateTime, FixedOffset};
use orgauth_core::abac::{AbacEvaluator, InMemoryPolicyStore};
use orgauth_core::config::{Config, SecurityEngineConfig};
use orgauth_core::error::AuthzError;
use orgauth_core::guard::{
    AccessContext, DataClassificationLevel, DataResidencyZone, InMemoryMembershipRepository, MembershipRecord,
    OrgAccessGuard, OrgAccessInput, OrganizationRecord,
};
use orgauth_core::rbac::{OrganizationId, UserId};
use orgauth_core::security::{
    ActionKind, Clock, ConditionKind, ConditionOperator, InMemoryEventSink, OrgSecurityPolicies, SecurityAction,
    SecurityCondition, SecurityContext, SecurityPolicy, SecurityPolicyEngine,
};
use orgauth_core::wiring::{AuthorizationServices, SessionSignals};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Utilities
// ============================================================================

const ORG: &str = "7f1c1b9e-8a41-4a53-9d0c-3f7c1c2b9a10";
const USER: &str = "0b6f3c52-1d7e-4f0a-8c59-2d4b8e6a7f31";

fn organization(
    classification: DataClassificationLevel,
    residency: DataResidencyZone,
) -> OrganizationRecord {
    OrganizationRecord {
        data_residency: residency,
        data_classification: classification,
    }
}

fn memberships(role: &str, organization: OrganizationRecord) -> InMemoryMembershipRepository {
    InMemoryMembershipRepository::new().with_membership(
        OrganizationId::new(ORG),
        UserId::new(USER),
        MembershipRecord::active(role, organization),
    )
}

/// A context granted by the guard for `role` in an organization with the
/// given tenant attributes.
async fn granted(
    role: &str,
    classification: DataClassificationLevel,
    residency: DataResidencyZone,
) -> AccessContext {
    let guard = OrgAccessGuard::new(
        Arc::new(memberships(role, organization(classification, residency))),
        AbacEvaluator::new(Arc::new(InMemoryPolicyStore::new())),
        &Config::default(),
    );
    guard
        .assert_org_access(&OrgAccessInput::new(ORG, USER))
        .await
        .unwrap()
}

fn engine(sink: &Arc<InMemoryEventSink>) -> SecurityPolicyEngine {
    SecurityPolicyEngine::new(&SecurityEngineConfig::default(), sink.clone())
}

fn engine_with_defaults(sink: &Arc<InMemoryEventSink>, settings: &OrgSecurityPolicies) -> SecurityPolicyEngine {
    let engine = engine(sink);
    engine.initialize_default_policies(&OrganizationId::new(ORG), settings);
    engine
}

/// Counts how often time conditions read the clock.
struct CountingClock {
    now: DateTime<FixedOffset>,
    reads: AtomicUsize,
}

impl CountingClock {
    fn new() -> Self {
        Self {
            now: DateTime::parse_from_rfc3339("2026-03-02T10:00:00+00:00").unwrap(),
            reads: AtomicUsize::new(0),
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Clock for CountingClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.now
    }
}

// ============================================================================
// Evaluation
// ============================================================================

#[tokio::test]
async fn test_default_allow_without_policies() {
    let sink = Arc::new(InMemoryEventSink::new());
    let engine = engine(&sink);
    let context = SecurityContext::new(
        granted("member", DataClassificationLevel::Official, DataResidencyZone::UkOnly).await,
    );

    let result = engine
        .evaluate_policies(&context, "read", "employeeProfile", Some("e-1"))
        .await;
    assert!(result.allowed);
    assert!(result.actions.is_empty());
    assert!(result.matched_policies.is_empty());
    assert_eq!(result.decision_log, vec!["No security policy matched".to_string()]);

    let report = engine
        .enforce_policies(&context, "read", "employeeProfile", Some("e-1"))
        .await
        .unwrap();
    assert_eq!(report.events_emitted, 0);
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events_of_type("security_policy_evaluation").len(), 1);
}

#[tokio::test]
async fn test_deny_short_circuits_evaluation() {
    let sink = Arc::new(InMemoryEventSink::new());
    let engine = engine(&sink);
    engine.add_policy(
        SecurityPolicy::new("audit-official", "Audit official data", 50)
            .with_condition(SecurityCondition::new(
                ConditionKind::DataClassification,
                ConditionOperator::Equals,
                "OFFICIAL",
            ))
            .with_action(SecurityAction::new(ActionKind::LogEvent)),
    );
    engine.add_policy(
        SecurityPolicy::new("block-members", "Block members", 1)
            .with_condition(SecurityCondition::new(
                ConditionKind::UserRole,
                ConditionOperator::Equals,
                "member",
            ))
            .with_action(SecurityAction::new(ActionKind::Deny)),
    );
    let context = SecurityContext::new(
        granted("member", DataClassificationLevel::Official, DataResidencyZone::UkOnly).await,
    );

    let result = engine.evaluate_policies(&context, "export", "payroll", None).await;
    assert!(!result.allowed);
    assert_eq!(result.matched_policy_ids(), vec!["block-members"]);
    assert_eq!(sink.events_of_type("security_policy_violation").len(), 1);

    engine.clear_cache();
    let err = engine
        .enforce_policies(&context, "export", "payroll", Some("run-7"))
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
            assert_eq!(resource_id, "run-7");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_cached_result_skips_reevaluation() {
    let sink = Arc::new(InMemoryEventSink::new());
    let clock = Arc::new(CountingClock::new());
    let config = SecurityEngineConfig {
        enable_caching: true,
        cache_ttl: Duration::from_secs(300),
        log_policy_evaluations: true,
        ..SecurityEngineConfig::default()
    };
    let engine = SecurityPolicyEngine::new(&config, sink.clone()).with_clock(clock.clone());
    engine.add_policy(
        SecurityPolicy::new("weekday-audit", "Weekday audit", 10)
            .with_condition(SecurityCondition::new(
                ConditionKind::TimeBased,
                ConditionOperator::Equals,
                "weekdays",
            ))
            .with_action(SecurityAction::new(ActionKind::LogEvent)),
    );
    let context = SecurityContext::new(
        granted("manager", DataClassificationLevel::Official, DataResidencyZone::UkOnly).await,
    );

    let first = engine.evaluate_policies(&context, "read", "team", Some("t-1")).await;
    let second = engine.evaluate_policies(&context, "read", "team", Some("t-1")).await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.matched_policy_ids(), vec!["weekday-audit"]);
    assert_eq!(clock.reads(), 1);
    assert_eq!(sink.events_of_type("security_policy_evaluation").len(), 1);

    let stats = engine.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    // A different resource is a different key.
    engine.evaluate_policies(&context, "read", "team", Some("t-2")).await;
    assert_eq!(clock.reads(), 2);
}

#[tokio::test]
async fn test_policies_scoped_to_other_org_are_ignored() {
    let sink = Arc::new(InMemoryEventSink::new());
    let engine = engine(&sink);
    engine.initialize_default_policies(
        &OrganizationId::new("2a7d9c1e-3b4f-4e6a-9d8c-7b6a5f4e3d2c"),
        &OrgSecurityPolicies::default(),
    );
    let context = SecurityContext::new(
        granted("owner", DataClassificationLevel::TopSecret, DataResidencyZone::GlobalRestricted).await,
    );

    let result = engine.evaluate_policies(&context, "read", "audit", None).await;
    assert!(result.allowed);
    assert!(result.matched_policies.is_empty());
}

// ============================================================================
// Default Policies
// ============================================================================

#[tokio::test]
async fn test_initialize_default_policies() {
    let sink = Arc::new(InMemoryEventSink::new());
    let engine = engine(&sink);
    let org = OrganizationId::new(ORG);

    let added = engine.initialize_default_policies(&org, &OrgSecurityPolicies::default());
    let policies = engine.get_policies();
    assert_eq!(policies.len(), added);
    assert!(policies.windows(2).all(|w| w[0].priority <= w[1].priority));
    assert!(policies.iter().all(|p| p.applies_to(&org)));
    assert!(policies.iter().all(|p| p.id.starts_with(ORG)));

    // Re-initializing replaces by id.
    assert_eq!(engine.initialize_default_policies(&org, &OrgSecurityPolicies::default()), added);
    assert_eq!(engine.get_policies().len(), added);
}

#[tokio::test]
async fn test_mfa_gate_for_secret_data() {
    let sink = Arc::new(InMemoryEventSink::new());
    let engine = engine_with_defaults(&sink, &OrgSecurityPolicies::default());
    let access = granted("member", DataClassificationLevel::Secret, DataResidencyZone::UkOnly).await;

    let unverified = SecurityContext::new(access.clone());
    let err = engine
        .enforce_policies(&unverified, "read", "employeeProfile", Some("e-1"))
        .await
        .unwrap_err();
    match err {
        AuthzError::MfaRequired { policy_id } => {
            assert_eq!(policy_id, format!("{ORG}:mfa-classification-secret"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let verified = SecurityContext::new(access).with_mfa_verified(true);
    let report = engine
        .enforce_policies(&verified, "read", "employeeProfile", Some("e-1"))
        .await
        .unwrap();
    assert!(!report.mfa_checked);
    assert!(!report.quarantined);
    assert_eq!(report.session_restrictions["sessionTimeoutMinutes"], json!(480));
    assert!(report.events_emitted >= 1);
}

#[tokio::test]
async fn test_mfa_gate_for_privileged_roles() {
    let sink = Arc::new(InMemoryEventSink::new());
    let engine = engine_with_defaults(&sink, &OrgSecurityPolicies::default());
    let access = granted("compliance", DataClassificationLevel::Official, DataResidencyZone::UkOnly).await;

    let err = engine
        .enforce_policies(&SecurityContext::new(access.clone()), "export", "audit", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::MfaRequired { ref policy_id } if policy_id.ends_with("mfa-role-compliance")));

    let report = engine
        .enforce_policies(&SecurityContext::new(access).with_mfa_verified(true), "export", "audit", None)
        .await
        .unwrap();
    assert!(report.session_restrictions.contains_key("sessionTimeoutMinutes"));
}

#[tokio::test]
async fn test_top_secret_session_restrictions() {
    let sink = Arc::new(InMemoryEventSink::new());
    let engine = engine_with_defaults(&sink, &OrgSecurityPolicies::default());
    let access = granted("manager", DataClassificationLevel::TopSecret, DataResidencyZone::UkOnly).await;

    let report = engine
        .enforce_policies(&SecurityContext::new(access).with_mfa_verified(true), "read", "team", None)
        .await
        .unwrap();
    assert_eq!(report.session_restrictions["maxSessionMinutes"], json!(15));
    assert_eq!(report.session_restrictions["sessionTimeoutMinutes"], json!(480));
    assert_eq!(sink.events_of_type("admin_notification").len(), 1);
}

#[tokio::test]
async fn test_residency_mismatch_quarantines_when_enabled() {
    let sink = Arc::new(InMemoryEventSink::new());
    let settings = OrgSecurityPolicies {
        auto_quarantine: true,
        ..OrgSecurityPolicies::default()
    };
    let engine = engine_with_defaults(&sink, &settings);
    let access = granted("member", DataClassificationLevel::Official, DataResidencyZone::UkAndEea).await;

    let report = engine
        .enforce_policies(&SecurityContext::new(access), "read", "absence", Some("a-1"))
        .await
        .unwrap();
    assert!(report.quarantined);
    assert_eq!(sink.events_of_type("data_quarantined").len(), 1);
}

#[tokio::test]
async fn test_ip_allowlist() {
    let sink = Arc::new(InMemoryEventSink::new());
    let settings = OrgSecurityPolicies {
        ip_allowlist: vec!["10.0.0.1".to_string()],
        ..OrgSecurityPolicies::default()
    };
    let engine = engine_with_defaults(&sink, &settings);
    let access = granted("member", DataClassificationLevel::Official, DataResidencyZone::UkOnly).await;

    let listed = SecurityContext::new(access.clone()).with_ip_address("10.0.0.1");
    assert!(engine.evaluate_policies(&listed, "read", "absence", None).await.allowed);

    let unlisted = SecurityContext::new(access.clone()).with_ip_address("203.0.113.9");
    let result = engine.evaluate_policies(&unlisted, "read", "absence", None).await;
    assert!(!result.allowed);
    assert_eq!(result.matched_policy_ids(), vec![format!("{ORG}:ip-allowlist").as_str()]);

    // No address, nothing to match.
    let unknown = SecurityContext::new(access);
    assert!(engine.evaluate_policies(&unknown, "read", "leavePolicy", None).await.allowed);
}

#[tokio::test]
async fn test_ip_allowlist_holds_with_warm_cache() {
    let sink = Arc::new(InMemoryEventSink::new());
    let settings = OrgSecurityPolicies {
        ip_allowlist: vec!["10.0.0.1".to_string()],
        ..OrgSecurityPolicies::default()
    };
    let engine = engine_with_defaults(&sink, &settings);
    let access = granted("member", DataClassificationLevel::Official, DataResidencyZone::UkOnly).await;

    let listed = SecurityContext::new(access.clone()).with_ip_address("10.0.0.1");
    let unlisted = SecurityContext::new(access.clone()).with_ip_address("203.0.113.9");
    let unknown = SecurityContext::new(access);

    // Same operation and resource for every session, so only the session
    // part of the key tells them apart.
    for _ in 0..2 {
        assert!(engine.evaluate_policies(&listed, "read", "absence", Some("a-1")).await.allowed);
        assert!(!engine.evaluate_policies(&unlisted, "read", "absence", Some("a-1")).await.allowed);
        assert!(engine.evaluate_policies(&unknown, "read", "absence", Some("a-1")).await.allowed);
    }

    let stats = engine.cache_stats();
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.hits, 3);
    assert!(engine
        .enforce_policies(&unlisted, "read", "absence", Some("a-1"))
        .await
        .is_err());
}

// ============================================================================
// Composition
// ============================================================================

#[tokio::test]
async fn test_authorize_operation_applies_mfa_after_guard() {
    let store = InMemoryPolicyStore::new().with_policies(
        OrganizationId::new(ORG),
        vec![json!({"id": "all", "effect": "allow", "actions": ["*"], "resources": ["*"]})],
    );
    let sink = Arc::new(InMemoryEventSink::new());
    let services = AuthorizationServices::default_wiring(
        Config::default(),
        Arc::new(memberships(
            "member",
            organization(DataClassificationLevel::Secret, DataResidencyZone::UkOnly),
        )),
        Arc::new(store),
        sink.clone(),
    )
    .unwrap();
    services
        .security_engine
        .initialize_default_policies(&OrganizationId::new(ORG), &OrgSecurityPolicies::default());

    let input = OrgAccessInput::new(ORG, USER)
        .require("employeeProfile", ["read"])
        .abac("read", "employeeProfile");

    let err = services
        .authorize_operation(&input, SessionSignals::default(), "read", "employeeProfile", Some("e-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::MfaRequired { .. }));

    let session = SessionSignals {
        mfa_verified: true,
        ip_address: Some("192.0.2.10".to_string()),
        user_agent: Some("hr-portal".to_string()),
    };
    let granted = services
        .authorize_operation(&input, session, "read", "employeeProfile", Some("e-1"))
        .await
        .unwrap();
    assert_eq!(granted.context.data_classification(), DataClassificationLevel::Secret);
    assert!(granted.report.session_restrictions.contains_key("sessionTimeoutMinutes"));

    // RBAC denial never reaches the engine.
    let before = services.security_engine.cache_stats().misses;
    let denied = OrgAccessInput::new(ORG, USER).require("payroll", ["export"]);
    assert!(matches!(
        services
            .authorize_operation(&denied, SessionSignals::default(), "export", "payroll", None)
            .await,
        Err(AuthzError::RbacDenied { .. })
    ));
    assert_eq!(services.security_engine.cache_stats().misses, before);
}
