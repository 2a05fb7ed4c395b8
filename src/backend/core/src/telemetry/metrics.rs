//! Authorization metrics.
//!
//! Everything is recorded through the `metrics` facade; the host process
//! decides which recorder (if any) to install.
//!
//! # Example
//!
//! ```rust,ignore
//! use orgauth_core::telemetry::metrics::{AuthzMetrics, DecisionEngine};
//!
//! AuthzMetrics::record_decision(DecisionEngine::Guard, true);
//! AuthzMetrics::record_cache_lookup(false);
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::sync::Once;
use std::time::{Duration, Instant};

static DESCRIBED: Once = Once::new();

/// The component that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionEngine {
    Guard,
    Abac,
    SecurityPolicy,
}

impl DecisionEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guard => "guard",
            Self::Abac => "abac",
            Self::SecurityPolicy => "security_policy",
        }
    }
}

/// Register all metric descriptions. Safe to call more than once.
pub fn describe_metrics() {
    DESCRIBED.call_once(|| {
        describe_counter!(
            "authz_decisions_total",
            "Authorization decisions by engine and outcome"
        );
        describe_counter!(
            "authz_errors_total",
            "Authorization errors by code and category"
        );
        describe_counter!(
            "authz_policy_cache_total",
            "Security policy cache lookups by result"
        );
        describe_counter!(
            "authz_policies_dropped_total",
            "Malformed ABAC policies dropped on the read path"
        );
        describe_counter!(
            "authz_security_events_total",
            "Security events emitted to the audit sink"
        );
        describe_histogram!(
            "authz_evaluation_duration_seconds",
            "Time spent producing an authorization decision"
        );
    });
}

/// Counters shared by the guard and both policy engines.
pub struct AuthzMetrics;

impl AuthzMetrics {
    pub fn record_decision(engine: DecisionEngine, allowed: bool) {
        let outcome = if allowed { "allow" } else { "deny" };
        counter!("authz_decisions_total", "engine" => engine.as_str(), "outcome" => outcome).increment(1);
    }

    pub fn record_cache_lookup(hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        counter!("authz_policy_cache_total", "result" => result).increment(1);
    }

    pub fn record_security_event(event_type: &str, delivered: bool) {
        counter!(
            "authz_security_events_total",
            "event_type" => event_type.to_string(),
            "delivered" => if delivered { "true" } else { "false" },
        )
        .increment(1);
    }
}

/// Times an evaluation and records it when finished.
pub struct EvaluationTimer {
    start: Instant,
    engine: DecisionEngine,
}

impl EvaluationTimer {
    pub fn start(engine: DecisionEngine) -> Self {
        Self {
            start: Instant::now(),
            engine,
        }
    }

    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        histogram!("authz_evaluation_duration_seconds", "engine" => self.engine.as_str())
            .record(duration.as_secs_f64());
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_metrics_is_idempotent() {
        describe_metrics();
        describe_metrics();
    }

    #[test]
    fn test_engine_labels() {
        assert_eq!(DecisionEngine::Guard.as_str(), "guard");
        assert_eq!(DecisionEngine::Abac.as_str(), "abac");
        assert_eq!(DecisionEngine::SecurityPolicy.as_str(), "security_policy");
    }

    #[test]
    fn test_evaluation_timer() {
        let timer = EvaluationTimer::start(DecisionEngine::Abac);
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.finish() >= Duration::from_millis(5));
    }
}
