//! Execution of matched policy actions.

use serde_json::Value;
use tracing::{info, warn};

use super::audit::{emit, EventSeverity, SecurityEvent, SecurityEventSink};
use super::cache::OperationTarget;
use super::types::{ActionKind, EnforcementReport, PolicyEvaluationResult, SecurityAction, SecurityContext};
use crate::error::{AuthzError, Result};

/// Build an event about `target` on behalf of the context's principal.
pub(crate) fn security_event(
    context: &SecurityContext,
    target: &OperationTarget<'_>,
    event_type: &str,
    severity: EventSeverity,
    description: String,
) -> SecurityEvent {
    let mut event = SecurityEvent::new(
        context.access.org_id().clone(),
        context.access.user_id().clone(),
        event_type,
        severity,
        description,
    )
    .with_metadata("operation", target.operation)
    .with_metadata("correlationId", context.access.correlation_id());
    event.resource_type = Some(target.resource_type.to_string());
    if !target.resource_id.is_empty() {
        event.resource_id = Some(target.resource_id.to_string());
    }
    if let Some(ip) = context.ip_address.as_deref() {
        event = event.with_metadata("ipAddress", ip);
    }
    event
}

fn describe(action: &SecurityAction, target: &OperationTarget<'_>, fallback: &str) -> String {
    action
        .parameters
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{fallback} for {} on {}", target.operation, target.resource_type))
}

/// Run one action, recording its effects in `report`.
///
/// Only `require_mfa` can fail.
pub async fn execute_action(
    action: &SecurityAction,
    context: &SecurityContext,
    target: &OperationTarget<'_>,
    result: &PolicyEvaluationResult,
    sink: &dyn SecurityEventSink,
    report: &mut EnforcementReport,
) -> Result<()> {
    let matched = Value::from(result.matched_policy_ids());

    match action.kind {
        ActionKind::RequireMfa => {
            report.mfa_checked = true;
            if !context.mfa_verified {
                let policy_id = result
                    .policy_with_action(ActionKind::RequireMfa)
                    .map(|policy| policy.id.clone())
                    .unwrap_or_default();
                return Err(AuthzError::MfaRequired { policy_id });
            }
        }
        ActionKind::LogEvent => {
            let severity = EventSeverity::from_parameter(action.parameters.get("severity"), EventSeverity::Medium);
            let event = security_event(
                context,
                target,
                "security_policy_event",
                severity,
                describe(action, target, "Security policy matched"),
            )
            .with_metadata("matchedPolicies", matched);
            if emit(sink, event).await {
                report.events_emitted += 1;
            }
        }
        ActionKind::NotifyAdmin => {
            warn!(
                org_id = %context.access.org_id(),
                user_id = %context.access.user_id(),
                operation = %target.operation,
                resource_type = %target.resource_type,
                "Security policy requested administrator notification"
            );
            let event = security_event(
                context,
                target,
                "admin_notification",
                EventSeverity::High,
                describe(action, target, "Administrator notification"),
            )
            .with_metadata("matchedPolicies", matched);
            if emit(sink, event).await {
                report.events_emitted += 1;
            }
        }
        ActionKind::QuarantineData => {
            warn!(
                org_id = %context.access.org_id(),
                resource_type = %target.resource_type,
                resource_id = %target.resource_id,
                "Data quarantined by security policy"
            );
            report.quarantined = true;
            let event = security_event(
                context,
                target,
                "data_quarantined",
                EventSeverity::Critical,
                describe(action, target, "Data quarantined"),
            )
            .with_metadata("matchedPolicies", matched);
            if emit(sink, event).await {
                report.events_emitted += 1;
            }
        }
        ActionKind::RestrictAccess => {
            let restrictions = serde_json::Value::Object(action.parameters.clone());
            info!(
                org_id = %context.access.org_id(),
                user_id = %context.access.user_id(),
                restrictions = %restrictions,
                "Session restricted by security policy"
            );
            for (key, value) in &action.parameters {
                report.session_restrictions.insert(key.clone(), value.clone());
            }
        }
        // Consumed during evaluation.
        ActionKind::Allow | ActionKind::Deny => {}
    }

    Ok(())
}
