//! Condition comparators.
//!
//! A condition that cannot be evaluated (wrong value type, an operator that
//! makes no sense for the kind, an invalid regex) is `false`, never an error.

use chrono::{DateTime, Datelike, FixedOffset, Local, Timelike, Weekday};
use regex::Regex;
use serde_json::Value;

use super::types::{ConditionKind, ConditionOperator, SecurityCondition, SecurityContext, SecurityPolicy};

/// Business hours window, local time, `[start, end)`.
const BUSINESS_HOURS: std::ops::Range<u32> = 9..17;

/// Source of wall-clock time for `time_based` conditions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Local system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// A clock stopped at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

/// AND over every condition; a policy without conditions always matches.
pub fn policy_matches(policy: &SecurityPolicy, context: &SecurityContext, clock: &dyn Clock) -> bool {
    policy
        .conditions
        .iter()
        .all(|condition| condition_matches(condition, context, clock))
}

pub fn condition_matches(condition: &SecurityCondition, context: &SecurityContext, clock: &dyn Clock) -> bool {
    match condition.kind {
        ConditionKind::DataClassification => compare_enum(
            condition,
            context.access.data_classification().as_str(),
        ),
        ConditionKind::DataResidency => compare_enum(condition, context.access.data_residency().as_str()),
        ConditionKind::UserRole => user_role(condition, context),
        ConditionKind::IpAddress => ip_address(condition, context.ip_address.as_deref().unwrap_or("")),
        ConditionKind::MfaStatus => mfa_status(condition, context.mfa_verified),
        ConditionKind::TimeBased => time_window(&condition.value, clock.now()),
        ConditionKind::DeviceCompliance => false,
    }
}

fn compare_enum(condition: &SecurityCondition, current: &str) -> bool {
    let Some(expected) = condition.value.as_str() else {
        return false;
    };
    match condition.operator {
        ConditionOperator::Equals => current == expected,
        ConditionOperator::NotEquals => current != expected,
        _ => false,
    }
}

fn user_role(condition: &SecurityCondition, context: &SecurityContext) -> bool {
    let Some(expected) = condition.value.as_str() else {
        return false;
    };
    let current = context.access.role_key();
    match condition.operator {
        ConditionOperator::Equals => current.as_str() == expected,
        ConditionOperator::NotEquals => current.as_str() != expected,
        ConditionOperator::Contains => context.roles.iter().any(|role| role == expected),
        _ => false,
    }
}

fn ip_address(condition: &SecurityCondition, current: &str) -> bool {
    let Some(expected) = condition.value.as_str() else {
        return false;
    };
    match condition.operator {
        ConditionOperator::Equals => current == expected,
        ConditionOperator::NotEquals => current != expected,
        ConditionOperator::Contains => !current.is_empty() && current.contains(expected),
        ConditionOperator::MatchesRegex => {
            !current.is_empty() && Regex::new(expected).is_ok_and(|re| re.is_match(current))
        }
        _ => false,
    }
}

fn mfa_status(condition: &SecurityCondition, verified: bool) -> bool {
    let Some(expected) = condition.value.as_bool() else {
        return false;
    };
    match condition.operator {
        ConditionOperator::Equals => verified == expected,
        ConditionOperator::NotEquals => verified != expected,
        _ => false,
    }
}

/// Unknown windows match.
fn time_window(value: &Value, now: DateTime<FixedOffset>) -> bool {
    match value.as_str() {
        Some("weekdays") => !matches!(now.weekday(), Weekday::Sat | Weekday::Sun),
        Some("weekends") => matches!(now.weekday(), Weekday::Sat | Weekday::Sun),
        Some("business_hours") => BUSINESS_HOURS.contains(&now.hour()),
        _ => true,
    }
}
