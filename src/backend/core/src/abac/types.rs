//! ABAC policy and attribute types.
//!
//! Policies arrive as untrusted JSON from tenant configuration and are
//! deserialized into these types by the normalizer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix for resource-side values that reference a subject attribute.
pub const SUBJECT_REFERENCE_PREFIX: &str = "$subject.";

/// Attribute map for either the subject or the resource of a request.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

// ═══════════════════════════════════════════════════════════════════════════════
// Attribute Values
// ═══════════════════════════════════════════════════════════════════════════════

/// A literal attribute value: string, number, boolean, null, or a list of
/// those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    /// True when this value is a scalar or a list of scalars.
    pub fn is_literal(&self) -> bool {
        match self {
            Self::List(items) => items.iter().all(|item| !matches!(item, Self::List(_))),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Reference target when this value is a `"$subject.<attr>"` string.
    pub fn subject_reference(&self) -> Option<&str> {
        self.as_str()
            .and_then(|s| s.strip_prefix(SUBJECT_REFERENCE_PREFIX))
            .filter(|attr| !attr.is_empty())
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl TryFrom<&serde_json::Value> for AttributeValue {
    type Error = ();

    /// Convert a JSON value, rejecting objects and nested lists.
    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        let converted: AttributeValue = serde_json::from_value(value.clone()).map_err(|_| ())?;
        if converted.is_literal() {
            Ok(converted)
        } else {
            Err(())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conditions
// ═══════════════════════════════════════════════════════════════════════════════

/// Comparison operator of an attribute predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateOp {
    Eq,
    Ne,
    In,
    Gt,
    Lt,
}

/// `{op, value}` predicate over a single attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributePredicate {
    pub op: PredicateOp,
    pub value: AttributeValue,
}

/// Expected value for one attribute in a condition block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Predicate(AttributePredicate),
    Literal(AttributeValue),
}

impl ConditionValue {
    pub fn predicate(op: PredicateOp, value: impl Into<AttributeValue>) -> Self {
        Self::Predicate(AttributePredicate {
            op,
            value: value.into(),
        })
    }

    fn is_well_formed(&self) -> bool {
        match self {
            Self::Predicate(predicate) => predicate.value.is_literal(),
            Self::Literal(value) => value.is_literal(),
        }
    }
}

impl From<AttributeValue> for ConditionValue {
    fn from(value: AttributeValue) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        Self::Literal(value.into())
    }
}

impl From<bool> for ConditionValue {
    fn from(value: bool) -> Self {
        Self::Literal(value.into())
    }
}

impl From<f64> for ConditionValue {
    fn from(value: f64) -> Self {
        Self::Literal(value.into())
    }
}

impl From<Vec<&str>> for ConditionValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Literal(values.into())
    }
}

/// Mapping from attribute name to expected value.
pub type AttributeBlock = BTreeMap<String, ConditionValue>;

/// Subject and resource halves of a policy condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<AttributeBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<AttributeBlock>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Effect of a matching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

/// A tenant ABAC policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbacPolicy {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub effect: PolicyEffect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<PolicyCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl AbacPolicy {
    pub fn new(
        id: impl Into<String>,
        effect: PolicyEffect,
        actions: impl IntoIterator<Item = impl Into<String>>,
        resources: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            description: None,
            effect,
            actions: actions.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
            condition: None,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_subject_condition(mut self, key: impl Into<String>, value: impl Into<ConditionValue>) -> Self {
        self.condition
            .get_or_insert_with(PolicyCondition::default)
            .subject
            .get_or_insert_with(AttributeBlock::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_resource_condition(mut self, key: impl Into<String>, value: impl Into<ConditionValue>) -> Self {
        self.condition
            .get_or_insert_with(PolicyCondition::default)
            .resource
            .get_or_insert_with(AttributeBlock::new)
            .insert(key.into(), value.into());
        self
    }

    /// Effective priority (missing priority counts as 0).
    pub fn effective_priority(&self) -> i64 {
        self.priority.unwrap_or(0)
    }

    /// Check the shape invariants that deserialization alone cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must be a non-empty string".to_string());
        }
        if self.actions.is_empty() || self.actions.iter().any(|a| a.trim().is_empty()) {
            return Err("actions must be a non-empty list of non-empty strings".to_string());
        }
        if self.resources.is_empty() || self.resources.iter().any(|r| r.trim().is_empty()) {
            return Err("resources must be a non-empty list of non-empty strings".to_string());
        }
        if let Some(condition) = &self.condition {
            let blocks = condition.subject.iter().chain(condition.resource.iter());
            for block in blocks {
                if block.iter().any(|(key, value)| key.trim().is_empty() || !value.is_well_formed()) {
                    return Err("condition values must be literals or {op, value} predicates".to_string());
                }
            }
        }
        Ok(())
    }

    pub fn covers_action(&self, action: &str) -> bool {
        self.actions.iter().any(|selector| selector_matches(selector, action))
    }

    pub fn covers_resource(&self, resource_type: &str) -> bool {
        self.resources.iter().any(|selector| selector_matches(selector, resource_type))
    }
}

/// Match a selector: exact value, `"*"`, or a `prefix*` wildcard.
pub fn selector_matches(selector: &str, candidate: &str) -> bool {
    if selector == "*" || selector == candidate {
        return true;
    }
    match selector.strip_suffix('*') {
        Some(prefix) if !prefix.is_empty() => candidate.starts_with(prefix),
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
