//! RBAC data models: identifiers, permission maps and role keys.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Strongly-typed user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Strongly-typed organization (tenant) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrganizationId(pub String);

impl OrganizationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrganizationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission Map
// ═══════════════════════════════════════════════════════════════════════════════

/// Mapping from resource type to the set of granted actions.
///
/// A resource never maps to an empty action set, and blank actions are never
/// stored. Ordered collections keep the map deterministic for comparison,
/// serialization and cache keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionMap(BTreeMap<String, BTreeSet<String>>);

impl<'de> Deserialize<'de> for PermissionMap {
    /// Deserialized entries go through [`grant`](Self::grant), so blank
    /// actions and empty action lists never enter the map.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = BTreeMap::<String, Vec<String>>::deserialize(deserializer)?;
        Ok(Self::from_pairs(
            raw.iter()
                .map(|(resource, actions)| (resource.as_str(), actions.iter().map(String::as_str))),
        ))
    }
}

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from `(resource, actions)` pairs, dropping blank actions
    /// and resources left without any action.
    pub fn from_pairs<'a, I, A>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, A)>,
        A: IntoIterator<Item = &'a str>,
    {
        let mut map = Self::new();
        for (resource, actions) in pairs {
            for action in actions {
                map.grant(resource, action);
            }
        }
        map
    }

    /// Parse an untrusted custom-role payload (`{resource: [action, ...]}`).
    ///
    /// Non-object payloads, non-array entries, empty arrays and non-string
    /// actions are dropped. Never fails: a payload with nothing usable yields
    /// an empty map.
    pub fn from_custom_payload(payload: &serde_json::Value) -> Self {
        let mut map = Self::new();
        let Some(object) = payload.as_object() else {
            return map;
        };

        for (resource, actions) in object {
            let Some(actions) = actions.as_array() else {
                continue;
            };
            for action in actions.iter().filter_map(|a| a.as_str()) {
                map.grant(resource, action);
            }
        }
        map
    }

    /// Grant a single action. Blank resources or actions are ignored.
    pub fn grant(&mut self, resource: &str, action: &str) {
        if resource.trim().is_empty() || action.trim().is_empty() {
            return;
        }
        self.0
            .entry(resource.to_string())
            .or_default()
            .insert(action.to_string());
    }

    /// Union another map into this one.
    pub fn extend(&mut self, other: &PermissionMap) {
        for (resource, actions) in &other.0 {
            self.0
                .entry(resource.clone())
                .or_default()
                .extend(actions.iter().cloned());
        }
    }

    /// Return the union of two maps without modifying either.
    pub fn union(&self, other: &PermissionMap) -> PermissionMap {
        let mut merged = self.clone();
        merged.extend(other);
        merged
    }

    pub fn allows(&self, resource: &str, action: &str) -> bool {
        self.0
            .get(resource)
            .map_or(false, |actions| actions.contains(action))
    }

    /// True when every `(resource, action)` in `required` is granted here.
    pub fn satisfies(&self, required: &PermissionMap) -> bool {
        self.first_missing(required).is_none()
    }

    /// The first required permission this map lacks, as `resource:action`.
    pub fn first_missing(&self, required: &PermissionMap) -> Option<String> {
        required.iter().find_map(|(resource, actions)| {
            actions
                .iter()
                .find(|action| !self.allows(resource, action))
                .map(|action| format!("{}:{}", resource, action))
        })
    }

    pub fn actions(&self, resource: &str) -> Option<&BTreeSet<String>> {
        self.0.get(resource)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    pub fn resources(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Merge optional default requirements with optional per-call requirements.
///
/// Returns `None` when neither side contributes anything.
pub fn merge_permission_maps(
    base: Option<&PermissionMap>,
    overrides: Option<&PermissionMap>,
) -> Option<PermissionMap> {
    let mut merged = PermissionMap::new();
    if let Some(base) = base {
        merged.extend(base);
    }
    if let Some(overrides) = overrides {
        merged.extend(overrides);
    }
    (!merged.is_empty()).then_some(merged)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roles
// ═══════════════════════════════════════════════════════════════════════════════

/// Built-in organization role keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrgRoleKey {
    #[serde(rename = "owner")]
    Owner,
    #[serde(rename = "orgAdmin")]
    OrgAdmin,
    #[serde(rename = "hrAdmin")]
    HrAdmin,
    #[serde(rename = "compliance")]
    Compliance,
    #[serde(rename = "manager")]
    Manager,
    #[serde(rename = "member")]
    Member,
}

impl OrgRoleKey {
    pub const ALL: [OrgRoleKey; 6] = [
        Self::Owner,
        Self::OrgAdmin,
        Self::HrAdmin,
        Self::Compliance,
        Self::Manager,
        Self::Member,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::OrgAdmin => "orgAdmin",
            Self::HrAdmin => "hrAdmin",
            Self::Compliance => "compliance",
            Self::Manager => "manager",
            Self::Member => "member",
        }
    }
}

impl fmt::Display for OrgRoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgRoleKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or(())
    }
}

/// A principal's role inside one organization.
///
/// Custom roles carry their own permission map, read fresh from the
/// membership on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgRole {
    BuiltIn(OrgRoleKey),
    Custom(PermissionMap),
}

impl OrgRole {
    /// Resolve a stored role name; anything unrecognised becomes a custom
    /// role backed by the (untrusted) custom permission payload.
    pub fn from_membership(role_name: Option<&str>, custom_payload: Option<&serde_json::Value>) -> Self {
        match role_name.and_then(|name| name.parse::<OrgRoleKey>().ok()) {
            Some(key) => Self::BuiltIn(key),
            None => Self::Custom(
                custom_payload
                    .map(PermissionMap::from_custom_payload)
                    .unwrap_or_default(),
            ),
        }
    }

    pub fn key(&self) -> RoleKey {
        match self {
            Self::BuiltIn(key) => RoleKey::BuiltIn(*key),
            Self::Custom(_) => RoleKey::Custom,
        }
    }
}

/// The role key recorded on an access context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKey {
    BuiltIn(OrgRoleKey),
    Custom,
}

impl RoleKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuiltIn(key) => key.as_str(),
            Self::Custom => "custom",
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom)
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "custom" {
            return Ok(Self::Custom);
        }
        s.parse::<OrgRoleKey>().map(Self::BuiltIn)
    }
}

impl Serialize for RoleKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoleKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("unknown role key \"{}\"", value)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
