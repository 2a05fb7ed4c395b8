//! Evaluation result cache.
//!
//! An expired entry is removed by the lookup that finds it or by
//! [`PolicyCache::cleanup_expired`]. The cache holds at most `max_entries`
//! results: an insert into a full cache first sweeps expired entries, then
//! evicts the oldest tenth. The key strategy is pluggable so deployments
//! whose policies depend on the IP address or role list can widen the key.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::types::{PolicyEvaluationResult, SecurityContext};
use crate::telemetry::AuthzMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Keys
// ═══════════════════════════════════════════════════════════════════════════════

/// The resource an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationTarget<'a> {
    pub operation: &'a str,
    pub resource_type: &'a str,
    pub resource_id: &'a str,
}

/// Derives a cache key from a request.
pub trait CacheKeyStrategy: Send + Sync {
    fn cache_key(&self, context: &SecurityContext, target: &OperationTarget<'_>) -> String;

    /// Whether the key already carries the client IP and role list.
    fn includes_session(&self) -> bool {
        false
    }
}

/// `:ip:roles` with roles sorted, so role order never splits the cache.
pub fn session_suffix(context: &SecurityContext) -> String {
    let mut roles = context.roles.clone();
    roles.sort();
    format!(":{}:{}", context.ip_address.as_deref().unwrap_or(""), roles.join(","))
}

/// `org:user:operation:resourceType:resourceId:classification:residency:mfa`.
///
/// IP address and role list are not part of the key. The engine appends
/// [`session_suffix`] while an enabled policy has an IP or role condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCacheKey;

impl CacheKeyStrategy for DefaultCacheKey {
    fn cache_key(&self, context: &SecurityContext, target: &OperationTarget<'_>) -> String {
        let access = &context.access;
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}",
            access.org_id(),
            access.user_id(),
            target.operation,
            target.resource_type,
            target.resource_id,
            access.data_classification(),
            access.data_residency(),
            context.mfa_verified,
        )
    }
}

/// Default key extended with the client IP and sorted role tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionAwareCacheKey;

impl CacheKeyStrategy for SessionAwareCacheKey {
    fn cache_key(&self, context: &SecurityContext, target: &OperationTarget<'_>) -> String {
        let mut key = DefaultCacheKey.cache_key(context, target);
        key.push_str(&session_suffix(context));
        key
    }

    fn includes_session(&self) -> bool {
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Statistics
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries currently stored, expired ones included until swept.
    pub entries: u64,
    /// Entries dropped to stay under capacity.
    pub evictions: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Cache
// ═══════════════════════════════════════════════════════════════════════════════

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Bounded TTL cache of shared evaluation results.
pub struct PolicyCache {
    entries: DashMap<String, (Arc<PolicyEvaluationResult>, Instant)>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PolicyCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_MAX_ENTRIES)
    }

    /// A zero capacity is treated as one.
    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn get(&self, key: &str) -> Option<Arc<PolicyEvaluationResult>> {
        let fresh = match self.entries.get(key) {
            Some(entry) => {
                let (result, stored_at) = entry.value();
                (stored_at.elapsed() < self.ttl).then(|| Arc::clone(result))
            }
            None => None,
        };

        match fresh {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                AuthzMetrics::record_cache_lookup(true);
                debug!(key = %key, "Policy cache hit");
                Some(result)
            }
            None => {
                // Entry guard is dropped above; removal cannot deadlock.
                self.entries
                    .remove_if(key, |_, (_, stored_at)| stored_at.elapsed() >= self.ttl);
                self.misses.fetch_add(1, Ordering::Relaxed);
                AuthzMetrics::record_cache_lookup(false);
                None
            }
        }
    }

    pub fn insert(&self, key: String, result: Arc<PolicyEvaluationResult>) {
        if !self.entries.contains_key(&key) {
            self.maybe_evict();
        }
        self.entries.insert(key, (result, Instant::now()));
    }

    /// Make room for one entry: sweep expired entries, then drop the
    /// oldest tenth if the cache is still full.
    fn maybe_evict(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        if self.cleanup_expired() > 0 && self.entries.len() < self.max_entries {
            return;
        }

        let to_evict = (self.max_entries / 10).max(1);
        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().1))
            .collect();
        by_age.sort_by_key(|(_, stored_at)| *stored_at);

        let evicted = by_age
            .into_iter()
            .take(to_evict)
            .filter(|(key, _)| self.entries.remove(key).is_some())
            .count();
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        debug!(evicted, max_entries = self.max_entries, "Evicted policy cache entries");
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> u64 {
        let mut expired = 0;
        self.entries.retain(|_, (_, stored_at)| {
            let keep = stored_at.elapsed() < self.ttl;
            if !keep {
                expired += 1;
            }
            keep
        });
        if expired > 0 {
            debug!(expired, "Cleaned up expired policy cache entries");
        }
        expired
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: 0.0,
        };
        stats.calculate_hit_rate();
        stats
    }
}

impl std::fmt::Debug for PolicyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{DataClassificationLevel, DataResidencyZone};
    use crate::rbac::{OrgRoleKey, RoleKey};

    fn result() -> Arc<PolicyEvaluationResult> {
        Arc::new(PolicyEvaluationResult {
            allowed: true,
            actions: Vec::new(),
            matched_policies: Vec::new(),
            decision_log: vec!["No deny policy matched".to_string()],
        })
    }

    fn context() -> SecurityContext {
        SecurityContext::new(crate::security::test_support::access_context(
            RoleKey::BuiltIn(OrgRoleKey::Member),
            DataResidencyZone::UkOnly,
            DataClassificationLevel::Official,
        ))
    }

    #[test]
    fn test_hit_returns_same_arc() {
        let cache = PolicyCache::new(Duration::from_secs(60));
        let stored = result();
        cache.insert("k".to_string(), Arc::clone(&stored));

        let fetched = cache.get("k").unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));
        assert!(cache.get("other").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expired_entries_are_evicted_on_lookup() {
        let cache = PolicyCache::new(Duration::from_millis(10));
        cache.insert("k".to_string(), result());
        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = PolicyCache::new(Duration::from_millis(5));
        for i in 0..1_000 {
            cache.insert(format!("key-{i}"), result());
        }
        assert_eq!(cache.len(), 1_000);
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.cleanup_expired(), 1_000);
        assert!(cache.is_empty());
        assert_eq!(cache.cleanup_expired(), 0);
    }

    #[test]
    fn test_eviction_keeps_cache_bounded() {
        let cache = PolicyCache::with_capacity(Duration::from_secs(60), 10);
        for i in 0..11 {
            cache.insert(format!("key-{i}"), result());
        }

        let stats = cache.stats();
        assert!(stats.entries <= 10);
        assert!(stats.evictions >= 1);
        assert!(cache.get("key-10").is_some());

        for i in 0..1_000 {
            cache.insert(format!("more-{i}"), result());
        }
        assert!(cache.len() <= 10);
    }

    #[test]
    fn test_full_cache_prefers_expired_entries() {
        let cache = PolicyCache::with_capacity(Duration::from_millis(10), 4);
        for i in 0..4 {
            cache.insert(format!("old-{i}"), result());
        }
        std::thread::sleep(Duration::from_millis(20));

        cache.insert("fresh".to_string(), result());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_overwriting_a_key_does_not_evict() {
        let cache = PolicyCache::with_capacity(Duration::from_secs(60), 2);
        cache.insert("a".to_string(), result());
        cache.insert("b".to_string(), result());
        cache.insert("b".to_string(), result());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_clear() {
        let cache = PolicyCache::new(Duration::from_secs(60));
        cache.insert("a".to_string(), result());
        cache.insert("b".to_string(), result());
        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_default_key_ignores_ip_and_roles() {
        let target = OperationTarget {
            operation: "read",
            resource_type: "employee",
            resource_id: "e-1",
        };
        let plain = context();
        let with_ip = context().with_ip_address("10.0.0.1").with_roles(vec!["x".to_string()]);

        let key = DefaultCacheKey.cache_key(&plain, &target);
        assert_eq!(key, DefaultCacheKey.cache_key(&with_ip, &target));
        assert!(key.ends_with(":read:employee:e-1:OFFICIAL:UK_ONLY:false"));

        assert_ne!(
            SessionAwareCacheKey.cache_key(&plain, &target),
            SessionAwareCacheKey.cache_key(&with_ip, &target)
        );
        assert!(SessionAwareCacheKey.includes_session());
        assert!(!DefaultCacheKey.includes_session());
    }

    #[test]
    fn test_session_suffix_sorts_roles() {
        let a = context()
            .with_ip_address("10.0.0.1")
            .with_roles(vec!["manager".to_string(), "admin".to_string()]);
        let b = context()
            .with_ip_address("10.0.0.1")
            .with_roles(vec!["admin".to_string(), "manager".to_string()]);
        assert_eq!(session_suffix(&a), ":10.0.0.1:admin,manager");
        assert_eq!(session_suffix(&a), session_suffix(&b));
        assert_eq!(session_suffix(&context()), "::");
    }

    #[test]
    fn test_mfa_changes_key() {
        let target = OperationTarget {
            operation: "read",
            resource_type: "employee",
            resource_id: "e-1",
        };
        assert_ne!(
            DefaultCacheKey.cache_key(&context(), &target),
            DefaultCacheKey.cache_key(&context().with_mfa_verified(true), &target)
        );
    }
}
