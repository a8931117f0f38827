//! TTL cache for module context data.
//!
//! Module context can involve several CLI probes; the detail view refetches
//! it on every tab switch. Entries stay fresh for the configured TTL -- a
//! viewer may see data up to that old, which is the accepted
//! staleness/performance trade-off. A TTL of zero disables caching.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

pub struct ContextCache {
    ttl: Duration,
    entries: DashMap<String, (Instant, Value)>,
}

impl ContextCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Fresh cached value for `key`, if any. Stale entries are dropped on
    /// the way out.
    pub fn get(&self, key: &str) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.value().0.elapsed() < self.ttl {
            return Some(entry.value().1.clone());
        }
        drop(entry);
        self.entries.remove(key);
        None
    }

    pub fn insert(&self, key: String, value: Value) {
        self.entries.insert(key, (Instant::now(), value));
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entries_are_returned() {
        let cache = ContextCache::new(Duration::from_secs(30));
        cache.insert("docker:anonymous".to_string(), serde_json::json!({"n": 1}));
        assert_eq!(
            cache.get("docker:anonymous"),
            Some(serde_json::json!({"n": 1}))
        );
        assert!(cache.get("other-key").is_none());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = ContextCache::new(Duration::from_millis(10));
        cache.insert("k".to_string(), serde_json::json!(1));
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = ContextCache::new(Duration::ZERO);
        cache.insert("k".to_string(), serde_json::json!(1));
        assert!(cache.get("k").is_none());
    }
}
