//! In-memory bound-provider cache
//!
//! Keyed by the profile and provider cache keys. Entries expire on a TTL;
//! expired entries are evicted on lookup and the caller rebinds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Entry<T> {
    value: Arc<T>,
    expires_at: Instant,
}

/// TTL cache for bound providers.
pub struct BoundProviderCache<T> {
    entries: DashMap<String, Entry<T>>,
    ttl: Duration,
}

impl<T> BoundProviderCache<T> {
    /// Create a cache with the given TTL (default 3600 s from config).
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Look up a live entry; expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Some(Arc::clone(&entry.value));
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    /// Store a value, stamping its expiry from the cache TTL.
    pub fn insert(&self, key: &str, value: Arc<T>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every entry (used on client shutdown).
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of live and expired entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_returns_the_same_instance() {
        let cache = BoundProviderCache::new(Duration::from_secs(60));
        let value = Arc::new("bound".to_string());
        cache.insert("profile+provider", Arc::clone(&value));

        let hit = cache.get("profile+provider").unwrap();

        assert!(Arc::ptr_eq(&hit, &value));
    }

    #[test]
    fn expired_entries_are_evicted_on_lookup() {
        let cache = BoundProviderCache::new(Duration::ZERO);
        cache.insert("key", Arc::new(1));

        assert!(cache.get("key").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn unknown_keys_miss() {
        let cache: BoundProviderCache<String> = BoundProviderCache::new(Duration::from_secs(1));
        assert!(cache.get("missing").is_none());
    }
}
