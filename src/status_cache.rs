use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Short-lived memoization for chatty status queries. One TTL per instance,
/// fixed at construction; expired entries are evicted lazily on read.
pub struct StatusCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> StatusCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value while it is still within the TTL. A stale
    /// entry is removed on this read and treated as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Unconditionally overwrites the entry and re-stamps its age.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_at(key.into(), value, Instant::now());
    }

    /// Drops every entry. Called after any mutating backend operation, since
    /// cached status is presumed stale from that point.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if now.duration_since(entry.stored_at) <= self.ttl => {
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set_at(&self, key: String, value: V, now: Instant) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn returns_value_within_ttl_and_evicts_past_it() {
        let cache = StatusCache::new(millis(2000));
        let stored = Instant::now();
        cache.set_at("kernel".to_string(), 7u32, stored);

        assert_eq!(cache.get_at("kernel", stored + millis(1999)), Some(7));
        assert_eq!(cache.get_at("kernel", stored + millis(2001)), None);

        // The stale read above must have evicted the entry for good.
        assert_eq!(cache.get_at("kernel", stored), None);
        assert!(cache.entries.lock().is_empty());
    }

    #[test]
    fn boundary_read_at_exact_ttl_is_a_hit() {
        let cache = StatusCache::new(millis(2000));
        let stored = Instant::now();
        cache.set_at("kernel".to_string(), "up", stored);

        assert_eq!(cache.get_at("kernel", stored + millis(2000)), Some("up"));
    }

    #[test]
    fn set_overwrites_and_restamps() {
        let cache = StatusCache::new(millis(100));
        let stored = Instant::now();
        cache.set_at("kernel".to_string(), 1u32, stored);
        cache.set_at("kernel".to_string(), 2u32, stored + millis(90));

        // The first stamp would already be stale here; the overwrite is not.
        assert_eq!(cache.get_at("kernel", stored + millis(150)), Some(2));
    }

    #[test]
    fn clear_drops_all_entries() {
        let cache = StatusCache::new(millis(2000));
        cache.set("a", 1u32);
        cache.set("b", 2u32);

        cache.clear();

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn miss_on_unknown_key_is_silent() {
        let cache: StatusCache<u32> = StatusCache::new(millis(2000));
        assert_eq!(cache.get("never-set"), None);
    }
}
