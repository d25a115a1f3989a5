//! Expiring key-value cache for discovered query metadata
//!
//! Holds metadata discovered from the target service (label names,
//! profile type keys, series descriptors) between polling ticks. Every
//! entry carries an absolute expiry; expiry is enforced lazily at read
//! time, so a cache whose producer stops refreshing it empties out on
//! its own and dependent probes stop instead of running against stale
//! discovery.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Concurrency-safe map whose entries expire a fixed TTL after their
/// last store.
///
/// `load` and `range` both treat expired entries as absent; `range`
/// additionally evicts every expired entry it encounters. There is no
/// background eviction task. Values are cloned out, callers never hold
/// references into the map.
pub struct ExpiringCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache whose entries live for `ttl` after each store.
    ///
    /// The owner picks a TTL that outlives one or more polling
    /// intervals of the producing operation.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The per-entry lifetime this cache was created with.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or overwrite, resetting the entry's expiry to now + TTL.
    pub fn store(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.write().insert(key, Entry { value, expires_at });
    }

    /// Look up a key, treating expired entries as absent.
    ///
    /// Does not evict; eviction happens during `range` passes.
    pub fn load(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Visit live entries in unspecified order, evicting expired ones.
    ///
    /// Expired entries encountered during the pass are removed before
    /// the visitor runs, so the visitor never observes one. Returning
    /// `false` from the visitor stops the iteration early.
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| !entry.is_expired(now));
        for (key, entry) in entries.iter() {
            if !visit(key, &entry.value) {
                break;
            }
        }
    }

    /// Snapshot of all live keys.
    ///
    /// Callers that need "one entry at random" index into this snapshot
    /// uniformly instead of relying on map iteration order.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::new();
        self.range(|key, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read();
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether no unexpired entry exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn load_respects_ttl_boundary() {
        let cache = ExpiringCache::new(Duration::from_secs(60));
        cache.store("job".to_string(), 1u32);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.load(&"job".to_string()), Some(1));

        // Expiry is inclusive: at exactly T+TTL the entry is gone.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.load(&"job".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn store_resets_expiry() {
        let cache = ExpiringCache::new(Duration::from_secs(30));
        cache.store("k".to_string(), 1u32);

        tokio::time::advance(Duration::from_secs(20)).await;
        cache.store("k".to_string(), 2u32);

        tokio::time::advance(Duration::from_secs(20)).await;
        // 40s after the first store but only 20s after the second.
        assert_eq!(cache.load(&"k".to_string()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn range_never_yields_expired_and_evicts() {
        let cache = ExpiringCache::new(Duration::from_secs(10));
        cache.store("old".to_string(), 1u32);

        tokio::time::advance(Duration::from_secs(5)).await;
        cache.store("fresh".to_string(), 2u32);

        tokio::time::advance(Duration::from_secs(5)).await;
        let mut seen = Vec::new();
        cache.range(|key, value| {
            seen.push((key.clone(), *value));
            true
        });
        assert_eq!(seen, vec![("fresh".to_string(), 2)]);

        // The pass evicted the expired entry outright.
        assert_eq!(cache.load(&"old".to_string()), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn range_visitor_can_stop_early() {
        let cache = ExpiringCache::new(Duration::from_secs(60));
        for i in 0..10 {
            cache.store(format!("k{i}"), i);
        }

        let mut visited = 0;
        cache.range(|_, _| {
            visited += 1;
            false
        });
        assert_eq!(visited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_snapshots_only_live_entries() {
        let cache = ExpiringCache::new(Duration::from_secs(10));
        cache.store("a".to_string(), ());
        tokio::time::advance(Duration::from_secs(10)).await;
        cache.store("b".to_string(), ());

        assert_eq!(cache.keys(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_disjoint_stores_are_all_observable() {
        let cache = Arc::new(ExpiringCache::new(Duration::from_secs(60)));

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.store(format!("key-{i}"), i);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.len(), 16);
        for i in 0..16u32 {
            assert_eq!(cache.load(&format!("key-{i}")), Some(i));
        }
    }
}
