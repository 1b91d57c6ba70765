//! Bounded TTL store owned by a single component.
//!
//! Stale entries are evicted lazily on read. When the store is full, the
//! oldest entry is evicted to make room.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Key-value store with a fixed time-to-live per entry.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, evicting it if stale.
    ///
    /// Staleness is re-checked under the shard's write lock, so a value
    /// written concurrently is never evicted by this read.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .remove_if(key, |_, entry| entry.inserted_at.elapsed() >= self.ttl);
        self.entries
            .get(key)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: K, value: V) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn evict(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_is_returned() {
        let cache = TtlCache::new(Duration::from_secs(30), 10);
        cache.set("a", 1);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_is_evicted_on_read() {
        let cache = TtlCache::new(Duration::from_secs(30), 10);
        cache.set("a", 1);
        tokio::time::advance(Duration::from_secs(30)).await;

        // Still stored until someone reads it
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_timestamp() {
        let cache = TtlCache::new(Duration::from_secs(10), 10);
        cache.set("a", 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("a", 2);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_oldest() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.set("a", 1);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set("b", 2);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_concurrent_reads_keep_fresh_writes() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let cache = TtlCache::new(Duration::from_millis(100), 10);
        let done = AtomicBool::new(false);
        let mut reads = Vec::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while !done.load(Ordering::Relaxed) {
                        let _ = cache.get(&"key");
                    }
                });
            }
            for round in 0..6 {
                // Let the previous value go stale while readers race to evict it
                std::thread::sleep(Duration::from_millis(110));
                cache.set("key", round);
                reads.push((round, cache.get(&"key")));
            }
            done.store(true, Ordering::Relaxed);
        });
        for (round, read) in reads {
            assert_eq!(read, Some(round));
        }
    }

    #[test]
    fn test_evict_and_clear() {
        let cache = TtlCache::new(Duration::from_secs(60), 10);
        cache.set(1u8, "x");
        cache.set(2u8, "y");
        assert_eq!(cache.evict(&1), Some("x"));
        assert_eq!(cache.evict(&1), None);
        cache.clear();
        assert!(cache.is_empty());
    }
}
