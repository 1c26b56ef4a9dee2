use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Resident tile count when the caller does not configure one.
pub const DEFAULT_CACHE_CAPACITY: usize = 30;

struct Entry<V> {
    value: Arc<V>,
    last_used: AtomicU64,
}

/// Hit/miss/eviction counters since the cache was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded least-recently-used cache for computed tiles.
///
/// Lookups share a read lock and record recency through an atomic stamp,
/// so concurrent hits never wait on each other. Insertion and eviction
/// take the write lock.
pub struct TileCache<K, V> {
    capacity: usize,
    entries: RwLock<HashMap<K, Entry<V>>>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K: Eq + Hash + Clone, V> Default for TileCache<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl<K: Eq + Hash + Clone, V> TileCache<K, V> {
    /// A cache holding at most `capacity` values. Zero disables storage.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Cached value for `key`, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) => {
                entry.last_used.store(self.tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Whether `key` is resident. Does not count as a use.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Store `value` under `key`, evicting the least recently used entries
    /// to stay within capacity.
    ///
    /// If another thread stored the key first, its value is kept and
    /// returned.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        if self.capacity == 0 {
            return value;
        }
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            existing.last_used.store(self.tick(), Ordering::Relaxed);
            return Arc::clone(&existing.value);
        }
        while entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            let Some(oldest) = oldest else { break };
            entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        entries.insert(
            key,
            Entry {
                value: Arc::clone(&value),
                last_used: AtomicU64::new(self.tick()),
            },
        );
        value
    }

    /// Cached value for `key`, or compute it with `f` and cache the result.
    ///
    /// No lock is held while `f` runs; two threads missing the same key
    /// may both compute it, and the first stored value wins. Errors are
    /// returned without touching the cache.
    pub fn get_or_insert_with<E>(&self, key: K, f: impl FnOnce() -> Result<V, E>) -> Result<Arc<V>, E> {
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }
        let value = f()?;
        Ok(self.insert(key, value))
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        debug!("clearing {} cached tiles", entries.len());
        entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = TileCache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        assert!(cache.get(&1).is_some());
        cache.insert(3, "c");
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_or_insert_computes_once() {
        let cache = TileCache::new(4);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = cache
                .get_or_insert_with(7, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(49)
                })
                .unwrap();
            assert_eq!(*v, 49);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 2);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache: TileCache<u32, u32> = TileCache::new(4);
        assert!(cache.get_or_insert_with(1, || Err("boom")).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = TileCache::new(0);
        assert_eq!(*cache.insert(1, 5), 5);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access_respects_capacity() {
        let cache = TileCache::new(DEFAULT_CACHE_CAPACITY);
        (0..500u32).into_par_iter().for_each(|i| {
            let key = i % 60;
            let v = cache.get_or_insert_with(key, || Ok::<_, ()>(key * 2)).unwrap();
            assert_eq!(*v, key * 2);
        });
        assert!(cache.len() <= DEFAULT_CACHE_CAPACITY);
    }
}
