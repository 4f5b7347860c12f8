//! Generic memoizing cache.
//!
//! Entries are built on first request and never evicted. The cache knows
//! nothing about the device; callers pass the builder closure.

use std::collections::HashMap;
use std::hash::Hash;

/// Hit/miss counters of a [`MemoCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// A build-once map from keys to values.
#[derive(Debug)]
pub struct MemoCache<K, V> {
    entries: HashMap<K, V>,
    stats: CacheStats,
}

impl<K, V> Default for MemoCache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }
}

impl<K: Eq + Hash + Copy, V> MemoCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, building it with `build` on a miss.
    ///
    /// A failed build leaves the cache unchanged.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: K,
        build: impl FnOnce(K) -> Result<V, E>,
    ) -> Result<&V, E> {
        if self.entries.contains_key(&key) {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            let value = build(key)?;
            self.entries.insert(key, value);
        }
        // The entry exists on both paths above.
        Ok(&self.entries[&key])
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    /// Remove and return every entry.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.entries.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_once_per_key() {
        let mut cache: MemoCache<u32, String> = MemoCache::new();
        let mut builds = 0;

        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with::<()>(7, |k| {
                    builds += 1;
                    Ok(format!("value-{k}"))
                })
                .unwrap();
            assert_eq!(value, "value-7");
        }

        assert_eq!(builds, 1);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 1 });
    }

    #[test]
    fn test_distinct_keys_build_distinct_values() {
        let mut cache: MemoCache<u32, u32> = MemoCache::new();
        let a = *cache.get_or_try_insert_with::<()>(1, |k| Ok(k * 10)).unwrap();
        let b = *cache.get_or_try_insert_with::<()>(2, |k| Ok(k * 10)).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let mut cache: MemoCache<u32, u32> = MemoCache::new();
        assert!(cache.get_or_try_insert_with(1, |_| Err("boom")).is_err());
        assert!(cache.is_empty());
        assert_eq!(*cache.get_or_try_insert_with::<()>(1, |_| Ok(5)).unwrap(), 5);
    }
}
