//! [`Cache`]: the composite engine that layers a [`MemoryStore`] over an
//! optional [`DiskStore`], with lookup promotion, the expiry predicate, and
//! lifecycle management.

use crate::config::CacheConfig;
use crate::disk::DiskStore;
use crate::element::Element;
use crate::error::{CacheError, Result};
use crate::expiry;
use crate::memory_store::{EvictionHook, MemoryStore};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::hash::Hash;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// `UNINITIALISED -> ALIVE -> DISPOSED`. All user-facing operations other
/// than `initialise` and `dispose` fail with [`CacheError::NotAlive`]
/// outside `Alive`; the transition out of `Alive` is one-way.
enum Lifecycle<K, V> {
    Uninitialised,
    Alive(Inner<K, V>),
    Disposed,
}

struct Inner<K, V> {
    memory: MemoryStore<K, V>,
    disk: Option<Arc<DiskStore<K, V>>>,
}

/// Monotonic, in-memory-only cache statistics.
#[derive(Debug, Default)]
struct Counters {
    hit_count: AtomicU64,
    memory_store_hit_count: AtomicU64,
    disk_store_hit_count: AtomicU64,
    miss_count_not_found: AtomicU64,
    miss_count_expired: AtomicU64,
}

impl Counters {
    fn record_hit_memory(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        self.memory_store_hit_count.fetch_add(1, Ordering::Relaxed);
    }
    fn record_hit_disk(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        self.disk_store_hit_count.fetch_add(1, Ordering::Relaxed);
    }
    fn record_miss_not_found(&self) {
        self.miss_count_not_found.fetch_add(1, Ordering::Relaxed);
    }
    fn record_miss_expired(&self) {
        self.miss_count_expired.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of a cache's statistics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hit_count: u64,
    pub memory_store_hit_count: u64,
    pub disk_store_hit_count: u64,
    pub miss_count_not_found: u64,
    pub miss_count_expired: u64,
}

/// The composite two-tier cache: a bounded [`MemoryStore`] that
/// cooperatively spools evictions to an optional persistent [`DiskStore`].
///
/// A `Cache` exclusively owns its memory store and disk store; it holds
/// neither store's internal lock for longer than a single tier operation,
/// delegating all synchronization to them.
pub struct Cache<K, V> {
    config: CacheConfig,
    lifecycle: RwLock<Lifecycle<K, V>>,
    stats: Counters,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Construct a cache in the `Uninitialised` state. No memory or disk
    /// store exists yet — call [`Self::initialise`] (or use [`Self::new`])
    /// before any other operation.
    pub fn uninitialised(config: CacheConfig) -> Self {
        Self {
            config,
            lifecycle: RwLock::new(Lifecycle::Uninitialised),
            stats: Counters::default(),
        }
    }

    /// Construct and immediately initialise a cache rooted at `disk_root`
    /// (only consulted if `config.overflow_to_disk`).
    pub fn new(config: CacheConfig, disk_root: &Path) -> Result<Self> {
        let cache = Self::uninitialised(config);
        cache.initialise(disk_root)?;
        Ok(cache)
    }

    /// Build the memory store and (if `overflow_to_disk`) the disk store,
    /// transitioning `Uninitialised -> Alive`. Idempotent if already
    /// `Alive`; fails with [`CacheError::NotAlive`] if already `Disposed`
    /// (the transition out of `Alive` is one-way).
    pub fn initialise(&self, disk_root: &Path) -> Result<()> {
        let mut guard = self.lifecycle.write();
        match &*guard {
            Lifecycle::Alive(_) => return Ok(()),
            Lifecycle::Disposed => {
                return Err(CacheError::NotAlive {
                    name: self.config.name.clone(),
                })
            }
            Lifecycle::Uninitialised => {}
        }

        let disk = if self.config.overflow_to_disk {
            Some(DiskStore::open(
                disk_root,
                &self.config.name,
                self.config.disk_persistent,
                self.config.eternal,
                self.config.time_to_live_seconds,
                self.config.time_to_idle_seconds,
                self.config.disk_expiry_interval_seconds(),
            )?)
        } else {
            None
        };

        let (eternal, ttl, tti) = (
            self.config.eternal,
            self.config.time_to_live_seconds,
            self.config.time_to_idle_seconds,
        );
        let disk_for_hook = disk.clone();
        let hook: EvictionHook<K, V> = Box::new(move |element| {
            if expiry::is_expired(&element, eternal, ttl, tti) {
                return;
            }
            if let Some(disk) = &disk_for_hook {
                disk.put(element);
            }
            // else: overflow disabled, the candidate is simply dropped.
        });
        let memory = MemoryStore::new(self.config.max_elements_in_memory, hook);

        *guard = Lifecycle::Alive(Inner { memory, disk });
        Ok(())
    }

    /// Cache name, as configured.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn with_alive<R>(&self, f: impl FnOnce(&Inner<K, V>) -> R) -> Result<R> {
        let guard = self.lifecycle.read();
        match &*guard {
            Lifecycle::Alive(inner) => Ok(f(inner)),
            _ => Err(CacheError::NotAlive {
                name: self.config.name.clone(),
            }),
        }
    }

    /// As [`Self::with_alive`] but for an operation that can itself fail
    /// (disk I/O); flattens the `NotAlive` check and the closure's own
    /// `Result` into one.
    fn with_alive_try<R>(&self, f: impl FnOnce(&Inner<K, V>) -> Result<R>) -> Result<R> {
        let guard = self.lifecycle.read();
        match &*guard {
            Lifecycle::Alive(inner) => f(inner),
            _ => Err(CacheError::NotAlive {
                name: self.config.name.clone(),
            }),
        }
    }

    /// The expiry predicate, evaluated against this cache's own
    /// `eternal`/TTL/TTI settings.
    pub fn is_expired(&self, element: &Element<K, V>) -> bool {
        expiry::is_expired(
            element,
            self.config.eternal,
            self.config.time_to_live_seconds,
            self.config.time_to_idle_seconds,
        )
    }

    /// Insert `element`, resetting its access statistics as a fresh insert.
    /// Stores into the memory tier only; an overflow spools to disk lazily
    /// through the memory store's eviction hook.
    pub fn put(&self, mut element: Element<K, V>) -> Result<()> {
        element.reset_statistics();
        self.with_alive(|inner| inner.memory.put(element))
    }

    /// As [`Self::put`] but does not reset access statistics.
    pub fn put_quiet(&self, element: Element<K, V>) -> Result<()> {
        self.with_alive(|inner| inner.memory.put(element))
    }

    /// Look up `key`: memory first, then disk (if overflow is enabled) on a
    /// memory miss. A disk hit is promoted back into memory to refresh
    /// cross-tier recency. An expired hit on either tier is removed from
    /// both tiers synchronously and reported as a miss.
    pub fn get(&self, key: &K) -> Result<Option<Element<K, V>>> {
        self.get_impl(key, true)
    }

    /// As [`Self::get`] but does not update element access statistics
    /// (cache-level hit/miss counters still update).
    pub fn get_quiet(&self, key: &K) -> Result<Option<Element<K, V>>> {
        self.get_impl(key, false)
    }

    fn get_impl(&self, key: &K, record_access: bool) -> Result<Option<Element<K, V>>> {
        self.with_alive_try(|inner| {
            let mem_hit = if record_access {
                inner.memory.get(key)
            } else {
                inner.memory.get_quiet(key)
            };
            if let Some(element) = mem_hit {
                if self.is_expired(&element) {
                    inner.memory.remove(key);
                    if let Some(disk) = &inner.disk {
                        disk.remove(key);
                    }
                    self.stats.record_miss_expired();
                    return Ok(None);
                }
                self.stats.record_hit_memory();
                return Ok(Some(element));
            }

            if let Some(disk) = &inner.disk {
                // A disk I/O fault is a real failure, distinct from "not
                // present" — surface it rather than silently reporting a miss.
                let disk_hit = if record_access {
                    disk.get(key)?
                } else {
                    disk.get_quiet(key)?
                };
                if let Some(element) = disk_hit {
                    if self.is_expired(&element) {
                        disk.remove(key);
                        inner.memory.remove(key);
                        self.stats.record_miss_expired();
                        return Ok(None);
                    }
                    inner.memory.put(element.clone());
                    self.stats.record_hit_disk();
                    return Ok(Some(element));
                }
            }

            self.stats.record_miss_not_found();
            Ok(None)
        })
    }

    /// Remove `key` from whichever tier(s) hold it.
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.with_alive(|inner| {
            let removed_from_memory = inner.memory.remove(key);
            let removed_from_disk = inner
                .disk
                .as_ref()
                .map(|d| d.remove(key))
                .unwrap_or(false);
            removed_from_memory || removed_from_disk
        })
    }

    /// Clear both tiers.
    pub fn remove_all(&self) -> Result<()> {
        self.with_alive(|inner| {
            inner.memory.clear();
            if let Some(disk) = &inner.disk {
                disk.clear();
            }
        })
    }

    /// Union of memory and disk keys, deduplicated. O(n) in resident key
    /// count.
    pub fn get_keys(&self) -> Result<Vec<K>> {
        self.with_alive(|inner| {
            let mut set: HashSet<K> = inner.memory.keys().into_iter().collect();
            if let Some(disk) = &inner.disk {
                set.extend(disk.keys());
            }
            set.into_iter().collect()
        })
    }

    /// Concatenation of memory and disk keys; cheaper than [`Self::get_keys`]
    /// but may contain the same key twice (transiently, between a promotion
    /// and the disk copy's eventual reclaim).
    pub fn get_keys_no_duplicate_check(&self) -> Result<Vec<K>> {
        self.with_alive(|inner| {
            let mut keys = inner.memory.keys();
            if let Some(disk) = &inner.disk {
                keys.extend(disk.keys());
            }
            keys
        })
    }

    /// [`Self::get_keys`] filtered by a quiet per-key expiry probe (no
    /// statistic updates, unlike [`Self::get`]).
    pub fn get_keys_with_expiry_check(&self) -> Result<Vec<K>> {
        self.with_alive(|inner| {
            let mut set = HashSet::new();
            for key in inner.memory.keys() {
                if let Some(element) = inner.memory.get_quiet(&key) {
                    if !self.is_expired(&element) {
                        set.insert(key);
                    }
                }
            }
            if let Some(disk) = &inner.disk {
                for key in disk.keys() {
                    // A per-key I/O fault during this bulk probe is logged and
                    // the key is treated as absent for this snapshot, rather
                    // than aborting the whole listing over one bad block.
                    match disk.get_quiet(&key) {
                        Ok(Some(element)) => {
                            if !self.is_expired(&element) {
                                set.insert(key);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(cache = %self.config.name, error = %e, "disk read failed during expiry-checked key listing");
                        }
                    }
                }
            }
            set.into_iter().collect()
        })
    }

    /// `get_keys().len()` — may include elements that are resident but
    /// expired and not yet reclaimed.
    pub fn size(&self) -> Result<usize> {
        Ok(self.get_keys()?.len())
    }

    /// A snapshot of this cache's monotonic statistics counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.stats.hit_count.load(Ordering::Relaxed),
            memory_store_hit_count: self.stats.memory_store_hit_count.load(Ordering::Relaxed),
            disk_store_hit_count: self.stats.disk_store_hit_count.load(Ordering::Relaxed),
            miss_count_not_found: self.stats.miss_count_not_found.load(Ordering::Relaxed),
            miss_count_expired: self.stats.miss_count_expired.load(Ordering::Relaxed),
        }
    }

    /// One-way transition to `Disposed`. If the disk tier is persistent,
    /// every resident memory element is spooled to disk first;
    /// the disk store is then disposed (flush + index write, or deletion if
    /// non-persistent). Idempotent and best-effort: a second call is a
    /// no-op, and disposal of an `Uninitialised` cache succeeds trivially.
    pub fn dispose(&self) -> Result<()> {
        let mut guard = self.lifecycle.write();
        let previous = std::mem::replace(&mut *guard, Lifecycle::Disposed);
        match previous {
            Lifecycle::Alive(inner) => {
                if let Some(disk) = &inner.disk {
                    if self.config.disk_persistent {
                        inner.memory.drain_into(|element| disk.put(element));
                    } else {
                        inner.memory.clear();
                    }
                    disk.dispose();
                } else {
                    inner.memory.clear();
                }
                Ok(())
            }
            Lifecycle::Disposed | Lifecycle::Uninitialised => Ok(()),
        }
    }
}

impl<K, V> Drop for Cache<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Best-effort shutdown hook: a still-alive persistent cache
    /// flushes itself on drop. This only runs on an ordinary drop (scope
    /// exit, panic unwind) — it is not reached by `std::process::exit` or an
    /// abort, so callers that need a guaranteed flush at process
    /// termination should still call `dispose` explicitly from their own
    /// shutdown path.
    fn drop(&mut self) {
        if self.config.disk_persistent {
            let _ = self.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg(name: &str) -> CacheConfig {
        CacheConfig {
            name: name.to_string(),
            max_elements_in_memory: 2,
            eternal: true,
            time_to_idle_seconds: 0,
            time_to_live_seconds: 0,
            overflow_to_disk: false,
            disk_persistent: false,
            disk_expiry_thread_interval_seconds: 1,
        }
    }

    #[test]
    fn s1_basic_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Cache<i32, String> = Cache::new(cfg("s1"), dir.path()).unwrap();
        for i in 1..=4 {
            cache.put(Element::new(i, Some(format!("v{i}")))).unwrap();
        }
        assert_eq!(cache.get(&4).unwrap().unwrap().value, Some("v4".to_string()));
    }

    #[test]
    fn s2_overflow_promotes_disk_hit_into_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cfg("s2");
        c.overflow_to_disk = true;
        c.max_elements_in_memory = 2;
        let cache: Cache<i32, String> = Cache::new(c, dir.path()).unwrap();
        for i in 1..=5 {
            cache.put(Element::new(i, Some(format!("v{i}")))).unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        let got = cache.get(&1).unwrap().unwrap();
        assert_eq!(got.value, Some("v1".to_string()));
        assert_eq!(cache.stats().disk_store_hit_count, 1);
        cache.dispose().unwrap();
    }

    #[test]
    fn disk_hit_is_promoted_to_most_recently_used_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cfg("s5-lru-promotion");
        c.overflow_to_disk = true;
        c.max_elements_in_memory = 2;
        let cache: Cache<i32, String> = Cache::new(c, dir.path()).unwrap();
        for i in 1..=3 {
            cache.put(Element::new(i, Some(format!("v{i}")))).unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        // memory now holds {2, 3}; 1 was spooled to disk.
        cache.get(&1).unwrap().unwrap();
        let memory_keys = cache.with_alive(|inner| inner.memory.keys()).unwrap();
        assert!(memory_keys.len() <= 2);
        assert_eq!(
            memory_keys.first().copied(),
            Some(1),
            "disk hit must be the most-recently-used entry in memory, got {memory_keys:?}"
        );
        cache.dispose().unwrap();
    }

    #[test]
    fn s5_ttl_expires_and_counts_as_miss_expired() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cfg("s5");
        c.eternal = false;
        c.time_to_live_seconds = 1;
        let cache: Cache<i32, String> = Cache::new(c, dir.path()).unwrap();
        cache.put(Element::new(1, Some("v".to_string()))).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get(&1).unwrap().is_none());
        assert_eq!(cache.stats().miss_count_expired, 1);
    }

    #[test]
    fn s3_cache_level_persistence_round_trips_after_dispose_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cfg("s3-cache");
        c.overflow_to_disk = true;
        c.disk_persistent = true;
        let cache: Cache<i32, String> = Cache::new(c.clone(), dir.path()).unwrap();
        for i in 1..=3 {
            cache.put(Element::new(i, Some(format!("v{i}")))).unwrap();
        }
        // `dispose` drains every resident memory element through
        // `inner.memory.drain_into(|element| disk.put(element))` and then
        // disposes the disk store (flush + index write) — exercised here at
        // the public `Cache` API rather than by poking `DiskStore` directly.
        cache.dispose().unwrap();

        let reopened: Cache<i32, String> = Cache::new(c, dir.path()).unwrap();
        for i in 1..=3 {
            let got = reopened.get(&i).unwrap().unwrap();
            assert_eq!(got.value, Some(format!("v{i}")));
        }
        reopened.dispose().unwrap();
    }

    #[test]
    fn s4_cache_level_crash_without_dispose_yields_empty_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cfg("s4-cache");
        c.overflow_to_disk = true;
        c.disk_persistent = true;
        let cache: Cache<i32, String> = Cache::new(c.clone(), dir.path()).unwrap();
        for i in 1..=3 {
            cache.put(Element::new(i, Some(format!("v{i}")))).unwrap();
        }
        std::thread::sleep(Duration::from_millis(50)); // let the spool worker commit to disk
        // Simulate a process crash: a real crash never runs destructors, so
        // leak the cache instead of calling `dispose` (which the `Drop` impl
        // would otherwise run for us, defeating the scenario being tested).
        std::mem::forget(cache);

        let reopened: Cache<i32, String> = Cache::new(c, dir.path()).unwrap();
        for i in 1..=3 {
            assert!(reopened.get(&i).unwrap().is_none());
        }
        reopened.dispose().unwrap();
    }

    #[test]
    fn not_alive_outside_initialised_state_fails() {
        let cache: Cache<i32, String> = Cache::uninitialised(cfg("uninit"));
        assert!(matches!(cache.get(&1), Err(CacheError::NotAlive { .. })));
    }

    #[test]
    fn dispose_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Cache<i32, String> = Cache::new(cfg("dispose-twice"), dir.path()).unwrap();
        cache.put(Element::new(1, Some("v".to_string()))).unwrap();
        assert!(cache.dispose().is_ok());
        assert!(cache.dispose().is_ok());
        assert!(matches!(cache.get(&1), Err(CacheError::NotAlive { .. })));
    }

    #[test]
    fn get_keys_has_no_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cfg("keys");
        c.overflow_to_disk = true;
        c.max_elements_in_memory = 1;
        let cache: Cache<i32, String> = Cache::new(c, dir.path()).unwrap();
        cache.put(Element::new(1, Some("a".to_string()))).unwrap();
        cache.put(Element::new(2, Some("b".to_string()))).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        // reading 1 back promotes it into memory while it may still be
        // indexed on disk until the next eviction; get_keys must dedup.
        let _ = cache.get(&1).unwrap();
        let keys = cache.get_keys().unwrap();
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(keys.len(), unique.len());
        cache.dispose().unwrap();
    }
}
