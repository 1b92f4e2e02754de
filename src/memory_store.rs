//! [`MemoryStore`]: the bounded, recency-ordered in-memory tier.
//!
//! Built on `lru::LruCache` — a hash table threaded through an intrusive
//! doubly-linked list with move-to-front on access, which is exactly the
//! access-ordered map this tier needs.

use crate::element::Element;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::warn;

/// Callback invoked with an element selected for eviction. `Cache` supplies
/// this at construction; it encodes the three-way eviction policy:
/// drop if expired, spool to disk if overflow is enabled, else drop.
pub type EvictionHook<K, V> = Box<dyn Fn(Element<K, V>) + Send + Sync>;

struct Inner<K, V> {
    /// `None` only when capacity is zero: every put evicts immediately
    /// without ever touching the map, since `lru::LruCache` requires a
    /// non-zero capacity.
    lru: Option<LruCache<K, Element<K, V>>>,
}

/// A capacity-bounded, LRU-by-access-order mapping from key to [`Element`].
///
/// A lookup that hits (`get`) moves the entry to the freshest end; `get_quiet`
/// does not. Insertion past capacity selects the least-recently-accessed
/// entry and hands it to the configured [`EvictionHook`].
pub struct MemoryStore<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    on_evict: EvictionHook<K, V>,
}

impl<K, V> MemoryStore<K, V>
where
    K: Clone + Eq + std::hash::Hash,
    V: Clone,
{
    /// Build a store bounded to `capacity` elements. Capacity zero is legal
    /// and causes every `put` to evict immediately; a warning is
    /// logged once at construction.
    pub fn new(capacity: usize, on_evict: EvictionHook<K, V>) -> Self {
        if capacity == 0 {
            warn!("memory store configured with zero capacity: every put will evict immediately");
        }
        let lru = NonZeroUsize::new(capacity).map(LruCache::new);
        Self {
            inner: Mutex::new(Inner { lru }),
            capacity,
            on_evict,
        }
    }

    /// Configured capacity (0 means "never retains anything").
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or replace `element`. If this would exceed capacity, the
    /// least-recently-used element (which may be the one just inserted, at
    /// zero capacity) is evicted and handed to the eviction hook.
    pub fn put(&self, element: Element<K, V>) {
        if self.capacity == 0 {
            (self.on_evict)(element);
            return;
        }
        let key = element.key.clone();
        let mut guard = self.inner.lock();
        let lru = guard.lru.as_mut().expect("non-zero capacity implies Some");
        let displaced = lru.push(key.clone(), element);
        drop(guard); // never call the hook (which may spool to disk) while holding our own lock
        // `push` also reports the old value when replacing an existing key in
        // place; that is not an LRU eviction and must not be spooled/dropped.
        if let Some((evicted_key, evicted)) = displaced {
            if evicted_key != key {
                (self.on_evict)(evicted);
            }
        }
    }

    /// Look up `key`, promoting it to most-recently-used and recording an
    /// access on the stored element. Returns a clone of the (now-updated)
    /// element.
    pub fn get(&self, key: &K) -> Option<Element<K, V>> {
        let mut guard = self.inner.lock();
        let lru = guard.lru.as_mut()?;
        let element = lru.get_mut(key)?;
        element.record_access();
        Some(element.clone())
    }

    /// Look up `key` without promoting it or updating access statistics.
    /// Used by expiry probes and size queries.
    pub fn get_quiet(&self, key: &K) -> Option<Element<K, V>> {
        let guard = self.inner.lock();
        let lru = guard.lru.as_ref()?;
        lru.peek(key).cloned()
    }

    /// Remove `key`, returning `true` if it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut guard = self.inner.lock();
        match guard.lru.as_mut() {
            Some(lru) => lru.pop(key).is_some(),
            None => false,
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        if let Some(lru) = guard.lru.as_mut() {
            lru.clear();
        }
    }

    /// Current number of resident elements.
    pub fn len(&self) -> usize {
        let guard = self.inner.lock();
        guard.lru.as_ref().map_or(0, |l| l.len())
    }

    /// `true` if no elements are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All resident keys, most-recently-used first.
    pub fn keys(&self) -> Vec<K> {
        let guard = self.inner.lock();
        match guard.lru.as_ref() {
            Some(lru) => lru.iter().map(|(k, _)| k.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Drain every element (in no particular order), handing each to `f`.
    /// Used on `dispose` of a persistent cache, which must spool every
    /// resident element to disk before the map is released.
    pub fn drain_into(&self, mut f: impl FnMut(Element<K, V>)) {
        let mut guard = self.inner.lock();
        if let Some(lru) = guard.lru.as_mut() {
            while let Some((_, element)) = lru.pop_lru() {
                f(element);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_hook() -> (EvictionHook<i32, String>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        let hook: EvictionHook<i32, String> = Box::new(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        (hook, count)
    }

    #[test]
    fn capacity_bound_never_exceeded_after_put() {
        let (hook, _count) = counting_hook();
        let store = MemoryStore::new(2, hook);
        for i in 0..5 {
            store.put(Element::new(i, Some(format!("v{i}"))));
            assert!(store.len() <= 2);
        }
    }

    #[test]
    fn get_promotes_to_most_recently_used() {
        let (hook, _count) = counting_hook();
        let store = MemoryStore::new(2, hook);
        store.put(Element::new(1, Some("a".to_string())));
        store.put(Element::new(2, Some("b".to_string())));
        // touch 1, making 2 the LRU candidate
        assert!(store.get(&1).is_some());
        store.put(Element::new(3, Some("c".to_string())));
        assert!(store.get_quiet(&1).is_some());
        assert!(store.get_quiet(&2).is_none());
        assert!(store.get_quiet(&3).is_some());
    }

    #[test]
    fn zero_capacity_evicts_every_put_immediately() {
        let (hook, count) = counting_hook();
        let store = MemoryStore::new(0, hook);
        store.put(Element::new(1, Some("a".to_string())));
        store.put(Element::new(2, Some("b".to_string())));
        assert_eq!(store.len(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn get_quiet_does_not_change_access_stats() {
        let (hook, _count) = counting_hook();
        let store = MemoryStore::new(4, hook);
        store.put(Element::new(1, Some("a".to_string())));
        let before = store.get_quiet(&1).unwrap();
        let after = store.get_quiet(&1).unwrap();
        assert_eq!(before.hit_count, after.hit_count);
        assert_eq!(before.last_access_time, after.last_access_time);
    }

    #[test]
    fn drain_into_visits_every_resident_element() {
        let (hook, _count) = counting_hook();
        let store = MemoryStore::new(10, hook);
        for i in 0..5 {
            store.put(Element::new(i, Some(i)));
        }
        let mut seen = Vec::new();
        store.drain_into(|e| seen.push(e.key));
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(store.is_empty());
    }
}
