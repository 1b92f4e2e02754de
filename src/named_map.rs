//! [`NamedMap`]: a soft-referenced, asynchronously-written map facade over a
//! [`Cache`].

use crate::cache::Cache;
use crate::config::validate_and_normalize_name;
use crate::element::Element;
use crate::error::Result;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

enum Action<K, V> {
    Put(K, V),
    Remove(K),
}

/// A map-like view over a [`Cache`] with two extra pieces of state: a
/// bounded, softly-held `value_map` for fast reads of recently-written
/// values, and a strongly-held `key_set` so membership queries never need
/// the cache (let alone its disk tier). Writes are applied to the
/// underlying cache asynchronously, in enqueue order, by a dedicated
/// writer thread.
pub struct NamedMap<K, V> {
    name: String,
    cache: Arc<Cache<K, V>>,
    value_map: Mutex<LruCache<K, V>>,
    key_set: Mutex<HashSet<K>>,
    action_tx: Mutex<Option<mpsc::Sender<Action<K, V>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> NamedMap<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Wrap `cache` in a facade named `name`, with a soft value map bounded
    /// to `soft_map_capacity` entries (0 is coerced to 1 — an always-empty
    /// soft map is legal but a zero-capacity `LruCache` is not representable).
    pub fn new(name: &str, cache: Arc<Cache<K, V>>, soft_map_capacity: usize) -> Result<Self> {
        let name = validate_and_normalize_name(name)?;
        let (tx, rx) = mpsc::channel::<Action<K, V>>();
        let worker_cache = cache.clone();
        let worker = thread::Builder::new()
            .name(format!("{name}-namedmap-writer"))
            .spawn(move || {
                // `rx` yields every buffered action and then returns `None`
                // once every `Sender` is dropped — this is exactly "drain the
                // queue, then stop" with no extra bookkeeping.
                for action in rx {
                    let result = match action {
                        Action::Put(key, value) => worker_cache.put(Element::new(key, Some(value))),
                        Action::Remove(key) => worker_cache.remove(&key).map(|_| ()),
                    };
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "named map writer failed to apply a queued action");
                    }
                }
            })
            .expect("failed to spawn named map writer thread");

        let capacity = NonZeroUsize::new(soft_map_capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Ok(Self {
            name,
            cache,
            value_map: Mutex::new(LruCache::new(capacity)),
            key_set: Mutex::new(HashSet::new()),
            action_tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Facade name (also used as the writer thread's name prefix).
    pub fn name(&self) -> &str {
        &self.name
    }

    fn enqueue(&self, action: Action<K, V>) {
        if let Some(tx) = self.action_tx.lock().as_ref() {
            // A send failure means the writer thread is gone (panicked); the
            // soft map and key set were already updated synchronously, so the
            // caller-visible state is still consistent, just not durable.
            let _ = tx.send(action);
        }
    }

    /// Set `value_map[key] = value` and `key_set.insert(key)` synchronously,
    /// then enqueue the write for the background worker to apply to the
    /// underlying cache.
    pub fn put(&self, key: K, value: V) {
        self.value_map.lock().put(key.clone(), value.clone());
        self.key_set.lock().insert(key.clone());
        self.enqueue(Action::Put(key, value));
    }

    /// Probe `value_map` first; on a miss, fall back to the underlying
    /// cache (which may load from disk).
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        if let Some(value) = self.value_map.lock().get(key).cloned() {
            return Ok(Some(value));
        }
        Ok(self.cache.get(key)?.and_then(|element| element.value))
    }

    /// `true` if `key` is in the strongly-held key set. Never touches the
    /// cache or its disk tier.
    pub fn has_key(&self, key: &K) -> bool {
        self.key_set.lock().contains(key)
    }

    /// Remove `key` from `value_map`/`key_set` synchronously, then enqueue
    /// the removal for the background worker to apply.
    pub fn remove(&self, key: &K) {
        self.value_map.lock().pop(key);
        self.key_set.lock().remove(key);
        self.enqueue(Action::Remove(key.clone()));
    }

    /// Stop accepting new writes, let the worker drain everything already
    /// queued, then join it. Idempotent — a second call is a no-op.
    pub fn shutdown(&self) {
        let sender = self.action_tx.lock().take();
        drop(sender); // closes the channel; the worker's `for action in rx` then terminates
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn facade(name: &str, dir: &std::path::Path) -> NamedMap<String, String> {
        let config = CacheConfig {
            name: name.to_string(),
            ..CacheConfig::default()
        };
        let cache = Arc::new(Cache::new(config, dir).unwrap());
        NamedMap::new(name, cache, 16).unwrap()
    }

    #[test]
    fn put_is_visible_immediately_through_the_soft_map() {
        let dir = tempfile::tempdir().unwrap();
        let map = facade("s3", dir.path());
        map.put("k".to_string(), "v".to_string());
        assert_eq!(map.get(&"k".to_string()).unwrap(), Some("v".to_string()));
        map.shutdown();
    }

    #[test]
    fn has_key_reflects_key_set_without_reading_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let map = facade("hk", dir.path());
        assert!(!map.has_key(&"k".to_string()));
        map.put("k".to_string(), "v".to_string());
        assert!(map.has_key(&"k".to_string()));
        map.shutdown();
    }

    #[test]
    fn shutdown_drains_queued_writes_into_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            name: "drain".to_string(),
            ..CacheConfig::default()
        };
        let cache = Arc::new(Cache::new(config, dir.path()).unwrap());
        let map = NamedMap::new("drain", cache.clone(), 16).unwrap();
        for i in 0..10 {
            map.put(format!("k{i}"), format!("v{i}"));
        }
        map.shutdown();
        for i in 0..10 {
            let got = cache.get(&format!("k{i}")).unwrap().unwrap();
            assert_eq!(got.value, Some(format!("v{i}")));
        }
    }

    #[test]
    fn remove_clears_soft_map_and_key_set_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let map = facade("rm", dir.path());
        map.put("k".to_string(), "v".to_string());
        map.remove(&"k".to_string());
        assert!(!map.has_key(&"k".to_string()));
        assert_eq!(map.get(&"k".to_string()).unwrap(), None);
        map.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let map = facade("idem", dir.path());
        map.shutdown();
        map.shutdown();
    }
}
