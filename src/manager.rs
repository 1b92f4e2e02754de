//! [`CacheManager`]: the process-wide registry of named caches.

use crate::cache::Cache;
use crate::config::{validate_and_normalize_name, CacheConfig, ManagerConfig};
use crate::error::{CacheError, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::warn;

type AnyManager = Arc<dyn Any + Send + Sync>;

/// The process-wide singleton slot, keyed by `TypeId` so every distinct
/// `CacheManager<K, V>` instantiation gets its own entry without requiring a
/// generic `static` ("at most one CacheManager instance per
/// process" — read per monomorphic `(K, V)`, there being no single concrete
/// type to hang one manager off of in a generic library).
fn singleton_registry() -> &'static OnceLock<Mutex<HashMap<TypeId, AnyManager>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<TypeId, AnyManager>>> = OnceLock::new();
    &REGISTRY
}

/// Owns a named registry of [`Cache`]s sharing one disk root.
pub struct CacheManager<K, V> {
    disk_root: RwLock<PathBuf>,
    default_cache: RwLock<CacheConfig>,
    caches: DashMap<String, Arc<Cache<K, V>>>,
}

impl<K, V> CacheManager<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Build a manager directly (not through the singleton). Useful for
    /// tests that want isolation from the process-wide slot.
    pub fn new(config: ManagerConfig) -> Self {
        let disk_root = config.resolved_disk_cache_path();
        let manager = Self {
            disk_root: RwLock::new(disk_root),
            default_cache: RwLock::new(config.default_cache),
            caches: DashMap::new(),
        };
        for cache_config in config.caches {
            let name = cache_config.name.clone();
            if let Err(e) = manager.add_cache_with_config(cache_config) {
                warn!(cache = %name, error = %e, "failed to pre-declare configured cache");
            }
        }
        manager
    }

    /// Return the process-wide singleton for this `(K, V)`, creating it from
    /// `config` if none exists yet. Idempotent — a second call
    /// with a different `config` is ignored and the existing manager is
    /// returned.
    pub fn singleton(config: ManagerConfig) -> Arc<Self> {
        let registry = singleton_registry().get_or_init(|| Mutex::new(HashMap::new()));
        let mut guard = registry.lock();
        let type_id = TypeId::of::<Self>();
        if let Some(existing) = guard.get(&type_id) {
            return existing
                .clone()
                .downcast::<Self>()
                .expect("singleton registry held the wrong concrete type for its own key");
        }
        let manager = Arc::new(Self::new(config));
        guard.insert(type_id, manager.clone() as AnyManager);
        manager
    }

    /// Register a new cache named `name`, cloning the manager's default
    /// template. Fails with [`CacheError::AlreadyExists`] if `name` is
    /// already registered.
    pub fn add_cache(&self, name: &str) -> Result<Arc<Cache<K, V>>> {
        let name = validate_and_normalize_name(name)?;
        let config = self.default_cache.read().named(name);
        self.add_cache_with_config(config)
    }

    /// Register an already-configured cache. Fails with
    /// [`CacheError::AlreadyExists`] if `config.name` is already registered.
    pub fn add_cache_with_config(&self, config: CacheConfig) -> Result<Arc<Cache<K, V>>> {
        if self.caches.contains_key(&config.name) {
            return Err(CacheError::AlreadyExists { name: config.name });
        }
        let disk_root = self.disk_root.read().clone();
        let cache = Arc::new(Cache::new(config.clone(), &disk_root)?);
        self.caches.insert(config.name, cache.clone());
        Ok(cache)
    }

    /// Look up a registered cache by name. Missing is silent.
    pub fn get_cache(&self, name: &str) -> Option<Arc<Cache<K, V>>> {
        self.caches.get(name).map(|entry| entry.clone())
    }

    /// Unregister and dispose a cache. Missing is silent.
    pub fn remove_cache(&self, name: &str) {
        if let Some((_, cache)) = self.caches.remove(name) {
            let _ = cache.dispose();
        }
    }

    /// Repoint the shared disk root for caches registered from now on.
    /// Already-open caches keep the root they were opened under.
    pub fn set_disk_store_path(&self, path: impl Into<PathBuf>) {
        *self.disk_root.write() = path.into();
    }

    /// Dispose every registered cache and clear the registry. Idempotent;
    /// also clears the singleton slot so a later [`Self::singleton`] call
    /// builds a fresh manager (useful for test isolation).
    pub fn shutdown(&self) {
        for entry in self.caches.iter() {
            let _ = entry.value().dispose();
        }
        self.caches.clear();

        if let Some(registry) = singleton_registry().get() {
            registry.lock().remove(&TypeId::of::<Self>());
        }
    }
}
