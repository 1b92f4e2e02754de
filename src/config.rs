//! Configuration records consumed by the cache engine.
//!
//! Loading these from a file (XML, TOML, JSON, ...) is explicitly out of
//! scope — construct a [`ManagerConfig`] programmatically, or
//! `serde`-deserialize one from whatever format a caller's application
//! already uses.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default disk-expiry sweep interval used whenever a configuration leaves
/// `disk_expiry_thread_interval_seconds` at zero.
pub const DEFAULT_DISK_EXPIRY_INTERVAL_SECONDS: u64 = 120;

/// Maximum length, in characters, of a validated named-map/cache name.
pub const MAX_NAME_LEN: usize = 200;

/// Process-wide manager configuration: where disk files live, a template
/// cache config new caches are cloned from, and a set of pre-declared named
/// caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Directory caches persist their `{name}.data`/`{name}.index` files
    /// under. May contain the tokens `user.home`, `user.dir`, and
    /// `system.tmpdir`, resolved by [`resolve_disk_cache_path`].
    pub disk_cache_path: String,

    /// Template settings `add_cache(name)` clones when no explicit
    /// per-cache settings are registered.
    pub default_cache: CacheConfig,

    /// Explicitly pre-declared named caches, keyed by `CacheConfig::name`.
    #[serde(default)]
    pub caches: Vec<CacheConfig>,
}

impl ManagerConfig {
    /// Resolve [`Self::disk_cache_path`]'s tokens against the current
    /// process environment.
    pub fn resolved_disk_cache_path(&self) -> PathBuf {
        resolve_disk_cache_path(&self.disk_cache_path)
    }

    /// Look up a pre-declared cache config by name.
    pub fn find_cache(&self, name: &str) -> Option<&CacheConfig> {
        self.caches.iter().find(|c| c.name == name)
    }
}

/// Per-cache settings. One of these is cloned as a template
/// (`default_cache`) and the rest are named, concrete configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache name; also the `{name}` prefix for disk files when persistent.
    pub name: String,

    /// Bound on [`crate::memory_store::MemoryStore`] size. Zero is legal
    /// (every put evicts immediately) and logs a warning at cache init.
    pub max_elements_in_memory: usize,

    /// If true, TTL/TTI are ignored and elements never expire.
    pub eternal: bool,

    /// Time-to-idle, seconds. Zero disables the idle check.
    pub time_to_idle_seconds: u64,

    /// Time-to-live, seconds. Zero disables the lifetime check.
    pub time_to_live_seconds: u64,

    /// Whether memory-tier evictions spool to a disk store at all, and
    /// whether `get` consults the disk tier on a memory miss.
    pub overflow_to_disk: bool,

    /// Whether the disk store survives `dispose`/process restart (writes an
    /// index file) or is wiped on clean shutdown.
    pub disk_persistent: bool,

    /// Disk expiry sweep interval, seconds. Zero resolves to
    /// [`DEFAULT_DISK_EXPIRY_INTERVAL_SECONDS`].
    pub disk_expiry_thread_interval_seconds: u64,
}

impl CacheConfig {
    /// The effective disk-expiry sweep interval, applying the "0 means 120"
    /// default.
    pub fn disk_expiry_interval_seconds(&self) -> u64 {
        if self.disk_expiry_thread_interval_seconds == 0 {
            DEFAULT_DISK_EXPIRY_INTERVAL_SECONDS
        } else {
            self.disk_expiry_thread_interval_seconds
        }
    }

    /// Clone this config as the template for a newly named cache.
    pub fn named(&self, name: impl Into<String>) -> Self {
        let mut c = self.clone();
        c.name = name.into();
        c
    }
}

impl Default for CacheConfig {
    /// A modest in-memory-only default: 10,000 elements, eternal, no
    /// overflow. Callers needing disk overflow must opt in explicitly.
    fn default() -> Self {
        Self {
            name: String::new(),
            max_elements_in_memory: 10_000,
            eternal: true,
            time_to_idle_seconds: 0,
            time_to_live_seconds: 0,
            overflow_to_disk: false,
            disk_persistent: false,
            disk_expiry_thread_interval_seconds: DEFAULT_DISK_EXPIRY_INTERVAL_SECONDS,
        }
    }
}

/// Resolve the `user.home`, `user.dir`, and `system.tmpdir` tokens in a
/// configured disk-cache path against the current process environment.
/// Tokens that don't resolve (e.g. `$HOME` unset) fall back to the system
/// temp directory, matching the "only environment-derived path is the
/// system temp directory" fallback note.
pub fn resolve_disk_cache_path(raw: &str) -> PathBuf {
    let tmpdir = std::env::temp_dir();
    let home = std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| tmpdir.clone());
    let cwd = std::env::current_dir().unwrap_or_else(|_| tmpdir.clone());

    let resolved = raw
        .replace("user.home", &home.to_string_lossy())
        .replace("user.dir", &cwd.to_string_lossy())
        .replace("system.tmpdir", &tmpdir.to_string_lossy());

    if resolved.trim().is_empty() {
        tmpdir
    } else {
        PathBuf::from(resolved)
    }
}

/// Validate and normalize a named-map/cache name: reject empty
/// or over-`MAX_NAME_LEN`-char names, and replace every non-alphanumeric
/// character with `_` to form the name actually used as the file prefix.
pub fn validate_and_normalize_name(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(CacheError::InvalidName {
            reason: "name must not be empty".to_string(),
        });
    }
    if raw.chars().count() > MAX_NAME_LEN {
        return Err(CacheError::InvalidName {
            reason: format!("name exceeds {MAX_NAME_LEN} characters"),
        });
    }
    Ok(raw
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect())
}
