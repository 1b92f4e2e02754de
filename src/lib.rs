//! An embeddable, unbounded key/value cache with a two-tier storage
//! hierarchy: a bounded [`MemoryStore`](memory_store::MemoryStore) that
//! overflows to a persistent, block-allocated [`DiskStore`](disk::DiskStore).
//!
//! The [`Cache`](cache::Cache) composes the two tiers with lookup promotion
//! (a disk hit is re-inserted into memory) and a shared expiry predicate.
//! [`CacheManager`](manager::CacheManager) owns a named registry of caches
//! sharing one disk root; [`NamedMap`](named_map::NamedMap) is an optional
//! facade adding a softly-held value map and an asynchronous write queue on
//! top of a cache.
//!
//! Loading configuration from a file format, logging sinks, and a
//! command-line front end are all left to the embedding application — this
//! crate consumes a plain [`config::ManagerConfig`]/[`config::CacheConfig`]
//! and emits [`tracing`] events.

pub mod cache;
pub mod config;
pub mod disk;
pub mod element;
pub mod error;
pub mod expiry;
pub mod manager;
pub mod memory_store;
pub mod named_map;

pub use cache::{Cache, CacheStats};
pub use config::{CacheConfig, ManagerConfig};
pub use element::Element;
pub use error::{CacheError, Result};
pub use manager::CacheManager;
pub use named_map::NamedMap;
