//! Error kinds surfaced by the cache engine.
//!
//! Foreground operations (put/get/remove) surface I/O failures but never
//! surface "this element was expired" as an error — expiry is observationally
//! identical to "not present" (see [`crate::cache::Cache::get`]). Background
//! workers recover from I/O and serialization failures locally (log + carry
//! on); those paths never construct a [`CacheError`] that reaches a caller.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error kinds for the cache engine, matching the taxonomy the engine is
/// specified against: a handful of state/identity errors, I/O, serialization,
/// and a corruption variant that is always recovered locally and never
/// returned from a public method's success path.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Operation attempted on a cache, manager, or disk store that is not in
    /// the `Alive` state.
    #[error("'{name}' is not alive")]
    NotAlive {
        /// Name of the cache/store the caller addressed.
        name: String,
    },

    /// Attempted to add a cache (or named map) under a name already present.
    #[error("a cache named '{name}' already exists")]
    AlreadyExists {
        /// The name that collided.
        name: String,
    },

    /// A named-map facade name failed validation (empty, or over 200 chars).
    #[error("invalid cache name: {reason}")]
    InvalidName {
        /// Human-readable reason the name was rejected.
        reason: String,
    },

    /// Disk read/write/seek fault.
    #[error("disk I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk index failed an integrity check. This variant is produced
    /// internally by [`crate::disk::index`] and is always handled by
    /// rebuilding an empty index and deleting the data file before any
    /// `Result` reaches a caller; it is public only so the recovery path can
    /// be logged and unit-tested.
    #[error("on-disk index is corrupt: {detail}")]
    Corruption {
        /// What failed (magic mismatch, truncated file, decode error, ...).
        detail: String,
    },

    /// An element could not be encoded or decoded. On read this is treated as
    /// a miss; on write the element is logged and dropped.
    #[error("serialization failure: {0}")]
    Serialization(#[from] bincode::Error),

    /// A cache was requested without a default-cache template configured.
    #[error("no default cache configuration available for '{what}'")]
    ConfigurationMissing {
        /// What was being constructed when the default was needed.
        what: String,
    },
}
