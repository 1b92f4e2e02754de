//! The [`Element`] type: an immutable-after-creation cache entry plus the
//! bookkeeping the expiry and recency machinery needs.

use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Centralized so every timestamp in the crate is taken the same way
/// (`chrono`, matching the rest of the ambient stack's timestamp handling).
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One cache entry: a key, an optional value, and access bookkeeping.
///
/// `value` is `None` to represent a tombstone-on-read: an element whose value
/// has been dropped but whose presence is still tracked (e.g. a disk element
/// that failed to deserialize). [`Cache::is_expired`](crate::cache::Cache::is_expired)
/// treats a missing value as unconditionally expired.
///
/// # Invariant
///
/// `next_to_last_access_time <= last_access_time <= now` at every observation
/// point. This is maintained by [`Element::record_access`] and is the reason
/// idle-expiry is computed against `next_to_last_access_time`: the read that
/// is probing for staleness must not be the read that resets the idle clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element<K, V> {
    pub key: K,
    pub value: Option<V>,
    pub creation_time: i64,
    pub last_access_time: i64,
    pub next_to_last_access_time: i64,
    pub hit_count: u64,
}

impl<K, V> Element<K, V> {
    /// Construct a fresh element as of now: all three timestamps equal the
    /// creation time and `hit_count` starts at zero.
    pub fn new(key: K, value: Option<V>) -> Self {
        let now = now_millis();
        Self {
            key,
            value,
            creation_time: now,
            last_access_time: now,
            next_to_last_access_time: now,
            hit_count: 0,
        }
    }

    /// Reset access statistics as if the element were just created, keeping
    /// its payload. Used by [`Cache::put`](crate::cache::Cache::put), which
    /// treats every put as a fresh insert.
    pub fn reset_statistics(&mut self) {
        let now = now_millis();
        self.creation_time = now;
        self.last_access_time = now;
        self.next_to_last_access_time = now;
        self.hit_count = 0;
    }

    /// Record a non-quiet read: roll `last_access_time` into
    /// `next_to_last_access_time`, stamp `last_access_time` to now, and bump
    /// `hit_count`. `get_quiet` paths must not call this.
    pub fn record_access(&mut self) {
        let now = now_millis();
        self.next_to_last_access_time = self.last_access_time;
        self.last_access_time = now;
        self.hit_count += 1;
    }

    /// `true` if this element carries no value (tombstone).
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}
