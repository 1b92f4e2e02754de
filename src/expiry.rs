//! Shared expiry predicates used by both [`crate::cache::Cache`] and
//! [`crate::disk::store::DiskStore`] so the two tiers never disagree about
//! what "expired" means for the same element.

use crate::element::Element;

/// Sentinel `expiry_time` for an eternal element: "never".
pub const EXPIRY_ETERNAL: i64 = i64::MAX;

/// The expiry predicate.
///
/// `next_to_last_access_time` (not `last_access_time`) anchors the idle
/// clock so that the very read performing this check never resets it —
/// otherwise a cache that is only ever read via expiry probes would look
/// perpetually fresh.
pub fn is_expired<K, V>(element: &Element<K, V>, eternal: bool, ttl_secs: u64, tti_secs: u64) -> bool {
    if element.value.is_none() {
        return true;
    }
    if eternal {
        return false;
    }
    let now = crate::element::now_millis();
    let age_lived = now - element.creation_time;
    let idle_anchor = element.creation_time.max(element.next_to_last_access_time);
    let age_idled = now - idle_anchor;

    if ttl_secs != 0 && age_lived > (ttl_secs as i64) * 1000 {
        return true;
    }
    if tti_secs != 0 && age_idled > (tti_secs as i64) * 1000 {
        return true;
    }
    false
}

/// The absolute expiry time stamped into a [`crate::disk::index::DiskElement`]
/// when an element is committed to disk.
///
/// The formula is `max(creation + ttl*1000, last_access +
/// tti*1000)`, but a disabled axis (`ttl_secs == 0` or `tti_secs == 0`) is
/// excluded from the `max` entirely rather than taken literally — otherwise
/// a disabled term would stamp a near-"now" expiry time, causing the
/// disk-index expiry sweep to reap an element the cache's own `is_expired`
/// would call eternal-for-that-axis. An element with both TTL and TTI
/// disabled on a non-eternal cache is stamped [`EXPIRY_ETERNAL`] on disk
/// too, matching `is_expired`'s verdict for the same configuration.
pub fn disk_expiry_time<K, V>(element: &Element<K, V>, eternal: bool, ttl_secs: u64, tti_secs: u64) -> i64 {
    if eternal {
        return EXPIRY_ETERNAL;
    }
    let mut candidates: Vec<i64> = Vec::with_capacity(2);
    if ttl_secs != 0 {
        candidates.push(element.creation_time + (ttl_secs as i64) * 1000);
    }
    if tti_secs != 0 {
        candidates.push(element.last_access_time + (tti_secs as i64) * 1000);
    }
    candidates.into_iter().max().unwrap_or(EXPIRY_ETERNAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eternal_never_expires() {
        let e = Element::new(1, Some("v"));
        assert!(!is_expired(&e, true, 1, 1));
    }

    #[test]
    fn missing_value_is_always_expired() {
        let e: Element<i32, &str> = Element::new(1, None);
        assert!(is_expired(&e, true, 0, 0));
    }

    #[test]
    fn ttl_expires_by_creation_age() {
        let mut e = Element::new(1, Some("v"));
        e.creation_time -= 2000;
        e.last_access_time = e.creation_time;
        e.next_to_last_access_time = e.creation_time;
        assert!(is_expired(&e, false, 1, 0));
    }

    #[test]
    fn tti_expires_by_idle_age_using_next_to_last() {
        let mut e = Element::new(1, Some("v"));
        // element is old but was "accessed" recently via last_access_time;
        // next_to_last_access_time is what the idle check must honor.
        e.creation_time -= 5000;
        e.next_to_last_access_time = e.creation_time;
        e.last_access_time = crate::element::now_millis();
        assert!(is_expired(&e, false, 0, 1));
    }

    #[test]
    fn disk_expiry_time_is_eternal_when_both_axes_disabled() {
        let e = Element::new(1, Some("v"));
        assert_eq!(disk_expiry_time(&e, false, 0, 0), EXPIRY_ETERNAL);
    }

    #[test]
    fn disk_expiry_time_takes_max_of_enabled_axes() {
        let mut e = Element::new(1, Some("v"));
        e.creation_time = 1_000_000;
        e.last_access_time = 2_000_000;
        let t = disk_expiry_time(&e, false, 10, 1);
        assert_eq!(t, (2_000_000 + 1000).max(1_000_000 + 10_000));
    }
}
