//! [`DiskStore`]: the persistent tier — a single-file block allocator with
//! an on-disk index, a background write spool, and (for non-eternal caches)
//! a background expirer.

use crate::disk::index::{self, DiskElement};
use crate::element::Element;
use crate::error::{CacheError, Result};
use crate::expiry;
use parking_lot::{Condvar, Mutex};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::hash::Hash;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

struct Inner<K, V> {
    elements: HashMap<K, DiskElement>,
    free_list: Vec<DiskElement>,
    spool: HashMap<K, Element<K, V>>,
    file: File,
    file_length: u64,
    /// Sum of `payload_size` across live (non-free) blocks. Diverges from
    /// `file_length` as reused blocks leak internal fragmentation — this is
    /// a known limitation preserved rather than fixed.
    total_size: u64,
    active: bool,
}

/// A block-allocated single-file store for one cache's disk tier, plus the
/// background spool-flush and expiry workers that service it.
///
/// Every public operation takes the store's single exclusive lock for its
/// entire duration — there are no lock-free fast paths, and the
/// spool worker holds the same lock for the whole of a flush, which is a
/// documented trade-off (readers stall under write pressure), not a bug.
pub struct DiskStore<K, V> {
    name: String,
    data_path: PathBuf,
    index_path: PathBuf,
    persistent: bool,
    eternal: bool,
    ttl_secs: u64,
    tti_secs: u64,
    inner: Mutex<Inner<K, V>>,
    spool_cv: Condvar,
    shutdown_cv: Condvar,
    spool_thread: Mutex<Option<JoinHandle<()>>>,
    expirer_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> DiskStore<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open (or create) the disk store for `name` under `root`, restoring
    /// its index if `persistent` and the on-disk index is intact, then spawn
    /// its background spool worker and (if not `eternal`) expirer thread.
    pub fn open(
        root: &Path,
        name: &str,
        persistent: bool,
        eternal: bool,
        ttl_secs: u64,
        tti_secs: u64,
        disk_expiry_interval_secs: u64,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(root)?;
        let data_path = root.join(format!("{name}.data"));
        let index_path = root.join(format!("{name}.index"));

        let (elements, free_list) = if persistent {
            match index::read_index::<K>(&index_path) {
                Ok((elements, free_list)) => {
                    info!(cache = name, entries = elements.len(), "restored disk index");
                    (elements, free_list)
                }
                Err(err) => {
                    warn!(
                        cache = name,
                        error = %err,
                        "index missing or corrupt; starting empty and discarding the data file"
                    );
                    let _ = std::fs::remove_file(&data_path);
                    (HashMap::new(), Vec::new())
                }
            }
        } else {
            let _ = std::fs::remove_file(&data_path);
            let _ = std::fs::remove_file(&index_path);
            (HashMap::new(), Vec::new())
        };

        if persistent {
            // Recreated empty unconditionally: if the process crashes after
            // further writes but before a clean dispose, the next startup
            // finds an empty index and safely discards the data file.
            index::write_index::<K>(&index_path, &HashMap::new(), &[])?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&data_path)?;
        let file_length = file.metadata()?.len();
        let total_size = elements.values().map(|e| e.payload_size).sum();

        let store = Arc::new(Self {
            name: name.to_string(),
            data_path,
            index_path,
            persistent,
            eternal,
            ttl_secs,
            tti_secs,
            inner: Mutex::new(Inner {
                elements,
                free_list,
                spool: HashMap::new(),
                file,
                file_length,
                total_size,
                active: true,
            }),
            spool_cv: Condvar::new(),
            shutdown_cv: Condvar::new(),
            spool_thread: Mutex::new(None),
            expirer_thread: Mutex::new(None),
        });

        let spool_handle = {
            let store = store.clone();
            thread::Builder::new()
                .name(format!("{name}-spool"))
                .spawn(move || store.spool_worker_loop())
                .expect("failed to spawn disk spool worker thread")
        };
        *store.spool_thread.lock() = Some(spool_handle);

        if !eternal {
            let store = store.clone();
            let interval = disk_expiry_interval_secs;
            let handle = thread::Builder::new()
                .name(format!("{name}-expirer"))
                .spawn(move || store.expirer_loop(interval))
                .expect("failed to spawn disk expirer thread");
            *store.expirer_thread.lock() = Some(handle);
        }

        Ok(store)
    }

    /// Name this store was opened under (the `{name}` file prefix).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `element` for the background spool worker to commit. A
    /// pending write is visible to [`Self::get`]/[`Self::get_quiet`]
    /// immediately — it satisfies a read directly out of the spool before
    /// the worker ever runs (the put-then-get ordering guarantee).
    pub fn put(&self, element: Element<K, V>) {
        let mut guard = self.inner.lock();
        if !guard.active {
            return;
        }
        guard.spool.insert(element.key.clone(), element);
        drop(guard);
        self.spool_cv.notify_one();
    }

    /// Look up `key`: spool first (removing the pending write, which then
    /// satisfies this read directly), falling back to the on-disk index.
    /// Updates access statistics on the returned element.
    ///
    /// A disk seek/read I/O fault is surfaced as `Err(CacheError::Io(..))`
    /// rather than folded into the `None` case — it is not the same failure
    /// as "not present" and foreground callers must be able to tell them
    /// apart. A deserialization failure, by contrast, is logged and treated
    /// as a miss (`Ok(None)`), matching the serialization-failure policy.
    pub fn get(&self, key: &K) -> Result<Option<Element<K, V>>> {
        self.get_impl(key, true)
    }

    /// As [`Self::get`] but does not update access statistics.
    pub fn get_quiet(&self, key: &K) -> Result<Option<Element<K, V>>> {
        self.get_impl(key, false)
    }

    fn get_impl(&self, key: &K, record_access: bool) -> Result<Option<Element<K, V>>> {
        let mut guard = self.inner.lock();
        if let Some(mut element) = guard.spool.remove(key) {
            if record_access {
                element.record_access();
            }
            return Ok(Some(element));
        }
        let disk_element = match guard.elements.get(key) {
            Some(de) => *de,
            None => return Ok(None),
        };
        self.read_element(&mut guard, &disk_element, record_access)
    }

    fn read_element(
        &self,
        guard: &mut Inner<K, V>,
        disk_element: &DiskElement,
        record_access: bool,
    ) -> Result<Option<Element<K, V>>> {
        let mut buf = vec![0u8; disk_element.payload_size as usize];
        let read_result = guard
            .file
            .seek(SeekFrom::Start(disk_element.position))
            .and_then(|_| guard.file.read_exact(&mut buf));
        if let Err(e) = read_result {
            error!(cache = %self.name, error = %e, "disk read failed");
            return Err(CacheError::Io(e));
        }
        match bincode::deserialize::<Element<K, V>>(&buf) {
            Ok(mut element) => {
                if record_access {
                    element.record_access();
                }
                Ok(Some(element))
            }
            Err(e) => {
                error!(cache = %self.name, error = %e, "element failed to deserialize; treating as miss");
                Ok(None)
            }
        }
    }

    /// Remove `key` from the spool and/or the on-disk index. Returns `true`
    /// if it was present in either.
    pub fn remove(&self, key: &K) -> bool {
        let mut guard = self.inner.lock();
        let had_spool = guard.spool.remove(key).is_some();
        let had_index = Self::remove_index_entry(&mut guard, key);
        had_spool || had_index
    }

    fn remove_index_entry(guard: &mut Inner<K, V>, key: &K) -> bool {
        if let Some(mut old) = guard.elements.remove(key) {
            guard.total_size = guard.total_size.saturating_sub(old.payload_size);
            old.payload_size = 0;
            guard.free_list.push(old);
            true
        } else {
            false
        }
    }

    /// Drop every spooled write and on-disk entry (does not touch the
    /// allocated file length; blocks simply become unreferenced).
    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.spool.clear();
        guard.elements.clear();
        guard.free_list.clear();
        guard.total_size = 0;
    }

    /// All keys currently resident in this store, spooled or committed.
    pub fn keys(&self) -> Vec<K> {
        let guard = self.inner.lock();
        let mut keys: Vec<K> = guard.spool.keys().cloned().collect();
        keys.extend(guard.elements.keys().cloned());
        keys
    }

    /// Number of resident keys (spooled + committed).
    pub fn len(&self) -> usize {
        let guard = self.inner.lock();
        guard.spool.len() + guard.elements.len()
    }

    /// `true` if this store holds no keys at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of allocated block bytes in the data file (including freed,
    /// reusable blocks).
    pub fn file_length(&self) -> u64 {
        self.inner.lock().file_length
    }

    /// Sum of live payload bytes (excludes freed blocks and the fragmented
    /// remainder of reused blocks).
    pub fn total_size(&self) -> u64 {
        self.inner.lock().total_size
    }

    /// Fraction of the data file's allocated space that is not live
    /// payload — the fragmentation metric, since the
    /// allocator never compacts reused blocks.
    pub fn sparseness(&self) -> f64 {
        let guard = self.inner.lock();
        if guard.file_length == 0 {
            0.0
        } else {
            1.0 - (guard.total_size as f64 / guard.file_length as f64)
        }
    }

    /// Commit every spooled write to the data file via the first-fit
    /// allocator, dropping (and logging) any element that fails to
    /// serialize or write. Called by the spool worker and by [`Self::dispose`].
    fn flush_locked(&self, guard: &mut Inner<K, V>) {
        let spooled: Vec<(K, Element<K, V>)> = guard.spool.drain().collect();
        for (key, element) in spooled {
            let payload = match bincode::serialize(&element) {
                Ok(p) => p,
                Err(e) => {
                    error!(cache = %self.name, error = %e, "element failed to serialize; write dropped");
                    continue;
                }
            };
            if let Err(e) = self.commit_locked(guard, &key, &payload) {
                error!(cache = %self.name, error = %e, "failed committing spooled element; write dropped");
                continue;
            }
            let expiry_time = expiry::disk_expiry_time(&element, self.eternal, self.ttl_secs, self.tti_secs);
            if let Some(de) = guard.elements.get_mut(&key) {
                de.expiry_time = expiry_time;
            }
        }
    }

    /// The allocator protocol: first-fit reuse of a freed
    /// block, or append-only growth; writes the payload, installs the new
    /// [`DiskElement`], and returns any previous block for `key` to the
    /// free list.
    fn commit_locked(&self, guard: &mut Inner<K, V>, key: &K, payload: &[u8]) -> Result<()> {
        let needed = payload.len() as u64;
        let reuse_idx = guard.free_list.iter().position(|b| b.block_size >= needed);
        let mut block = match reuse_idx {
            Some(idx) => guard.free_list.remove(idx),
            None => DiskElement {
                position: guard.file_length,
                block_size: needed,
                payload_size: 0,
                expiry_time: 0,
            },
        };

        guard.file.seek(SeekFrom::Start(block.position))?;
        guard.file.write_all(payload)?;
        if reuse_idx.is_none() {
            guard.file_length += needed;
        }
        block.payload_size = needed;
        guard.total_size += needed;

        if let Some(mut old) = guard.elements.insert(key.clone(), block) {
            guard.total_size = guard.total_size.saturating_sub(old.payload_size);
            old.payload_size = 0;
            guard.free_list.push(old);
        }
        Ok(())
    }

    /// The expiry pass: drop spooled elements that are
    /// already expired, then reclaim on-disk blocks whose stamped
    /// `expiry_time` has passed.
    fn run_expiry_pass_locked(&self, guard: &mut Inner<K, V>) {
        let (eternal, ttl, tti) = (self.eternal, self.ttl_secs, self.tti_secs);
        let expired_spool_keys: Vec<K> = guard
            .spool
            .iter()
            .filter(|(_, e)| expiry::is_expired(e, eternal, ttl, tti))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired_spool_keys {
            guard.spool.remove(k);
        }

        let now = crate::element::now_millis();
        let expired_index_keys: Vec<K> = guard
            .elements
            .iter()
            .filter(|(_, de)| now >= de.expiry_time)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired_index_keys {
            Self::remove_index_entry(guard, k);
        }

        if !expired_spool_keys.is_empty() || !expired_index_keys.is_empty() {
            debug!(
                cache = %self.name,
                spool_reclaimed = expired_spool_keys.len(),
                index_reclaimed = expired_index_keys.len(),
                "disk expiry sweep reclaimed entries"
            );
        }
    }

    fn spool_worker_loop(self: Arc<Self>) {
        loop {
            let mut guard = self.inner.lock();
            loop {
                if !guard.active {
                    return;
                }
                if !guard.spool.is_empty() {
                    break;
                }
                self.spool_cv.wait(&mut guard);
            }
            self.flush_locked(&mut guard);
        }
    }

    fn expirer_loop(self: Arc<Self>, interval_secs: u64) {
        let timeout = Duration::from_secs(interval_secs.max(1));
        loop {
            let mut guard = self.inner.lock();
            if !guard.active {
                return;
            }
            self.shutdown_cv.wait_for(&mut guard, timeout);
            if !guard.active {
                return;
            }
            self.run_expiry_pass_locked(&mut guard);
        }
    }

    /// Clean shutdown: interrupt the expirer, flush the spool once more and
    /// persist the index if persistent, otherwise delete the data file.
    /// Idempotent — a second call performs no I/O.
    pub fn dispose(&self) {
        {
            let mut guard = self.inner.lock();
            if !guard.active {
                return;
            }
            guard.active = false;
        }
        self.spool_cv.notify_all();
        self.shutdown_cv.notify_all();
        if let Some(h) = self.spool_thread.lock().take() {
            let _ = h.join();
        }
        if let Some(h) = self.expirer_thread.lock().take() {
            let _ = h.join();
        }

        let mut guard = self.inner.lock();
        if self.persistent {
            self.flush_locked(&mut guard);
            if let Err(e) = index::write_index(&self.index_path, &guard.elements, &guard.free_list) {
                error!(cache = %self.name, error = %e, "failed writing index at shutdown");
            }
        } else {
            drop(guard);
            let _ = std::fs::remove_file(&self.data_path);
            let _ = std::fs::remove_file(&self.index_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &tempfile::TempDir, name: &str, persistent: bool) -> Arc<DiskStore<String, String>> {
        DiskStore::open(dir.path(), name, persistent, true, 0, 0, 1).unwrap()
    }

    #[test]
    fn put_then_get_returns_the_spooled_element_before_the_worker_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "c1", false);
        store.put(Element::new("k".to_string(), Some("v".to_string())));
        let got = store.get(&"k".to_string()).unwrap().unwrap();
        assert_eq!(got.value, Some("v".to_string()));
        store.dispose();
    }

    #[test]
    fn persistence_round_trips_after_dispose_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "persist", true);
        for i in 0..3 {
            store.put(Element::new(format!("k{i}"), Some(format!("v{i}"))));
        }
        // force a flush before dispose so we exercise the data-file path too
        std::thread::sleep(Duration::from_millis(50));
        store.dispose();

        let reopened = open(&dir, "persist", true);
        for i in 0..3 {
            let got = reopened.get(&format!("k{i}")).unwrap().unwrap();
            assert_eq!(got.value, Some(format!("v{i}")));
        }
        reopened.dispose();
    }

    #[test]
    fn crash_without_dispose_yields_empty_store_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "crash", true);
        for i in 0..3 {
            store.put(Element::new(format!("k{i}"), Some(format!("v{i}"))));
        }
        std::thread::sleep(Duration::from_millis(50));
        // Simulate a crash: drop without calling dispose(). Background
        // threads are leaked (by design — no finalizer-based cleanup).
        drop(store);

        let reopened = open(&dir, "crash", true);
        for i in 0..3 {
            assert!(reopened.get(&format!("k{i}")).unwrap().is_none());
        }
        reopened.dispose();
    }

    #[test]
    fn idempotent_dispose_does_no_further_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "dispose-twice", true);
        store.put(Element::new("k".to_string(), Some("v".to_string())));
        store.dispose();
        let index_mtime_1 = std::fs::metadata(dir.path().join("dispose-twice.index"))
            .unwrap()
            .modified()
            .unwrap();
        store.dispose();
        let index_mtime_2 = std::fs::metadata(dir.path().join("dispose-twice.index"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(index_mtime_1, index_mtime_2);
    }

    #[test]
    fn fragmented_block_is_reused_on_same_size_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "frag", false);
        let payload = "x".repeat(100);
        for _ in 0..100 {
            store.put(Element::new("k".to_string(), Some(payload.clone())));
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(50));
        // Same-size rewrites of one key can only ever need two live blocks
        // (the current block and the one it displaced, now free and
        // reusable); the file must never grow anywhere near 100 * 100 bytes.
        assert!(store.file_length() <= 300, "file grew to {}", store.file_length());
        store.dispose();
    }

    #[test]
    fn removed_key_is_no_longer_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "rm", false);
        store.put(Element::new("k".to_string(), Some("v".to_string())));
        std::thread::sleep(Duration::from_millis(50));
        assert!(store.remove(&"k".to_string()));
        assert!(store.get(&"k".to_string()).unwrap().is_none());
        store.dispose();
    }

    #[test]
    fn disk_read_io_fault_is_surfaced_as_an_error_not_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "ioerr", false);
        store.put(Element::new("k".to_string(), Some("v".to_string())));
        std::thread::sleep(Duration::from_millis(50)); // let the spool worker commit to disk
        // Truncate the data file out from under the committed block so the
        // indexed `position`/`payload_size` can no longer be read back whole.
        let data_path = dir.path().join("ioerr.data");
        let truncated = OpenOptions::new().write(true).open(&data_path).unwrap();
        truncated.set_len(0).unwrap();
        drop(truncated);

        let err = store.get(&"k".to_string()).unwrap_err();
        assert!(matches!(err, CacheError::Io(_)));
        store.dispose();
    }
}
