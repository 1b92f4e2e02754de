//! The on-disk index: `{name}.index` holds the `elements` map and the
//! reusable-block `free_list` together, framed so corruption is detectable
//! .

use crate::error::{CacheError, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::path::Path;

/// 8-byte framing magic written at the head of every index file. A mismatch
/// (including a zero-length/missing file) is treated as corruption and
/// recovered by resetting to an empty index.
const MAGIC: &[u8; 8] = b"TCIDX001";

/// One index entry: where an element's bytes live in the data file and how
/// large the allocation is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiskElement {
    /// Byte offset of the allocated block in the data file.
    pub position: u64,
    /// Length of the allocated block; always `>= payload_size`.
    pub block_size: u64,
    /// Currently valid bytes within the block. `0` means the block is free.
    pub payload_size: u64,
    /// Absolute expiry time, milliseconds since epoch. [`EXPIRY_ETERNAL`]
    /// (`i64::MAX`) for an eternal element.
    ///
    /// [`EXPIRY_ETERNAL`]: crate::expiry::EXPIRY_ETERNAL
    pub expiry_time: i64,
}

impl DiskElement {
    /// `true` if this entry has been freed and is available for reuse.
    pub fn is_free(&self) -> bool {
        self.payload_size == 0
    }
}

/// The wire shape of `{name}.index`: elements map plus the ordered free
/// list, serialized together with `bincode` behind the [`MAGIC`] prefix.
#[derive(Serialize, Deserialize)]
struct IndexFile<K: Eq + Hash> {
    elements: HashMap<K, DiskElement>,
    free_list: Vec<DiskElement>,
}

/// Read and validate `{name}.index`. Any failure — missing file, bad magic,
/// or a `bincode` decode error — is surfaced as [`CacheError::Corruption`];
/// callers must treat that uniformly as "reset to empty and delete the data
/// file" uniformly, never propagate it further.
pub fn read_index<K>(path: &Path) -> Result<(HashMap<K, DiskElement>, Vec<DiskElement>)>
where
    K: DeserializeOwned + Eq + Hash,
{
    let bytes = std::fs::read(path).map_err(|e| CacheError::Corruption {
        detail: format!("cannot read index file: {e}"),
    })?;
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(CacheError::Corruption {
            detail: "index file missing or has a bad magic prefix".to_string(),
        });
    }
    let decoded: IndexFile<K> =
        bincode::deserialize(&bytes[MAGIC.len()..]).map_err(|e| CacheError::Corruption {
            detail: format!("index payload failed to decode: {e}"),
        })?;
    Ok((decoded.elements, decoded.free_list))
}

/// Serialize `elements`/`free_list` and write them to `path`, replacing any
/// existing file. Used both to write a fresh empty index at startup, as a
/// crash-safety step, and to persist the real index at clean shutdown.
pub fn write_index<K>(
    path: &Path,
    elements: &HashMap<K, DiskElement>,
    free_list: &[DiskElement],
) -> Result<()>
where
    K: Serialize + Eq + Hash + Clone,
{
    let file = IndexFileRef {
        elements,
        free_list,
    };
    let payload = bincode::serialize(&file)?;
    let mut buf = Vec::with_capacity(MAGIC.len() + payload.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&payload);
    std::fs::write(path, buf)?;
    Ok(())
}

/// Borrowing counterpart of [`IndexFile`] so [`write_index`] doesn't need to
/// clone the live elements map just to serialize it.
#[derive(Serialize)]
struct IndexFileRef<'a, K: Eq + Hash> {
    elements: &'a HashMap<K, DiskElement>,
    free_list: &'a [DiskElement],
}
