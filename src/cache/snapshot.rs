//! Best-effort cache snapshots to an external key-value store.
//!
//! After every successful insert the cache writes its entry count, the
//! touched entry's metadata, and the whole embedding matrix as one raw
//! little-endian f32 blob. On construction it attempts the reverse:
//! count, blob, then per-entry metadata. Partial restoration (count
//! without blob, blob with the wrong shape, an unreadable entry) resets
//! to an empty cache rather than a half-loaded one — state is truth in
//! RAM and the snapshot is strictly best-effort.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::{MimirError, Result};

/// Key under which the active entry count is stored (ASCII integer).
pub const COUNT_KEY: &str = "soa_cache:count";

/// Key under which the raw embedding matrix blob is stored.
pub const EMBEDDINGS_KEY: &str = "soa_cache:embeddings";

/// Key for the JSON metadata of the entry at slot `i`.
pub fn entry_key(i: usize) -> String {
    format!("soa_cache:entry:{i}")
}

/// Minimal byte-oriented KV store the cache snapshots into.
///
/// Deliberately synchronous and infallible-on-shape: the cache treats
/// every error as `snapshot_io_failed` (logged, never fatal).
pub trait SnapshotStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, overwriting any previous value.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Serialize an f32 matrix as a little-endian byte blob.
pub(crate) fn encode_matrix(matrix: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(matrix.len() * 4);
    for v in matrix {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a little-endian f32 blob, rejecting unexpected shapes.
///
/// Returns `None` when the byte length does not correspond to exactly
/// `expected_len` floats.
pub(crate) fn decode_matrix(bytes: &[u8], expected_len: usize) -> Option<Vec<f32>> {
    if bytes.len() != expected_len * 4 {
        return None;
    }
    let mut out = Vec::with_capacity(expected_len);
    for chunk in bytes.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Some(out)
}

/// Filesystem-backed snapshot store.
///
/// Each key maps to one file under the store directory, with `:`
/// replaced by `.` to stay path-safe.
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key.replace(':', "."))
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MimirError::SnapshotIo(e.to_string())),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        fs::write(self.path_for(key), value)?;
        Ok(())
    }
}

/// In-memory snapshot store.
///
/// Useful in tests and as a stand-in when no external KV is deployed.
#[derive(Default)]
pub struct MemorySnapshotStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.lock().expect("snapshot map poisoned").get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map
            .lock()
            .expect("snapshot map poisoned")
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_round_trip() {
        let matrix = vec![0.0f32, 1.5, -2.25, f32::MIN_POSITIVE];
        let bytes = encode_matrix(&matrix);
        assert_eq!(decode_matrix(&bytes, 4), Some(matrix));
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let bytes = encode_matrix(&[1.0, 2.0, 3.0]);
        assert_eq!(decode_matrix(&bytes, 4), None);
        assert_eq!(decode_matrix(&bytes[..10], 3), None);
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySnapshotStore::new();
        assert_eq!(store.get("missing").unwrap(), None);
        store.put(COUNT_KEY, b"7").unwrap();
        assert_eq!(store.get(COUNT_KEY).unwrap(), Some(b"7".to_vec()));
    }

    #[test]
    fn entry_key_format() {
        assert_eq!(entry_key(3), "soa_cache:entry:3");
    }
}
