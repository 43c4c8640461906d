//! Spill manager for join build partitions.
//!
//! Segments are JSON-serialized records prefixed by a small header and
//! protected by a BLAKE3 checksum verified on read.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"QPSG";
const HEADER_LEN: usize = 4 + 8 + 8;

/// Where segment bytes live.
pub trait SpillStore: Send + Sync {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;

    fn get(&self, name: &str) -> Result<Vec<u8>>;

    /// Idempotent.
    fn delete(&self, name: &str) -> Result<()>;

    fn list(&self) -> Result<Vec<String>>;
}

/// Process-local store; the default for engines without a spill directory.
#[derive(Debug, Default)]
pub struct MemorySpillStore {
    segments: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySpillStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpillStore for MemorySpillStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.segments.lock().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.segments
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SegmentMissing(name.to_string()))
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.segments.lock().remove(name);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.segments.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Local filesystem store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsSpillStore {
    root: PathBuf,
}

impl FsSpillStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.seg"))
    }
}

impl SpillStore for FsSpillStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        std::fs::write(self.path(name), bytes)?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        match std::fs::read(self.path(name)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::SegmentMissing(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            if let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".seg")) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Metadata for one written segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMeta {
    pub name: String,
    pub records: u64,
    pub payload_len: u64,
    pub checksum: [u8; 32],
}

/// Writes and reads checksummed record segments.
pub struct SpillManager {
    store: Box<dyn SpillStore>,
    prefix: String,
    next_segment: AtomicU64,
    bytes_written: AtomicU64,
}

impl SpillManager {
    pub fn new(store: Box<dyn SpillStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            next_segment: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self::new(Box::new(MemorySpillStore::new()), prefix)
    }

    /// Serialize `records` into a new segment.
    pub fn write_segment<T: Serialize>(&self, records: &[T]) -> Result<SegmentMeta> {
        let payload =
            serde_json::to_vec(records).map_err(|e| Error::Codec(format!("serialize: {e}")))?;

        let mut segment = Vec::with_capacity(HEADER_LEN + payload.len());
        segment.extend_from_slice(MAGIC);
        segment.extend_from_slice(&(records.len() as u64).to_le_bytes());
        segment.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        segment.extend_from_slice(&payload);

        let checksum: [u8; 32] = blake3::hash(&segment).into();
        let seq = self.next_segment.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{:06}", self.prefix, seq);

        self.store.put(&name, &segment)?;
        self.bytes_written
            .fetch_add(segment.len() as u64, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        tracing::debug!(segment = %name, records = records.len(), bytes = segment.len(), "spilled segment");

        Ok(SegmentMeta {
            name,
            records: records.len() as u64,
            payload_len: payload.len() as u64,
            checksum,
        })
    }

    /// Read a segment back, verifying header and checksum.
    pub fn read_segment<T: DeserializeOwned>(&self, meta: &SegmentMeta) -> Result<Vec<T>> {
        let segment = self.store.get(&meta.name)?;
        if segment.len() < HEADER_LEN || &segment[..4] != MAGIC {
            return Err(Error::Codec(format!("segment '{}' has no valid header", meta.name)));
        }
        let computed: [u8; 32] = blake3::hash(&segment).into();
        if computed != meta.checksum {
            return Err(Error::ChecksumMismatch(meta.name.clone()));
        }

        let payload_len = read_u64(&segment[12..20]) as usize;
        let payload = &segment[HEADER_LEN..];
        if payload.len() != payload_len {
            return Err(Error::Codec(format!(
                "segment '{}' payload length {} != header {}",
                meta.name,
                payload.len(),
                payload_len
            )));
        }

        serde_json::from_slice(payload).map_err(|e| Error::Codec(format!("deserialize: {e}")))
    }

    pub fn delete_segment(&self, meta: &SegmentMeta) -> Result<()> {
        self.store.delete(&meta.name)
    }

    pub fn list_segments(&self) -> Result<Vec<String>> {
        self.store.list()
    }

    /// Total bytes written through this manager.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_read_back_what_was_written() {
        let mgr = SpillManager::in_memory("hj");
        let meta = mgr.write_segment(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(meta.records, 2);
        let back: Vec<String> = mgr.read_segment(&meta).unwrap();
        assert_eq!(back, vec!["a", "b"]);
        assert_eq!(mgr.list_segments().unwrap(), vec![meta.name.clone()]);

        mgr.delete_segment(&meta).unwrap();
        assert!(matches!(
            mgr.read_segment::<String>(&meta),
            Err(Error::SegmentMissing(_))
        ));
    }

    #[test]
    fn corrupted_segment_fails_checksum() {
        let store = MemorySpillStore::new();
        let mgr = SpillManager::new(Box::new(store), "hj");
        let mut meta = mgr.write_segment(&[1u64, 2, 3]).unwrap();
        meta.checksum[0] ^= 0xFF;
        assert!(matches!(
            mgr.read_segment::<u64>(&meta),
            Err(Error::ChecksumMismatch(_))
        ));
    }

    #[test]
    fn filesystem_store_round_trips_and_lists() {
        let dir = std::env::temp_dir().join(format!("qplan-spill-test-{}", std::process::id()));
        let store = FsSpillStore::new(&dir).unwrap();
        store.put("x-000001", b"hello").unwrap();
        assert_eq!(store.get("x-000001").unwrap(), b"hello");
        assert_eq!(store.list().unwrap(), vec!["x-000001".to_string()]);
        store.delete("x-000001").unwrap();
        store.delete("x-000001").unwrap();
        assert!(matches!(store.get("x-000001"), Err(Error::SegmentMissing(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
