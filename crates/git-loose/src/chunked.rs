//! Chunked storage for `RawStorage` backends with per-value size limits
//! (SQL/KV stores). Large values are split into fixed-size chunks plus a
//! trailing meta record written last, so a reader can never observe a
//! partially-written value as present.

use crate::rawstore::{ByteRange, RawStorage, RawStorageError};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Minimal key-value primitive a chunked backend sits on top of. Unlike
/// [`RawStorage`] this makes no promises about range reads or
/// enumeration order — only point get/put/delete and prefix scan, which
/// is what SQL/KV backends with per-row size limits typically offer.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), RawStorageError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RawStorageError>;
    fn delete(&self, key: &str) -> Result<bool, RawStorageError>;
    /// All keys sharing `prefix`, in unspecified order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RawStorageError>;
}

#[derive(Debug, Clone, Copy)]
struct ChunkMeta {
    total_size: u64,
    chunk_count: u64,
    chunk_size: u64,
}

impl ChunkMeta {
    fn to_bytes(self) -> [u8; 24] {
        let mut buf = [0u8; 24];
        buf[0..8].copy_from_slice(&self.total_size.to_be_bytes());
        buf[8..16].copy_from_slice(&self.chunk_count.to_be_bytes());
        buf[16..24].copy_from_slice(&self.chunk_size.to_be_bytes());
        buf
    }

    fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self, RawStorageError> {
        if bytes.len() != 24 {
            return Err(RawStorageError::CorruptObject {
                key: key.to_string(),
                reason: format!("meta record has {} bytes, expected 24", bytes.len()),
            });
        }
        let total_size = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let chunk_count = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
        let chunk_size = u64::from_be_bytes(bytes[16..24].try_into().unwrap());
        Ok(Self {
            total_size,
            chunk_count,
            chunk_size,
        })
    }
}

fn meta_key(key: &str) -> String {
    format!("{key}:meta")
}

fn chunk_key(key: &str, index: u64) -> String {
    format!("{key}:chunk:{index}")
}

/// `RawStorage` over a size-limited [`KeyValueStore`], splitting values
/// into chunks of `chunk_size` bytes.
pub struct ChunkedKvStorage<B: KeyValueStore> {
    backend: B,
    chunk_size: usize,
}

impl<B: KeyValueStore> ChunkedKvStorage<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(backend: B, chunk_size: usize) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.max(1),
        }
    }

    fn read_meta(&self, key: &str) -> Result<Option<ChunkMeta>, RawStorageError> {
        match self.backend.get(&meta_key(key))? {
            Some(bytes) => Ok(Some(ChunkMeta::from_bytes(key, &bytes)?)),
            None => Ok(None),
        }
    }
}

impl<B: KeyValueStore> RawStorage for ChunkedKvStorage<B> {
    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), RawStorageError> {
        // Drop any prior meta and chunks first so a reader never sees a
        // meta record paired with chunks from a previous write.
        if let Some(old) = self.read_meta(key)? {
            self.backend.delete(&meta_key(key))?;
            for i in 0..old.chunk_count {
                self.backend.delete(&chunk_key(key, i))?;
            }
        }

        let chunk_size = self.chunk_size;
        let chunk_count = if bytes.is_empty() {
            0
        } else {
            bytes.len().div_ceil(chunk_size)
        };

        for i in 0..chunk_count {
            let start = i * chunk_size;
            let end = (start + chunk_size).min(bytes.len());
            self.backend.put(&chunk_key(key, i as u64), &bytes[start..end])?;
        }

        let meta = ChunkMeta {
            total_size: bytes.len() as u64,
            chunk_count: chunk_count as u64,
            chunk_size: chunk_size as u64,
        };
        self.backend.put(&meta_key(key), &meta.to_bytes())?;
        Ok(())
    }

    fn load(&self, key: &str, range: Option<ByteRange>) -> Result<Vec<u8>, RawStorageError> {
        let meta = self
            .read_meta(key)?
            .ok_or_else(|| RawStorageError::NotFound(key.to_string()))?;

        let (want_start, want_end) = match range {
            Some(r) => (r.start, r.end),
            None => (0, meta.total_size),
        };
        if want_start > want_end || want_end > meta.total_size {
            return Err(RawStorageError::InvalidRange {
                key: key.to_string(),
                start: want_start,
                end: want_end,
                size: meta.total_size,
            });
        }

        let chunk_size = meta.chunk_size.max(1);
        let start_chunk = want_start / chunk_size;
        let end_chunk = if want_end == want_start {
            start_chunk
        } else {
            (want_end - 1) / chunk_size
        };

        let mut out = Vec::with_capacity((want_end - want_start) as usize);
        for i in start_chunk..=end_chunk.max(start_chunk) {
            if i >= meta.chunk_count {
                break;
            }
            let chunk = self
                .backend
                .get(&chunk_key(key, i))?
                .ok_or_else(|| RawStorageError::CorruptObject {
                    key: key.to_string(),
                    reason: format!("missing chunk {i}"),
                })?;

            let chunk_start_offset = i * chunk_size;
            let lo = want_start.max(chunk_start_offset) - chunk_start_offset;
            let hi = want_end.min(chunk_start_offset + chunk.len() as u64) - chunk_start_offset;
            if lo < hi {
                out.extend_from_slice(&chunk[lo as usize..hi as usize]);
            }
            if want_end <= chunk_start_offset + chunk.len() as u64 {
                break;
            }
        }
        Ok(out)
    }

    fn has(&self, key: &str) -> bool {
        matches!(self.backend.get(&meta_key(key)), Ok(Some(_)))
    }

    fn remove(&self, key: &str) -> Result<bool, RawStorageError> {
        match self.read_meta(key)? {
            None => Ok(false),
            Some(meta) => {
                for i in 0..meta.chunk_count {
                    self.backend.delete(&chunk_key(key, i))?;
                }
                self.backend.delete(&meta_key(key))?;
                Ok(true)
            }
        }
    }

    fn keys(&self) -> Result<Vec<String>, RawStorageError> {
        let mut out = Vec::new();
        for meta_name in self.backend.keys_with_prefix("")? {
            if let Some(key) = meta_name.strip_suffix(":meta") {
                out.push(key.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    fn size(&self, key: &str) -> Result<u64, RawStorageError> {
        self.read_meta(key)?
            .map(|m| m.total_size)
            .ok_or_else(|| RawStorageError::NotFound(key.to_string()))
    }
}

/// In-memory [`KeyValueStore`] used by tests and by callers with no real
/// size-limited backend at hand.
#[cfg(any(test, feature = "test-support"))]
pub struct InMemoryKv {
    map: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

#[cfg(any(test, feature = "test-support"))]
impl Default for InMemoryKv {
    fn default() -> Self {
        Self {
            map: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl KeyValueStore for InMemoryKv {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), RawStorageError> {
        self.map.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RawStorageError> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, RawStorageError> {
        Ok(self.map.lock().unwrap().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RawStorageError> {
        Ok(self
            .map
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ChunkedKvStorage<InMemoryKv> {
        ChunkedKvStorage::with_chunk_size(InMemoryKv::default(), 4)
    }

    #[test]
    fn store_and_load_roundtrip_small() {
        let s = store();
        s.store("k1", b"hello world!").unwrap();
        assert_eq!(s.load("k1", None).unwrap(), b"hello world!");
        assert_eq!(s.size("k1").unwrap(), 12);
    }

    #[test]
    fn store_empty_value() {
        let s = store();
        s.store("k1", b"").unwrap();
        assert!(s.has("k1"));
        assert_eq!(s.load("k1", None).unwrap(), b"");
    }

    #[test]
    fn range_spanning_multiple_chunks() {
        let s = store();
        s.store("k1", b"0123456789abcdef").unwrap(); // 4 chunks of size 4
        let slice = s.load("k1", Some(ByteRange { start: 3, end: 10 })).unwrap();
        assert_eq!(slice, b"3456789");
    }

    #[test]
    fn rewrite_drops_old_chunks() {
        let s = store();
        s.store("k1", b"0123456789abcdef").unwrap();
        s.store("k1", b"short").unwrap();
        assert_eq!(s.load("k1", None).unwrap(), b"short");
        // old chunk 3 (index 3) must be gone, not leak into a new read
        assert!(s.backend.get(&chunk_key("k1", 3)).unwrap().is_none());
    }

    #[test]
    fn missing_key() {
        let s = store();
        assert!(matches!(
            s.load("absent", None),
            Err(RawStorageError::NotFound(_))
        ));
    }

    #[test]
    fn out_of_range() {
        let s = store();
        s.store("k1", b"0123456789").unwrap();
        assert!(matches!(
            s.load("k1", Some(ByteRange { start: 0, end: 100 })),
            Err(RawStorageError::InvalidRange { .. })
        ));
    }

    #[test]
    fn remove_and_keys() {
        let s = store();
        s.store("k1", b"aaaa").unwrap();
        s.store("k2", b"bbbb").unwrap();
        let mut keys = s.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
        assert!(s.remove("k1").unwrap());
        assert!(!s.has("k1"));
        assert_eq!(s.keys().unwrap(), vec!["k2".to_string()]);
    }
}
