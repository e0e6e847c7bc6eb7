//! Adapter that zlib-deflates on `store` and inflates on `load`, with
//! range semantics operating in uncompressed space.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::rawstore::{slice_range, ByteRange, RawStorage, RawStorageError};

/// Wraps a [`RawStorage`] and transparently compresses/decompresses its
/// values. `size`/range reads require a full inflate since zlib does not
/// expose a random-access index into the compressed stream.
pub struct CompressedStorage<S: RawStorage> {
    inner: S,
    level: Compression,
}

impl<S: RawStorage> CompressedStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            level: Compression::default(),
        }
    }

    pub fn with_level(inner: S, level: u32) -> Self {
        Self {
            inner,
            level: Compression::new(level),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn decompress(&self, key: &str, compressed: &[u8]) -> Result<Vec<u8>, RawStorageError> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| RawStorageError::CorruptObject {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

impl<S: RawStorage> RawStorage for CompressedStorage<S> {
    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), RawStorageError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder.write_all(bytes)?;
        let compressed = encoder.finish()?;
        self.inner.store(key, &compressed)
    }

    fn load(&self, key: &str, range: Option<ByteRange>) -> Result<Vec<u8>, RawStorageError> {
        let compressed = self.inner.load(key, None)?;
        let decompressed = self.decompress(key, &compressed)?;
        match range {
            None => Ok(decompressed),
            Some(r) => slice_range(&decompressed, key, r),
        }
    }

    fn has(&self, key: &str) -> bool {
        self.inner.has(key)
    }

    fn remove(&self, key: &str) -> Result<bool, RawStorageError> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, RawStorageError> {
        self.inner.keys()
    }

    fn size(&self, key: &str) -> Result<u64, RawStorageError> {
        // Uncompressed length, per contract — not the on-disk byte count.
        let compressed = self.inner.load(key, None)?;
        Ok(self.decompress(key, &compressed)?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rawstore::ShardedFileStorage;

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CompressedStorage::new(ShardedFileStorage::new(dir.path()));
        let key = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        storage.store(key, b"blob 5\0hello").unwrap();
        assert_eq!(storage.load(key, None).unwrap(), b"blob 5\0hello");
        assert_eq!(storage.size(key).unwrap(), 12);
    }

    #[test]
    fn on_disk_bytes_are_smaller_for_compressible_input() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CompressedStorage::new(ShardedFileStorage::new(dir.path()));
        let key = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        let payload = vec![b'a'; 10_000];
        storage.store(key, &payload).unwrap();
        let raw = ShardedFileStorage::new(dir.path());
        let on_disk = raw.load(key, None).unwrap();
        assert!(on_disk.len() < payload.len());
        assert_eq!(storage.load(key, None).unwrap(), payload);
    }

    #[test]
    fn range_read_is_uncompressed_space() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CompressedStorage::new(ShardedFileStorage::new(dir.path()));
        let key = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        storage.store(key, b"0123456789").unwrap();
        let slice = storage
            .load(key, Some(ByteRange { start: 2, end: 5 }))
            .unwrap();
        assert_eq!(slice, b"234");
    }

    #[test]
    fn corrupt_compressed_bytes_surface_as_corrupt_object() {
        let dir = tempfile::tempdir().unwrap();
        let raw = ShardedFileStorage::new(dir.path());
        let key = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        raw.store(key, b"not actually zlib data").unwrap();
        let storage = CompressedStorage::new(ShardedFileStorage::new(dir.path()));
        let err = storage.load(key, None);
        assert!(matches!(err, Err(RawStorageError::CorruptObject { .. })));
    }
}
