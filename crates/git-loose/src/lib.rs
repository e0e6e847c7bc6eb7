//! Loose object storage: read, write, and enumerate zlib-compressed objects.
//!
//! Each loose object lives at `.git/objects/XX/YYYY...` where `XX` is the first
//! byte of the OID in hex and `YYYY...` is the rest. The file content is
//! zlib-compressed `"<type> <size>\0<content>"`.

mod chunked;
mod compressed;
mod enumerate;
mod rawstore;
mod read;
mod stream;
mod write;

pub use chunked::{ChunkedKvStorage, KeyValueStore, DEFAULT_CHUNK_SIZE};
#[cfg(any(test, feature = "test-support"))]
pub use chunked::InMemoryKv;
pub use compressed::CompressedStorage;
pub use enumerate::LooseObjectIter;
pub use rawstore::{ByteRange, RawStorage, RawStorageError, ShardedFileStorage};
pub use stream::LooseObjectStream;

use git_hash::{HashAlgorithm, ObjectId};
use std::path::{Path, PathBuf};

/// Interface to the loose object directory (`.git/objects/`).
///
/// Built on top of [`CompressedStorage`] wrapping a [`ShardedFileStorage`]
/// rooted at `objects_dir`; the header-only and streaming read paths
/// (`read_header`, `LooseObjectStream`) bypass the generic full-inflate
/// contract for performance, since they only ever need a prefix of the
/// decompressed bytes.
pub struct LooseObjectStore {
    /// Path to the objects directory.
    objects_dir: PathBuf,
    /// Hash algorithm in use.
    hash_algo: HashAlgorithm,
    /// Zlib compression level.
    compression_level: flate2::Compression,
}

impl LooseObjectStore {
    /// Open the loose object store at the given path.
    pub fn open(objects_dir: impl AsRef<Path>, hash_algo: HashAlgorithm) -> Self {
        Self {
            objects_dir: objects_dir.as_ref().to_path_buf(),
            hash_algo,
            compression_level: flate2::Compression::default(),
        }
    }

    /// Set the zlib compression level (0–9).
    pub fn set_compression_level(&mut self, level: u32) {
        self.compression_level = flate2::Compression::new(level);
    }

    /// Get the hash algorithm in use.
    pub fn hash_algo(&self) -> HashAlgorithm {
        self.hash_algo
    }

    /// Get the file path for a given OID.
    pub fn object_path(&self, oid: &ObjectId) -> PathBuf {
        self.objects_dir.join(oid.loose_path())
    }

    /// The `CompressedStorage<ShardedFileStorage>` this store is built on.
    pub fn raw_storage(&self) -> CompressedStorage<ShardedFileStorage> {
        CompressedStorage::with_level(
            ShardedFileStorage::new(&self.objects_dir),
            self.compression_level.level(),
        )
    }
}

/// Errors from loose object operations.
#[derive(Debug, thiserror::Error)]
pub enum LooseError {
    #[error("corrupt loose object {oid}: {reason}")]
    Corrupt { oid: String, reason: String },

    #[error("decompression error for {oid}: {source}")]
    Decompress {
        oid: String,
        #[source]
        source: std::io::Error,
    },

    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("object parse error: {0}")]
    Object(#[from] git_object::ObjectError),

    #[error("hash error: {0}")]
    Hash(#[from] git_hash::HashError),
}
