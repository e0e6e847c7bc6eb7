//! `RawStorage`: a key → byte-stream map with range reads, and the two
//! concrete shapes used by file-backed and value-size-limited backends.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Errors from the raw storage layer. Distinct from [`crate::LooseError`]:
/// this layer knows nothing about object framing, only bytes under keys.
#[derive(Debug, thiserror::Error)]
pub enum RawStorageError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("invalid range [{start}, {end}) for key {key} of size {size}")]
    InvalidRange {
        key: String,
        start: u64,
        end: u64,
        size: u64,
    },

    #[error("corrupt stored value for key {key}: {reason}")]
    CorruptObject { key: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An inclusive-exclusive byte range for a ranged [`RawStorage::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Key → byte-stream map with range reads.
///
/// Implementations are content-agnostic: keys are opaque strings (in
/// practice, hex object identities), and values are raw bytes with no
/// assumed structure.
pub trait RawStorage: Send + Sync {
    /// Store `bytes` under `key`, replacing any prior value.
    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), RawStorageError>;

    /// Load the bytes at `key`, optionally restricted to `range`.
    ///
    /// Fails with [`RawStorageError::NotFound`] if the key is absent, and
    /// with [`RawStorageError::InvalidRange`] if `range` falls outside
    /// `[0, size(key)]`.
    fn load(&self, key: &str, range: Option<ByteRange>) -> Result<Vec<u8>, RawStorageError>;

    /// Whether `key` is present.
    fn has(&self, key: &str) -> bool;

    /// Remove `key`. Returns whether it was present.
    fn remove(&self, key: &str) -> Result<bool, RawStorageError>;

    /// Enumerate all keys. A backend with no entries yields none, not an
    /// error.
    fn keys(&self) -> Result<Vec<String>, RawStorageError>;

    /// Size in bytes of the value stored at `key`.
    fn size(&self, key: &str) -> Result<u64, RawStorageError>;
}

/// Sharded-file `RawStorage`: keys are 40- or 64-hex identities, split
/// `first2/rest` so that no directory ever holds more than 256th of the
/// total object count.
pub struct ShardedFileStorage {
    root: PathBuf,
}

impl ShardedFileStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The on-disk path for `key`, split into its two-char shard and the
    /// remainder, without checking whether the key is well-formed hex
    /// (non-hex keys simply end up in an odd-looking but valid path).
    pub fn path_for(&self, key: &str) -> PathBuf {
        if key.len() >= 2 {
            self.root.join(&key[..2]).join(&key[2..])
        } else {
            self.root.join(key)
        }
    }

    fn shard_dir_pattern(name: &str) -> bool {
        name.len() == 2 && name.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl RawStorage for ShardedFileStorage {
    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), RawStorageError> {
        let path = self.path_for(key);
        let Some(parent) = path.parent() else {
            return Err(RawStorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty key",
            )));
        };
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        match tmp.persist(&path) {
            Ok(_) => Ok(()),
            Err(e) if path.is_file() => {
                // Another writer raced us to the same content-addressed
                // key; the existing file is byte-identical by
                // construction, so the race is harmless.
                drop(e);
                Ok(())
            }
            Err(e) => Err(RawStorageError::Io(e.error)),
        }
    }

    fn load(&self, key: &str, range: Option<ByteRange>) -> Result<Vec<u8>, RawStorageError> {
        let path = self.path_for(key);
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RawStorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(RawStorageError::Io(e)),
        };

        match range {
            None => Ok(data),
            Some(r) => slice_range(&data, key, r),
        }
    }

    fn has(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    fn remove(&self, key: &str) -> Result<bool, RawStorageError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RawStorageError::Io(e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, RawStorageError> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(RawStorageError::Io(e)),
        };

        let mut shard_dirs: Vec<_> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| Self::shard_dir_pattern(name))
            .collect();
        shard_dirs.sort();

        for shard in shard_dirs {
            let shard_path = self.root.join(&shard);
            let mut names: Vec<_> = fs::read_dir(&shard_path)?
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.bytes().all(|b| b.is_ascii_hexdigit()))
                .collect();
            names.sort();
            for rest in names {
                out.push(format!("{shard}{rest}"));
            }
        }
        Ok(out)
    }

    fn size(&self, key: &str) -> Result<u64, RawStorageError> {
        let path = self.path_for(key);
        match fs::metadata(&path) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RawStorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(RawStorageError::Io(e)),
        }
    }
}

pub(crate) fn slice_range(
    data: &[u8],
    key: &str,
    range: ByteRange,
) -> Result<Vec<u8>, RawStorageError> {
    let size = data.len() as u64;
    if range.start > range.end || range.end > size {
        return Err(RawStorageError::InvalidRange {
            key: key.to_string(),
            start: range.start,
            end: range.end,
            size,
        });
    }
    Ok(data[range.start as usize..range.end as usize].to_vec())
}
