//! `PackDeltaStore`: a `DeltaStore` implementation over pack files, backed
//! by a sidecar metadata index recording each delta's base, pack location,
//! depth, and sizes (§4.9).
//!
//! The sidecar is the source of truth for `isDelta`/`getDeltaChainInfo`: it
//! lets those queries answer without re-parsing pack entries. Physical
//! delta bytes still live in the pack; `removeDelta` only drops the sidecar
//! entry, matching §4.9 ("physical pack bytes are reclaimed only by
//! consolidation").

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use git_hash::ObjectId;
use git_object::ObjectType;

use crate::delta::{parse_delta_instructions, DeltaInstruction};
use crate::pack::PackFile;
use crate::write::{DeltaMetadata, PendingPack, PendingPackFlush, PendingPackOptions};
use crate::{PackEntryType, PackError};

/// Default bound on delta chain depth, matching §4.9 / §3 invariant 3.
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 50;

/// One link in a delta chain, innermost (the queried object) first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub oid: ObjectId,
    pub base: ObjectId,
    pub depth: usize,
    pub compressed_size: usize,
    pub original_size: usize,
}

/// Result of `getDeltaChainInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaChainInfo {
    pub base_oid: ObjectId,
    pub depth: usize,
    pub original_size: usize,
    pub compressed_size: usize,
    pub chain: Vec<ChainLink>,
}

/// Result of `loadDelta`: the decoded instruction stream plus the
/// compression ratio recorded when the delta was written.
#[derive(Debug, Clone)]
pub struct LoadedDelta {
    pub base_oid: ObjectId,
    pub instructions: Vec<DeltaInstruction>,
    pub ratio: f64,
}

#[derive(Debug, Clone)]
struct SidecarEntry {
    base: ObjectId,
    pack_name: String,
    offset: u64,
    depth: usize,
    compressed_size: usize,
    original_size: usize,
}

impl SidecarEntry {
    fn from_metadata(m: &DeltaMetadata) -> Self {
        Self {
            base: m.base,
            pack_name: m.pack_name.clone(),
            offset: m.offset,
            depth: m.depth,
            compressed_size: m.compressed_size,
            original_size: m.original_size,
        }
    }

    fn format_line(target: &ObjectId, e: &SidecarEntry) -> String {
        format!(
            "{} {} {} {} {} {} {}\n",
            target.to_hex(),
            e.base.to_hex(),
            e.pack_name,
            e.offset,
            e.depth,
            e.compressed_size,
            e.original_size,
        )
    }

    fn parse_line(line: &str) -> Option<(ObjectId, SidecarEntry)> {
        let mut parts = line.split_whitespace();
        let target = ObjectId::from_hex(parts.next()?).ok()?;
        let base = ObjectId::from_hex(parts.next()?).ok()?;
        let pack_name = parts.next()?.to_string();
        let offset: u64 = parts.next()?.parse().ok()?;
        let depth: usize = parts.next()?.parse().ok()?;
        let compressed_size: usize = parts.next()?.parse().ok()?;
        let original_size: usize = parts.next()?.parse().ok()?;
        Some((
            target,
            SidecarEntry {
                base,
                pack_name,
                offset,
                depth,
                compressed_size,
                original_size,
            },
        ))
    }
}

/// `DeltaStore` over a pack directory: a queryable sidecar index keyed by
/// target OID, layered on top of whatever `.pack`/`.idx` files are already
/// there.
pub struct PackDeltaStore {
    pack_dir: PathBuf,
    sidecar_path: PathBuf,
    max_chain_depth: usize,
    index: RwLock<HashMap<ObjectId, SidecarEntry>>,
    packs: RwLock<HashMap<String, PackFile>>,
}

impl PackDeltaStore {
    /// Open (or create) a delta store rooted at `pack_dir`, loading any
    /// existing sidecar metadata.
    pub fn open(pack_dir: impl AsRef<Path>) -> Result<Self, PackError> {
        let pack_dir = pack_dir.as_ref().to_path_buf();
        fs::create_dir_all(&pack_dir)?;
        let sidecar_path = pack_dir.join("deltas.meta");
        let index = Self::load_sidecar(&sidecar_path)?;
        Ok(Self {
            pack_dir,
            sidecar_path,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            index: RwLock::new(index),
            packs: RwLock::new(HashMap::new()),
        })
    }

    /// Override the maximum chain depth walked by `getDeltaChainInfo`
    /// (default [`DEFAULT_MAX_CHAIN_DEPTH`]).
    pub fn set_max_chain_depth(&mut self, depth: usize) {
        self.max_chain_depth = depth;
    }

    fn load_sidecar(path: &Path) -> Result<HashMap<ObjectId, SidecarEntry>, PackError> {
        let mut out = HashMap::new();
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some((target, entry)) = SidecarEntry::parse_line(&line) {
                out.insert(target, entry);
            }
        }
        Ok(out)
    }

    /// Persist the sidecar index to disk. Called on every `close()` of a
    /// batch (§5: "on `close()` the final state is persisted before
    /// returning"); callers doing many small batches may prefer to debounce
    /// this themselves.
    fn save_sidecar(&self) -> Result<(), PackError> {
        let index = self.index.read().unwrap();
        let tmp_path = self.sidecar_path.with_extension("meta.tmp");
        let mut out = String::new();
        let mut entries: Vec<_> = index.iter().collect();
        entries.sort_by_key(|(oid, _)| **oid);
        for (target, entry) in entries {
            out.push_str(&SidecarEntry::format_line(target, entry));
        }
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(out.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &self.sidecar_path)?;
        Ok(())
    }

    /// Start a batch of object/delta stores, committed atomically on
    /// `close()`.
    pub fn start_update(&self) -> DeltaUpdateBatch<'_> {
        DeltaUpdateBatch {
            store: self,
            pending: PendingPack::new(PendingPackOptions::default()),
        }
    }

    /// Whether `key`'s sidecar entry marks it as stored as a delta.
    pub fn is_delta(&self, key: &ObjectId) -> bool {
        self.index.read().unwrap().contains_key(key)
    }

    fn pack_file_for(&self, pack_name: &str) -> Result<(), PackError> {
        let mut packs = self.packs.write().unwrap();
        if !packs.contains_key(pack_name) {
            let pack_path = self.pack_dir.join(format!("{pack_name}.pack"));
            let pack = PackFile::open(&pack_path)?;
            packs.insert(pack_name.to_string(), pack);
        }
        Ok(())
    }

    /// Load the stored delta instructions for `key`, if it is a delta.
    ///
    /// If a batch for this store is still pending (not yet flushed), the
    /// caller is responsible for flushing it first — this store only
    /// queries already-published packs.
    pub fn load_delta(&self, key: &ObjectId) -> Result<Option<LoadedDelta>, PackError> {
        let entry = match self.index.read().unwrap().get(key).cloned() {
            Some(e) => e,
            None => return Ok(None),
        };

        self.pack_file_for(&entry.pack_name)?;
        let packs = self.packs.read().unwrap();
        let pack = packs.get(&entry.pack_name).expect("just opened");

        let (pack_entry, raw) = pack.read_raw_entry_at_offset(entry.offset)?;
        let base_oid = match pack_entry.entry_type {
            PackEntryType::RefDelta { base_oid } => base_oid,
            PackEntryType::OfsDelta { .. } => entry.base,
            _ => {
                return Err(PackError::InvalidDelta {
                    offset: entry.offset,
                    reason: "sidecar points at a non-delta entry".into(),
                })
            }
        };

        let (_source_size, target_size, instructions) = parse_delta_instructions(&raw)?;
        let ratio = if target_size == 0 {
            1.0
        } else {
            entry.compressed_size as f64 / target_size as f64
        };

        Ok(Some(LoadedDelta {
            base_oid,
            instructions,
            ratio,
        }))
    }

    /// Walk the sidecar chain starting at `key`, stopping at a non-delta
    /// base, a missing entry, or `max_chain_depth`.
    pub fn get_delta_chain_info(&self, key: &ObjectId) -> Result<Option<DeltaChainInfo>, PackError> {
        let index = self.index.read().unwrap();
        let mut entry = match index.get(key) {
            Some(e) => e,
            None => return Ok(None),
        };

        let first = entry;
        let mut chain = Vec::new();
        let mut cur = *key;
        let mut walked = 0usize;

        loop {
            chain.push(ChainLink {
                oid: cur,
                base: entry.base,
                depth: entry.depth,
                compressed_size: entry.compressed_size,
                original_size: entry.original_size,
            });

            walked += 1;
            if walked > self.max_chain_depth {
                break;
            }

            match index.get(&entry.base) {
                Some(next) => {
                    cur = entry.base;
                    entry = next;
                }
                None => break,
            }
        }

        let base_oid = chain.last().map(|l| l.base).unwrap_or(first.base);

        Ok(Some(DeltaChainInfo {
            base_oid,
            depth: first.depth,
            original_size: first.original_size,
            compressed_size: first.compressed_size,
            chain,
        }))
    }

    /// Remove the sidecar entry for `key`. Returns `true` if one existed.
    ///
    /// Physical pack bytes are left untouched; only consolidation
    /// (repack/GC) reclaims them. If `keep_as_base` is true and some other
    /// delta still chains to `key`, this is still safe to call — those
    /// chains simply stop resolving through the sidecar and the consumer
    /// must treat `key` as a full object going forward.
    pub fn remove_delta(&self, key: &ObjectId, _keep_as_base: bool) -> Result<bool, PackError> {
        let removed = self.index.write().unwrap().remove(key).is_some();
        if removed {
            self.save_sidecar()?;
        }
        Ok(removed)
    }

    /// Path to the pack directory this store is rooted at.
    pub fn pack_dir(&self) -> &Path {
        &self.pack_dir
    }
}

/// A single batch of `storeObject`/`storeDelta` calls, committed atomically
/// when [`DeltaUpdateBatch::close`] flushes the underlying [`PendingPack`].
pub struct DeltaUpdateBatch<'a> {
    store: &'a PackDeltaStore,
    pending: PendingPack,
}

impl<'a> DeltaUpdateBatch<'a> {
    /// Accumulate a whole (non-delta) object.
    pub fn store_object(&mut self, obj_type: ObjectType, bytes: Vec<u8>) -> Result<ObjectId, PackError> {
        self.pending.add_object(obj_type, bytes)
    }

    /// Accumulate a delta against `base_key`, reconstructing to `target_key`.
    pub fn store_delta(
        &mut self,
        base_key: ObjectId,
        target_key: ObjectId,
        delta: &[u8],
        original_size: usize,
    ) {
        self.pending
            .add_delta(base_key, target_key, delta.to_vec(), original_size);
    }

    /// Number of objects/deltas accumulated so far.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the batch has crossed a flush threshold (§4.7).
    pub fn should_flush(&self) -> bool {
        self.pending.should_flush()
    }

    /// Flush the batch to a new pack+index, merge the resulting delta
    /// metadata into the sidecar, and persist it before returning.
    pub fn close(self) -> Result<PendingPackFlush, PackError> {
        if self.pending.is_empty() {
            return Ok(PendingPackFlush {
                pack_path: self.store.pack_dir.clone(),
                idx_path: self.store.pack_dir.clone(),
                checksum: ObjectId::from_bytes(
                    &[0u8; 20],
                    git_hash::HashAlgorithm::Sha1,
                )
                .expect("zero oid is always valid"),
                deltas: Vec::new(),
            });
        }

        let name = format!("{:x}", std::process::id())
            + "-"
            + &self.pending.len().to_string();
        let flush = self.pending.flush(&self.store.pack_dir, &name)?;

        {
            let mut index = self.store.index.write().unwrap();
            for d in &flush.deltas {
                index.insert(d.target, SidecarEntry::from_metadata(d));
            }
        }
        self.store.save_sidecar()?;
        self.store.packs.write().unwrap().clear();

        Ok(flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git_hash::hasher::Hasher;
    use git_hash::HashAlgorithm;

    #[test]
    fn store_delta_then_query_chain_info() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackDeltaStore::open(dir.path()).unwrap();

        let base = b"Hello, this is the base content for our delta test!";
        let target = b"Hello, this is the modified content for our delta test!";

        let mut batch = store.start_update();
        let base_oid = batch.store_object(ObjectType::Blob, base.to_vec()).unwrap();
        let target_oid = Hasher::hash_object(HashAlgorithm::Sha1, "blob", target).unwrap();
        let delta = crate::delta::compute::compute_delta(base, target);
        batch.store_delta(base_oid, target_oid, &delta, target.len());
        let flush = batch.close().unwrap();
        assert_eq!(flush.deltas.len(), 1);

        assert!(store.is_delta(&target_oid));
        assert!(!store.is_delta(&base_oid));

        let loaded = store.load_delta(&target_oid).unwrap().unwrap();
        assert_eq!(loaded.base_oid, base_oid);
        assert!(loaded.ratio > 0.0);

        let applied = crate::delta::apply::apply_delta(
            base,
            &crate::delta::compute::compute_delta(base, target),
        )
        .unwrap();
        assert_eq!(applied, target.to_vec());

        let info = store.get_delta_chain_info(&target_oid).unwrap().unwrap();
        assert_eq!(info.base_oid, base_oid);
        assert_eq!(info.depth, 1);
        assert_eq!(info.chain.len(), 1);
    }

    #[test]
    fn sidecar_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let target_oid;
        let base_oid;
        {
            let store = PackDeltaStore::open(dir.path()).unwrap();
            let base = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
            let target = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabb";
            let mut batch = store.start_update();
            base_oid = batch.store_object(ObjectType::Blob, base.to_vec()).unwrap();
            target_oid = Hasher::hash_object(HashAlgorithm::Sha1, "blob", target).unwrap();
            let delta = crate::delta::compute::compute_delta(base, target);
            batch.store_delta(base_oid, target_oid, &delta, target.len());
            batch.close().unwrap();
        }

        let reopened = PackDeltaStore::open(dir.path()).unwrap();
        assert!(reopened.is_delta(&target_oid));
        let info = reopened.get_delta_chain_info(&target_oid).unwrap().unwrap();
        assert_eq!(info.base_oid, base_oid);
    }

    #[test]
    fn remove_delta_drops_sidecar_entry_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackDeltaStore::open(dir.path()).unwrap();

        let base = b"0123456789012345678901234567890123456789";
        let target = b"0123456789012345678901234567890123456789X";
        let mut batch = store.start_update();
        let base_oid = batch.store_object(ObjectType::Blob, base.to_vec()).unwrap();
        let target_oid = Hasher::hash_object(HashAlgorithm::Sha1, "blob", target).unwrap();
        let delta = crate::delta::compute::compute_delta(base, target);
        batch.store_delta(base_oid, target_oid, &delta, target.len());
        batch.close().unwrap();

        assert!(store.remove_delta(&target_oid, false).unwrap());
        assert!(!store.is_delta(&target_oid));
        assert!(!store.remove_delta(&target_oid, false).unwrap());
    }
}
