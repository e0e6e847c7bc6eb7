//! Pack generation: create .pack and .idx files.
//!
//! Provides `PackWriter` for creating new packfiles and
//! `build_pack_index` for generating .idx files from .pack files.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use git_hash::hasher::Hasher;
use git_hash::{HashAlgorithm, ObjectId};
use git_object::ObjectType;

use crate::entry::encode_entry_header;
use crate::{IDX_SIGNATURE, IDX_VERSION, PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_VERSION, PackError};

/// A written pack entry, used for index construction.
struct PackWriterEntry {
    oid: ObjectId,
    offset: u64,
    crc32: u32,
}

/// Builder for creating new packfiles.
pub struct PackWriter {
    file: std::fs::File,
    num_objects: u32,
    entries: Vec<PackWriterEntry>,
    path: PathBuf,
    /// When true, allow delta bases that reference objects not in this pack.
    thin: bool,
    /// Current write position (byte offset).
    position: u64,
}

impl PackWriter {
    /// Create a new pack writer at the given path.
    ///
    /// Writes the pack header immediately; call `add_object` / `add_delta`
    /// to append entries, then `finish` to write the trailer.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PackError> {
        let path = path.as_ref().to_path_buf();
        let mut file = std::fs::File::create(&path)?;

        // Object count is unknown until finish(); placeholder, fixed up there.
        let mut header = [0u8; PACK_HEADER_SIZE];
        header[0..4].copy_from_slice(PACK_SIGNATURE);
        header[4..8].copy_from_slice(&PACK_VERSION.to_be_bytes());
        header[8..12].copy_from_slice(&0u32.to_be_bytes());

        file.write_all(&header)?;

        Ok(Self {
            file,
            num_objects: 0,
            entries: Vec::new(),
            path,
            thin: false,
            position: PACK_HEADER_SIZE as u64,
        })
    }

    /// Enable or disable thin pack mode.
    ///
    /// In thin pack mode, delta bases may reference objects not included
    /// in the pack. The receiver is expected to already have those objects.
    pub fn set_thin(&mut self, thin: bool) {
        self.thin = thin;
    }

    /// Add a full (non-delta) object to the pack.
    pub fn add_object(
        &mut self,
        obj_type: ObjectType,
        data: &[u8],
    ) -> Result<(), PackError> {
        let type_num = match obj_type {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
        };

        let oid = Hasher::hash_object(
            HashAlgorithm::Sha1,
            std::str::from_utf8(obj_type.as_bytes()).unwrap(),
            data,
        )
        .map_err(PackError::Hash)?;

        let offset = self.position;
        let header = encode_entry_header(type_num, data.len() as u64);

        // Compress data
        let mut compressed = Vec::new();
        {
            let mut encoder = ZlibEncoder::new(&mut compressed, Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?;
        }

        // CRC32 of header + compressed data
        let mut crc = crc32fast::Hasher::new();
        crc.update(&header);
        crc.update(&compressed);
        let crc_val = crc.finalize();

        // Write to file and hasher
        self.write_bytes(&header)?;
        self.write_bytes(&compressed)?;

        self.entries.push(PackWriterEntry {
            oid,
            offset,
            crc32: crc_val,
        });
        self.num_objects += 1;

        Ok(())
    }

    /// Add a REF_DELTA entry referencing a base object by OID.
    pub fn add_delta(
        &mut self,
        base_oid: ObjectId,
        target_oid: ObjectId,
        delta_data: &[u8],
    ) -> Result<(), PackError> {
        let offset = self.position;
        let header = encode_entry_header(7, delta_data.len() as u64); // REF_DELTA

        // Compress delta data
        let mut compressed = Vec::new();
        {
            let mut encoder = ZlibEncoder::new(&mut compressed, Compression::default());
            encoder.write_all(delta_data)?;
            encoder.finish()?;
        }

        // CRC32 of header + base_oid + compressed
        let mut crc = crc32fast::Hasher::new();
        crc.update(&header);
        crc.update(base_oid.as_bytes());
        crc.update(&compressed);
        let crc_val = crc.finalize();

        // Write to file and hasher
        self.write_bytes(&header)?;
        self.write_bytes(base_oid.as_bytes())?;
        self.write_bytes(&compressed)?;

        self.entries.push(PackWriterEntry {
            oid: target_oid,
            offset,
            crc32: crc_val,
        });
        self.num_objects += 1;

        Ok(())
    }

    /// Finish writing the pack: fix header, write checksum trailer.
    ///
    /// Returns the path to the .pack file and its checksum.
    pub fn finish(mut self) -> Result<(PathBuf, ObjectId), PackError> {
        // Fix the object count in the header
        use std::io::Seek;
        self.file.seek(std::io::SeekFrom::Start(0))?;

        let mut header = [0u8; PACK_HEADER_SIZE];
        header[0..4].copy_from_slice(PACK_SIGNATURE);
        header[4..8].copy_from_slice(&PACK_VERSION.to_be_bytes());
        header[8..12].copy_from_slice(&self.num_objects.to_be_bytes());

        self.file.write_all(&header)?;
        self.file.seek(std::io::SeekFrom::End(0))?;
        drop(self.file);

        // The header was corrected in place above, so hashing the whole
        // file now (rather than carrying an incremental hasher through
        // add_object/add_delta) sees the final bytes in one pass.
        let pack_content = std::fs::read(&self.path)?;
        let mut hasher = Hasher::new(HashAlgorithm::Sha1);
        hasher.update(&pack_content);
        let checksum = hasher.finalize().map_err(PackError::Hash)?;

        // Append checksum to the file
        let mut file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(checksum.as_bytes())?;

        Ok((self.path.clone(), checksum))
    }

    /// Get the entries written so far (for index building).
    pub fn entries(&self) -> impl Iterator<Item = (&ObjectId, u64, u32)> {
        self.entries
            .iter()
            .map(|e| (&e.oid, e.offset, e.crc32))
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<(), PackError> {
        self.file.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }
}

/// Which on-disk pack index layout to emit.
///
/// The teacher's writer only ever emitted V2; V1 support exists for
/// interoperability with readers that predate the CRC32/64-bit-offset
/// extension, and is only reached when a caller asks for it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVersion {
    V1,
    V2,
}

/// Build the bytes of a pack index (V1 or V2) from a list of `(OID, offset,
/// CRC32)` entries and a pack checksum. V1 carries no CRC32 table, so the
/// `crc32` field is ignored when `version` is [`IndexVersion::V1`].
pub fn write_pack_index_bytes(
    entries: &mut [(ObjectId, u64, u32)],
    pack_checksum: &ObjectId,
    version: IndexVersion,
) -> Result<Vec<u8>, PackError> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut buf = Vec::new();

    let mut fanout = [0u32; 256];
    for (oid, _, _) in entries.iter() {
        fanout[oid.first_byte() as usize] += 1;
    }
    for i in 1..256 {
        fanout[i] += fanout[i - 1];
    }

    match version {
        IndexVersion::V1 => {
            for count in fanout {
                buf.extend_from_slice(&count.to_be_bytes());
            }
            for (oid, offset, _) in entries.iter() {
                if *offset > u32::MAX as u64 {
                    return Err(PackError::InvalidIndex(
                        "offset does not fit in a v1 index (31 bits)".into(),
                    ));
                }
                buf.extend_from_slice(&(*offset as u32).to_be_bytes());
                buf.extend_from_slice(oid.as_bytes());
            }
        }
        IndexVersion::V2 => {
            buf.extend_from_slice(&IDX_SIGNATURE);
            buf.extend_from_slice(&IDX_VERSION.to_be_bytes());

            for count in fanout {
                buf.extend_from_slice(&count.to_be_bytes());
            }
            for (oid, _, _) in entries.iter() {
                buf.extend_from_slice(oid.as_bytes());
            }
            for (_, _, crc) in entries.iter() {
                buf.extend_from_slice(&crc.to_be_bytes());
            }

            let mut large_offsets: Vec<u64> = Vec::new();
            for (_, offset, _) in entries.iter() {
                if *offset >= 0x8000_0000 {
                    let idx = large_offsets.len() as u32;
                    buf.extend_from_slice(&(0x8000_0000u32 | idx).to_be_bytes());
                    large_offsets.push(*offset);
                } else {
                    buf.extend_from_slice(&(*offset as u32).to_be_bytes());
                }
            }
            for offset in &large_offsets {
                buf.extend_from_slice(&offset.to_be_bytes());
            }
        }
    }

    buf.extend_from_slice(pack_checksum.as_bytes());

    let mut hasher = Hasher::new(HashAlgorithm::Sha1);
    hasher.update(&buf);
    let idx_checksum = hasher.finalize().map_err(PackError::Hash)?;
    buf.extend_from_slice(idx_checksum.as_bytes());

    Ok(buf)
}

/// Build a pack index (.idx) from a list of (OID, offset, CRC32) entries
/// and a pack checksum, writing it to `idx_path`. Always emits V2, matching
/// the writer's historical behavior; use [`write_pack_index_bytes`] for
/// V1 output.
pub fn build_pack_index(
    idx_path: &Path,
    entries: &mut [(ObjectId, u64, u32)],
    pack_checksum: &ObjectId,
) -> Result<PathBuf, PackError> {
    let buf = write_pack_index_bytes(entries, pack_checksum, IndexVersion::V2)?;
    let idx_path = idx_path.to_path_buf();
    std::fs::write(&idx_path, &buf)?;
    Ok(idx_path)
}

/// Convenience function: create a pack and its index from a set of objects.
///
/// Returns `(pack_path, idx_path, checksum)`.
pub fn create_pack(
    dir: &Path,
    name: &str,
    objects: &[(ObjectType, Vec<u8>)],
) -> Result<(PathBuf, PathBuf, ObjectId), PackError> {
    let pack_path = dir.join(format!("{name}.pack"));
    let idx_path = dir.join(format!("{name}.idx"));

    let mut writer = PackWriter::new(&pack_path)?;
    for (obj_type, data) in objects {
        writer.add_object(*obj_type, data)?;
    }

    // Collect entries before finishing
    let mut entries: Vec<(ObjectId, u64, u32)> = writer
        .entries()
        .map(|(oid, off, crc)| (*oid, off, crc))
        .collect();

    let (pack_path, checksum) = writer.finish()?;

    build_pack_index(&idx_path, &mut entries, &checksum)?;

    Ok((pack_path, idx_path, checksum))
}

/// Thresholds governing when a [`PendingPack`] should be flushed.
#[derive(Debug, Clone, Copy)]
pub struct PendingPackOptions {
    /// Flush once this many objects have been accumulated.
    pub max_objects: usize,
    /// Flush once the accumulated uncompressed content exceeds this many bytes.
    pub max_bytes: usize,
}

impl Default for PendingPackOptions {
    fn default() -> Self {
        Self {
            max_objects: 100,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// A single accumulated entry: either a whole object or a delta against a
/// base already known to the caller (which may or may not also be pending).
enum PendingEntry {
    Object {
        obj_type: ObjectType,
        data: Vec<u8>,
    },
    Delta {
        base_oid: ObjectId,
        data: Vec<u8>,
        original_size: usize,
    },
}

/// One flushed delta's sidecar metadata, as described in §4.7/§4.9: enough
/// to answer `getDeltaChainInfo` without re-walking the pack.
#[derive(Debug, Clone)]
pub struct DeltaMetadata {
    pub target: ObjectId,
    pub base: ObjectId,
    pub pack_name: String,
    pub offset: u64,
    pub depth: usize,
    pub compressed_size: usize,
    pub original_size: usize,
}

/// Result of flushing a [`PendingPack`]: the pack and index paths, the
/// pack's trailing checksum, and sidecar metadata for any delta entries.
pub struct PendingPackFlush {
    pub pack_path: PathBuf,
    pub idx_path: PathBuf,
    pub checksum: ObjectId,
    pub deltas: Vec<DeltaMetadata>,
}

/// Append buffer in front of [`PackWriter`], accumulating objects and
/// deltas until a threshold is reached, then flushing them atomically to
/// `.pack` + `.idx` + a delta metadata sidecar (§4.7).
///
/// Entries are keyed by target OID: storing the same id twice replaces the
/// earlier pending entry rather than duplicating it in the eventual pack,
/// matching the "append buffer `{id → ...}`" contract.
pub struct PendingPack {
    options: PendingPackOptions,
    order: Vec<ObjectId>,
    entries: std::collections::HashMap<ObjectId, PendingEntry>,
    total_bytes: usize,
}

impl PendingPack {
    pub fn new(options: PendingPackOptions) -> Self {
        Self {
            options,
            order: Vec::new(),
            entries: std::collections::HashMap::new(),
            total_bytes: 0,
        }
    }

    /// Number of distinct objects currently pending.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn record(&mut self, oid: ObjectId, entry: PendingEntry, size: usize) {
        if self.entries.insert(oid, entry).is_none() {
            self.order.push(oid);
        }
        self.total_bytes += size;
    }

    /// Accumulate a whole object, computing its OID from type + content.
    /// Returns the OID (idempotent: storing the same bytes twice is a no-op
    /// beyond the accounting).
    pub fn add_object(&mut self, obj_type: ObjectType, data: Vec<u8>) -> Result<ObjectId, PackError> {
        let oid = Hasher::hash_object(
            HashAlgorithm::Sha1,
            std::str::from_utf8(obj_type.as_bytes()).unwrap(),
            &data,
        )
        .map_err(PackError::Hash)?;
        let size = data.len();
        self.record(oid, PendingEntry::Object { obj_type, data }, size);
        Ok(oid)
    }

    /// Accumulate a delta against `base_oid`, identified by the known
    /// `target_oid` of the object it reconstructs to. `original_size` is
    /// the uncompressed size of the target, recorded in the sidecar.
    pub fn add_delta(
        &mut self,
        base_oid: ObjectId,
        target_oid: ObjectId,
        delta_data: Vec<u8>,
        original_size: usize,
    ) {
        let size = delta_data.len();
        self.record(
            target_oid,
            PendingEntry::Delta {
                base_oid,
                data: delta_data,
                original_size,
            },
            size,
        );
    }

    /// Whether a threshold has been reached and the batch should be flushed.
    pub fn should_flush(&self) -> bool {
        self.entries.len() >= self.options.max_objects || self.total_bytes >= self.options.max_bytes
    }

    /// Flush the batch: write `<pack_dir>/pack-<name>.pack` and its `.idx`,
    /// then return delta sidecar metadata. Publication follows §4.7/spec.md:221:
    /// a `pack-<name>.pack.lock` file is held for the duration of index+pack
    /// emission (excluding two concurrent flushes under the same name); the
    /// pack is written to a temp name and fsynced, then the index is written
    /// to a temp name and fsynced, and only then are both renamed into place
    /// — pack first, so a reader never observes an index without its
    /// matching pack.
    pub fn flush(self, pack_dir: &Path, name: &str) -> Result<PendingPackFlush, PackError> {
        std::fs::create_dir_all(pack_dir)?;
        let pack_path = pack_dir.join(format!("pack-{name}.pack"));
        let idx_path = pack_dir.join(format!("pack-{name}.idx"));
        let pack_tmp = pack_dir.join(format!("pack-{name}.pack.tmp"));
        let idx_tmp = pack_dir.join(format!("pack-{name}.idx.tmp"));

        let lock = git_utils::lockfile::LockFile::acquire(&pack_path)?;

        let result = self.write_and_publish(&pack_tmp, &idx_tmp, &pack_path, &idx_path, name);

        if result.is_err() {
            let _ = std::fs::remove_file(&pack_tmp);
            let _ = std::fs::remove_file(&idx_tmp);
        }
        lock.rollback()?;

        result
    }

    fn write_and_publish(
        &self,
        pack_tmp: &Path,
        idx_tmp: &Path,
        pack_path: &Path,
        idx_path: &Path,
        name: &str,
    ) -> Result<PendingPackFlush, PackError> {
        let mut writer = PackWriter::new(pack_tmp)?;
        let mut depths: std::collections::HashMap<ObjectId, usize> = std::collections::HashMap::new();
        let mut delta_bases: std::collections::HashMap<ObjectId, ObjectId> =
            std::collections::HashMap::new();

        for oid in &self.order {
            match &self.entries[oid] {
                PendingEntry::Object { obj_type, data } => {
                    writer.add_object(*obj_type, data)?;
                    depths.insert(*oid, 0);
                }
                PendingEntry::Delta { base_oid, data, .. } => {
                    writer.add_delta(*base_oid, *oid, data)?;
                    delta_bases.insert(*oid, *base_oid);
                }
            }
        }

        let mut entries: Vec<(ObjectId, u64, u32)> = writer
            .entries()
            .map(|(oid, off, crc)| (*oid, off, crc))
            .collect();
        let offsets: std::collections::HashMap<ObjectId, (u64, u32)> = entries
            .iter()
            .map(|(oid, off, crc)| (*oid, (*off, *crc)))
            .collect();

        let (_, checksum) = writer.finish()?;
        std::fs::File::open(pack_tmp)?.sync_all()?;

        let idx_bytes = write_pack_index_bytes(&mut entries, &checksum, IndexVersion::V2)?;
        {
            let mut f = std::fs::File::create(idx_tmp)?;
            f.write_all(&idx_bytes)?;
            f.sync_all()?;
        }

        std::fs::rename(pack_tmp, pack_path)?;
        std::fs::rename(idx_tmp, idx_path)?;

        fn chain_depth(
            oid: &ObjectId,
            delta_bases: &std::collections::HashMap<ObjectId, ObjectId>,
        ) -> usize {
            let mut depth = 0;
            let mut cur = *oid;
            while let Some(base) = delta_bases.get(&cur) {
                depth += 1;
                if *base == cur {
                    break;
                }
                cur = *base;
            }
            depth
        }

        let mut deltas = Vec::new();
        for oid in &self.order {
            if let PendingEntry::Delta {
                base_oid,
                data,
                original_size,
            } = &self.entries[oid]
            {
                let (offset, _crc) = offsets.get(oid).copied().unwrap_or((0, 0));
                deltas.push(DeltaMetadata {
                    target: *oid,
                    base: *base_oid,
                    pack_name: format!("pack-{name}"),
                    offset,
                    depth: chain_depth(oid, &delta_bases),
                    compressed_size: data.len(),
                    original_size: *original_size,
                });
            }
        }

        Ok(PendingPackFlush {
            pack_path: pack_path.to_path_buf(),
            idx_path: idx_path.to_path_buf(),
            checksum,
            deltas,
        })
    }
}
