//! `GCController`: the orchestration layer over [`collect_reachable_objects`]
//! (§4.11). Decides whether housekeeping is due, sweeps unreachable loose
//! objects, and optionally rewrites over-deep delta chains to full objects
//! on repack.
//!
//! Grounded on the `gc` porcelain command's auto-threshold check and
//! pack-refs/repack/prune sequencing, reshaped from a CLI command that
//! parses args and writes to stdout into a library entry point that takes
//! an [`ObjectDatabase`] + [`RefStore`] pair.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use git_hash::ObjectId;
use git_odb::ObjectDatabase;
use git_pack::delta_store::PackDeltaStore;
use git_ref::RefStore;

use crate::reachability::collect_reachable_objects;
use crate::GcError;

/// Thresholds and bounds governing [`GcController::should_run_gc`] and
/// [`GcController::run_gc`] (§9 "Configuration via positional options" —
/// replaced here with an explicit option record).
#[derive(Debug, Clone)]
pub struct GcOptions {
    /// Minimum wall-clock time between automatic GC runs.
    pub min_interval: Duration,
    /// Run GC once at least this many loose objects are present.
    pub loose_object_threshold: usize,
    /// Delta chains longer than this are rewritten to full objects on
    /// repack (§3 invariant 3, default 50).
    pub max_chain_depth: usize,
    /// When true, `collect_garbage` reports what it would remove without
    /// touching storage.
    pub dry_run: bool,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(6 * 60 * 60),
            loose_object_threshold: 6700,
            max_chain_depth: git_pack::delta_store::DEFAULT_MAX_CHAIN_DEPTH,
            dry_run: false,
        }
    }
}

/// Outcome of a [`GcController::run_gc`] or [`GcController::collect_garbage`]
/// call.
#[derive(Debug, Default, Clone)]
pub struct GcReport {
    /// Number of objects found reachable from the ref set (plus any
    /// caller-supplied extra roots).
    pub reachable: usize,
    /// Loose objects removed (or, under `dry_run`, that would be removed).
    pub removed: Vec<ObjectId>,
    /// Whether this report was produced under `dry_run`.
    pub dry_run: bool,
    /// Delta entries rewritten to full objects because their chain
    /// exceeded `max_chain_depth`.
    pub deltas_consolidated: usize,
}

/// Orchestrates reachability analysis and sweeping over a single
/// object database + ref store pair.
pub struct GcController<'a> {
    odb: &'a ObjectDatabase,
    refs: &'a dyn RefStore,
    git_dir: PathBuf,
}

impl<'a> GcController<'a> {
    pub fn new(odb: &'a ObjectDatabase, refs: &'a dyn RefStore, git_dir: impl AsRef<Path>) -> Self {
        Self {
            odb,
            refs,
            git_dir: git_dir.as_ref().to_path_buf(),
        }
    }

    /// The set of object ids referenced directly by every ref (peeling
    /// symbolic refs and annotated tags to their terminal object).
    pub fn ref_tips(&self) -> Result<Vec<ObjectId>, GcError> {
        let mut tips = Vec::new();
        for r in self.refs.iter(None)? {
            let r = r?;
            tips.push(r.peel_to_oid(self.refs)?);
        }
        Ok(tips)
    }

    /// Reachability closure from every ref tip, plus `extra_roots` (e.g.
    /// entries held by a staging area collaborator, per §4.11 "protects
    /// objects referenced by the staging area").
    pub fn collect_reachable_objects(
        &self,
        extra_roots: &[ObjectId],
    ) -> Result<HashSet<ObjectId>, GcError> {
        let mut wants = self.ref_tips()?;
        wants.extend_from_slice(extra_roots);
        collect_reachable_objects(self.odb, &wants, &[])
    }

    /// Identify loose objects outside the reachable closure and, unless
    /// `dry_run`, remove them (§4.11 `collectGarbage`).
    ///
    /// A failure determining reachability aborts the sweep entirely and
    /// removes nothing (§7: "any failure during mark aborts the sweep").
    pub fn collect_garbage(
        &self,
        extra_roots: &[ObjectId],
        dry_run: bool,
    ) -> Result<GcReport, GcError> {
        let reachable = self.collect_reachable_objects(extra_roots)?;
        let loose = self.odb.list_loose()?;

        let mut removed = Vec::new();
        for oid in loose {
            if reachable.contains(&oid) {
                continue;
            }
            if !dry_run {
                self.odb.remove(&oid)?;
            }
            removed.push(oid);
        }

        Ok(GcReport {
            reachable: reachable.len(),
            removed,
            dry_run,
            deltas_consolidated: 0,
        })
    }

    /// Whether automatic housekeeping is due: the minimum interval has
    /// elapsed since the last recorded run and the loose object count
    /// exceeds `opts.loose_object_threshold`.
    pub fn should_run_gc(&self, opts: &GcOptions) -> Result<bool, GcError> {
        let loose_count = self.odb.list_loose()?.len();
        if loose_count < opts.loose_object_threshold {
            return Ok(false);
        }
        Ok(self.interval_elapsed(opts.min_interval))
    }

    fn marker_path(&self) -> PathBuf {
        self.git_dir.join("gc.last-run")
    }

    fn interval_elapsed(&self, min_interval: Duration) -> bool {
        let marker = self.marker_path();
        let last = std::fs::read_to_string(&marker)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));

        match last {
            None => true,
            Some(last) => SystemTime::now()
                .duration_since(last)
                .map(|elapsed| elapsed >= min_interval)
                .unwrap_or(true),
        }
    }

    fn record_run(&self) -> Result<(), GcError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        std::fs::write(self.marker_path(), now.to_string())?;
        Ok(())
    }

    /// Rewrite any delta whose chain exceeds `max_depth` as a full object,
    /// dropping its sidecar entry once the whole content is durably stored
    /// (§4.11 "Optional consolidation").
    pub fn consolidate_deltas(
        &self,
        delta_store: &PackDeltaStore,
        max_depth: usize,
    ) -> Result<usize, GcError> {
        let mut rewritten = 0usize;
        for oid in self.odb.list()? {
            if !delta_store.is_delta(&oid) {
                continue;
            }
            let info = match delta_store.get_delta_chain_info(&oid)? {
                Some(i) => i,
                None => continue,
            };
            if info.depth <= max_depth {
                continue;
            }

            let resolved = self
                .odb
                .read_raw(&oid)?
                .ok_or(GcError::IncompleteReachability(oid))?;
            let (obj_type, _size, content) =
                git_object::header::parse_header(&resolved).map(|(t, s, off)| (t, s, resolved[off..].to_vec()))?;

            let mut batch = delta_store.start_update();
            batch.store_object(obj_type, content)?;
            batch.close()?;
            delta_store.remove_delta(&oid, false)?;
            rewritten += 1;
        }
        Ok(rewritten)
    }

    /// Run a full GC pass: sweep unreachable loose objects, rewrite
    /// over-deep delta chains, and record the run for `should_run_gc`'s
    /// interval check.
    pub fn run_gc(
        &self,
        opts: &GcOptions,
        extra_roots: &[ObjectId],
        delta_store: Option<&PackDeltaStore>,
    ) -> Result<GcReport, GcError> {
        let mut report = self.collect_garbage(extra_roots, opts.dry_run)?;

        if !opts.dry_run {
            if let Some(store) = delta_store {
                report.deltas_consolidated = self.consolidate_deltas(store, opts.max_chain_depth)?;
            }
            self.record_run()?;
        }

        Ok(report)
    }
}
