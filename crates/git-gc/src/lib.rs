//! Reachability analysis and garbage collection (§4.11 `GCController`).
//!
//! Computes the set of objects reachable from a repository's ref tips,
//! identifies loose objects outside that set, and prunes them. Delta
//! chain depth bounding and repack orchestration live here too, grounded
//! on `git-pack`'s `MAX_DELTA_CHAIN_DEPTH`/`PackDeltaStore` and on the
//! `gc` porcelain command's pack-refs/repack/prune sequence.

mod controller;
mod reachability;

pub use controller::{GcController, GcOptions, GcReport};
pub use reachability::collect_reachable_objects;

use git_hash::ObjectId;

/// Errors produced by GC operations.
#[derive(Debug, thiserror::Error)]
pub enum GcError {
    #[error("object database error: {0}")]
    Odb(String),

    #[error("ref store error: {0}")]
    Ref(#[from] git_ref::RefError),

    #[error("pack error: {0}")]
    Pack(#[from] git_pack::PackError),

    #[error("object error: {0}")]
    Object(#[from] git_object::ObjectError),

    #[error(
        "reachability of {0} could not be fully determined: object is missing from every backend"
    )]
    IncompleteReachability(ObjectId),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<git_odb::OdbError> for GcError {
    fn from(e: git_odb::OdbError) -> Self {
        GcError::Odb(e.to_string())
    }
}
