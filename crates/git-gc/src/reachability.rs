//! Reachability closure: commit -> (tree, parents), tree -> entries,
//! tag -> target, from a root set of object ids (§4.11, §8 property 10).

use std::collections::HashSet;

use git_hash::ObjectId;
use git_object::Object;
use git_odb::ObjectDatabase;

use crate::GcError;

/// Walk the object graph reachable from `wants`, excluding anything
/// reachable from `excludes`. Excludes are expanded to their own full
/// closure before the walk starts, so e.g. excluding a commit also
/// excludes its ancestors and trees (§4.11: "Excludes ... are expanded
/// to include all their ancestor commits before the walk").
///
/// Any object named by a ref or by another reachable object that is
/// itself missing aborts the walk with [`GcError::IncompleteReachability`]
/// rather than silently under-counting — §7: "GC never removes an object
/// whose reachability could not be fully determined."
pub fn collect_reachable_objects(
    odb: &ObjectDatabase,
    wants: &[ObjectId],
    excludes: &[ObjectId],
) -> Result<HashSet<ObjectId>, GcError> {
    let excluded = if excludes.is_empty() {
        HashSet::new()
    } else {
        walk(odb, excludes, &HashSet::new())?
    };
    walk(odb, wants, &excluded)
}

/// BFS/DFS over the object graph from `roots`, skipping anything already
/// in `excluded`. The traversal order does not affect the resulting set
/// (§8 property 10: "independent of traversal order").
fn walk(
    odb: &ObjectDatabase,
    roots: &[ObjectId],
    excluded: &HashSet<ObjectId>,
) -> Result<HashSet<ObjectId>, GcError> {
    let mut seen = HashSet::new();
    let mut stack: Vec<ObjectId> = roots.to_vec();

    while let Some(oid) = stack.pop() {
        if excluded.contains(&oid) || !seen.insert(oid) {
            continue;
        }

        if oid == git_odb::empty_tree_id() {
            continue;
        }

        let obj = odb.read(&oid)?.ok_or(GcError::IncompleteReachability(oid))?;

        match obj {
            Object::Commit(commit) => {
                stack.push(commit.tree);
                stack.extend(commit.parents.iter().copied());
            }
            Object::Tree(tree) => {
                stack.extend(tree.entries.iter().map(|e| e.oid));
            }
            Object::Tag(tag) => {
                stack.push(tag.target);
            }
            Object::Blob(_) => {}
        }
    }

    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git_object::{Commit, FileMode, Tag, Tree, TreeEntry};
    use git_utils::date::{GitDate, Signature};

    fn open_odb() -> (tempfile::TempDir, ObjectDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path().join("objects")).unwrap();
        (dir, odb)
    }

    fn sig(name: &str) -> Signature {
        Signature {
            name: name.into(),
            email: format!("{name}@example.com").into(),
            date: GitDate {
                timestamp: 1_700_000_000,
                tz_offset: 0,
            },
        }
    }

    #[test]
    fn visits_commit_ancestry_tree_and_blobs_and_nothing_else() {
        let (_dir, odb) = open_odb();

        let blob_id = odb.blobs().store_bytes(b"hello").unwrap();
        let mut tree = Tree::new();
        tree.entries.push(TreeEntry {
            mode: FileMode::Regular,
            name: "a.txt".into(),
            oid: blob_id,
        });
        let tree_id = odb.trees().store(tree).unwrap();

        let c1 = Commit {
            tree: tree_id,
            parents: vec![],
            author: sig("a"),
            committer: sig("a"),
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: "first".into(),
        };
        let c1_id = odb.commits().store(&c1).unwrap();

        let c2 = Commit {
            tree: tree_id,
            parents: vec![c1_id],
            author: sig("a"),
            committer: sig("a"),
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: "second".into(),
        };
        let c2_id = odb.commits().store(&c2).unwrap();

        let dangling = odb.blobs().store_bytes(b"unreachable").unwrap();

        let reached = collect_reachable_objects(&odb, &[c2_id], &[]).unwrap();
        assert!(reached.contains(&c2_id));
        assert!(reached.contains(&c1_id));
        assert!(reached.contains(&tree_id));
        assert!(reached.contains(&blob_id));
        assert!(!reached.contains(&dangling));
        assert_eq!(reached.len(), 4);
    }

    #[test]
    fn excludes_expand_to_their_own_ancestry() {
        let (_dir, odb) = open_odb();

        let empty_tree = odb.trees().empty_tree_id();

        let c1 = Commit {
            tree: empty_tree,
            parents: vec![],
            author: sig("a"),
            committer: sig("a"),
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: "base".into(),
        };
        let c1_id = odb.commits().store(&c1).unwrap();

        let c2 = Commit {
            tree: empty_tree,
            parents: vec![c1_id],
            author: sig("a"),
            committer: sig("a"),
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: "head".into(),
        };
        let c2_id = odb.commits().store(&c2).unwrap();

        // Excluding c1 should also exclude c1 itself, leaving only c2.
        let reached = collect_reachable_objects(&odb, &[c2_id], &[c1_id]).unwrap();
        assert!(reached.contains(&c2_id));
        assert!(!reached.contains(&c1_id));
    }

    #[test]
    fn tag_targets_are_reachable() {
        let (_dir, odb) = open_odb();
        let empty_tree = odb.trees().empty_tree_id();
        let c1 = Commit {
            tree: empty_tree,
            parents: vec![],
            author: sig("a"),
            committer: sig("a"),
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: "base".into(),
        };
        let c1_id = odb.commits().store(&c1).unwrap();

        let tag = Tag {
            target: c1_id,
            target_type: git_object::ObjectType::Commit,
            tag_name: "v1".into(),
            tagger: Some(sig("a")),
            gpgsig: None,
            message: "release".into(),
        };
        let tag_id = odb.tags().store(&tag).unwrap();

        let reached = collect_reachable_objects(&odb, &[tag_id], &[]).unwrap();
        assert!(reached.contains(&tag_id));
        assert!(reached.contains(&c1_id));
    }
}
