//! End-to-end scenario S6: a reachable branch tip plus a dangling blob;
//! `runGC` removes only the dangling object, and a second run is a no-op.

use git_gc::GcController;
use git_object::{Commit, FileMode, Tree, TreeEntry};
use git_odb::ObjectDatabase;
use git_ref::{FilesRefStore, RefName};
use git_utils::date::{GitDate, Signature};

fn sig() -> Signature {
    Signature {
        name: "tester".into(),
        email: "tester@example.com".into(),
        date: GitDate {
            timestamp: 1_700_000_000,
            tz_offset: 0,
        },
    }
}

#[test]
fn s6_gc_removes_only_dangling_objects() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("objects")).unwrap();
    std::fs::create_dir_all(dir.path().join("refs/heads")).unwrap();

    let odb = ObjectDatabase::open(dir.path().join("objects")).unwrap();
    let refs = FilesRefStore::new(dir.path());

    let blob_id = odb.blobs().store_bytes(b"tracked content").unwrap();
    let mut tree = Tree::new();
    tree.entries.push(TreeEntry {
        mode: FileMode::Regular,
        name: "file.txt".into(),
        oid: blob_id,
    });
    let tree_id = odb.trees().store(tree).unwrap();

    let commit = Commit {
        tree: tree_id,
        parents: vec![],
        author: sig(),
        committer: sig(),
        encoding: None,
        gpgsig: None,
        extra_headers: Vec::new(),
        message: "initial commit\n".into(),
    };
    let commit_id = odb.commits().store(&commit).unwrap();

    refs.write_ref(&RefName::new("refs/heads/main").unwrap(), &commit_id)
        .unwrap();

    let dangling_blob = odb.blobs().store_bytes(b"nobody points at me").unwrap();

    let controller = GcController::new(&odb, &refs, dir.path());
    let report = controller.collect_garbage(&[], false).unwrap();

    assert_eq!(report.removed, vec![dangling_blob]);
    assert!(odb.contains(&commit_id));
    assert!(odb.contains(&tree_id));
    assert!(odb.contains(&blob_id));
    assert!(!odb.contains(&dangling_blob));

    let second_report = controller.collect_garbage(&[], false).unwrap();
    assert!(second_report.removed.is_empty(), "second run removes nothing");
}
