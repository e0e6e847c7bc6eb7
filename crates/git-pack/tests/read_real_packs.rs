//! Integration tests: read objects back out of a packfile assembled the
//! way a real history would produce one — three commits touching two
//! files, with the oldest commit stored as a REF_DELTA against the next.
//!
//! The fixture is built in-process with `PackWriter` rather than shipped
//! as a binary blob, so the pack is exactly reproducible from this file.

use git_hash::hasher::Hasher;
use git_hash::{HashAlgorithm, ObjectId};
use git_object::{Commit, FileMode, ObjectType, Tree, TreeEntry};
use git_pack::pack::PackFile;
use git_pack::write::{build_pack_index, PackWriter};
use git_utils::date::{GitDate, Signature};

struct Fixture {
    pack: PackFile,
    blob_hello_v1: ObjectId,
    blob_hello_v2: ObjectId,
    blob_other: ObjectId,
    tree_v1: ObjectId,
    tree_v2: ObjectId,
    tree_v3: ObjectId,
    commit_initial: ObjectId,
    commit_modify: ObjectId,
    commit_add_other: ObjectId,
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

fn oid_of(obj_type: ObjectType, content: &[u8]) -> ObjectId {
    Hasher::hash_object(
        HashAlgorithm::Sha1,
        std::str::from_utf8(obj_type.as_bytes()).unwrap(),
        content,
    )
    .unwrap()
}

/// Builds a pack mirroring:
/// ```sh
/// git init && echo "Hello, World!" > hello.txt && git add . && git commit -m "initial"
/// echo "Modified content" > hello.txt && git add . && git commit -m "modify"
/// echo "Another file" > other.txt && git add . && git commit -m "add other"
/// git gc --aggressive
/// ```
/// except the oldest commit is the one stored as a delta, since it is the
/// smallest diff against its neighbor.
fn build_fixture(dir: &std::path::Path) -> Fixture {
    let blob_hello_v1 = b"Hello, World!\n".to_vec();
    let blob_hello_v2 = b"Modified content\n".to_vec();
    let blob_other = b"Another file\n".to_vec();

    let mut tree_v1 = Tree::new();
    tree_v1.entries.push(TreeEntry {
        mode: FileMode::Regular,
        name: "hello.txt".into(),
        oid: oid_of(ObjectType::Blob, &blob_hello_v1),
    });

    let mut tree_v2 = Tree::new();
    tree_v2.entries.push(TreeEntry {
        mode: FileMode::Regular,
        name: "hello.txt".into(),
        oid: oid_of(ObjectType::Blob, &blob_hello_v2),
    });

    let mut tree_v3 = Tree::new();
    tree_v3.entries.push(TreeEntry {
        mode: FileMode::Regular,
        name: "hello.txt".into(),
        oid: oid_of(ObjectType::Blob, &blob_hello_v2),
    });
    tree_v3.entries.push(TreeEntry {
        mode: FileMode::Regular,
        name: "other.txt".into(),
        oid: oid_of(ObjectType::Blob, &blob_other),
    });
    tree_v1.sort();
    tree_v2.sort();
    tree_v3.sort();
    let tree_v1_content = tree_v1.serialize_content();
    let tree_v2_content = tree_v2.serialize_content();
    let tree_v3_content = tree_v3.serialize_content();

    let commit_initial = Commit {
        tree: oid_of(ObjectType::Tree, &tree_v1_content),
        parents: vec![],
        author: sig("author"),
        committer: sig("author"),
        encoding: None,
        gpgsig: None,
        extra_headers: Vec::new(),
        message: "initial\n".into(),
    };
    let commit_initial_content = commit_initial.serialize_content();
    let commit_initial_id = oid_of(ObjectType::Commit, &commit_initial_content);

    let commit_modify = Commit {
        tree: oid_of(ObjectType::Tree, &tree_v2_content),
        parents: vec![commit_initial_id],
        author: sig("author"),
        committer: sig("author"),
        encoding: None,
        gpgsig: None,
        extra_headers: Vec::new(),
        message: "modify\n".into(),
    };
    let commit_modify_content = commit_modify.serialize_content();
    let commit_modify_id = oid_of(ObjectType::Commit, &commit_modify_content);

    let commit_add_other = Commit {
        tree: oid_of(ObjectType::Tree, &tree_v3_content),
        parents: vec![commit_modify_id],
        author: sig("author"),
        committer: sig("author"),
        encoding: None,
        gpgsig: None,
        extra_headers: Vec::new(),
        message: "add other\n".into(),
    };
    let commit_add_other_content = commit_add_other.serialize_content();
    let commit_add_other_id = oid_of(ObjectType::Commit, &commit_add_other_content);

    let pack_path = dir.join("test.pack");
    let idx_path = dir.join("test.idx");
    let mut writer = PackWriter::new(&pack_path).unwrap();

    writer.add_object(ObjectType::Blob, &blob_hello_v1).unwrap();
    writer.add_object(ObjectType::Blob, &blob_hello_v2).unwrap();
    writer.add_object(ObjectType::Blob, &blob_other).unwrap();
    writer.add_object(ObjectType::Tree, &tree_v1_content).unwrap();
    writer.add_object(ObjectType::Tree, &tree_v2_content).unwrap();
    writer.add_object(ObjectType::Tree, &tree_v3_content).unwrap();
    writer
        .add_object(ObjectType::Commit, &commit_modify_content)
        .unwrap();
    writer
        .add_object(ObjectType::Commit, &commit_add_other_content)
        .unwrap();

    // The oldest commit is stored as a REF_DELTA against "modify", its
    // only child, mirroring how `git gc --aggressive` would pick a base.
    let delta = git_pack::delta::compute::compute_delta(&commit_modify_content, &commit_initial_content);
    writer
        .add_delta(commit_modify_id, commit_initial_id, &delta)
        .unwrap();

    let mut entries: Vec<(ObjectId, u64, u32)> = writer
        .entries()
        .map(|(oid, off, crc)| (*oid, off, crc))
        .collect();
    let (_, checksum) = writer.finish().unwrap();
    build_pack_index(&idx_path, &mut entries, &checksum).unwrap();

    let pack = PackFile::open(&pack_path).unwrap();

    Fixture {
        pack,
        blob_hello_v1: oid_of(ObjectType::Blob, &blob_hello_v1),
        blob_hello_v2: oid_of(ObjectType::Blob, &blob_hello_v2),
        blob_other: oid_of(ObjectType::Blob, &blob_other),
        tree_v1: oid_of(ObjectType::Tree, &tree_v1_content),
        tree_v2: oid_of(ObjectType::Tree, &tree_v2_content),
        tree_v3: oid_of(ObjectType::Tree, &tree_v3_content),
        commit_initial: commit_initial_id,
        commit_modify: commit_modify_id,
        commit_add_other: commit_add_other_id,
    }
}

#[test]
fn open_assembled_pack() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(dir.path());
    assert_eq!(fx.pack.num_objects(), 9);
}

#[test]
fn read_known_blob() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(dir.path());
    let obj = fx.pack.read_object(&fx.blob_hello_v1).unwrap().unwrap();
    assert_eq!(obj.obj_type, ObjectType::Blob);
    assert_eq!(obj.data, b"Hello, World!\n");
}

#[test]
fn read_modified_blob() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(dir.path());
    let obj = fx.pack.read_object(&fx.blob_hello_v2).unwrap().unwrap();
    assert_eq!(obj.obj_type, ObjectType::Blob);
    assert_eq!(obj.data, b"Modified content\n");
}

#[test]
fn read_another_blob() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(dir.path());
    let obj = fx.pack.read_object(&fx.blob_other).unwrap().unwrap();
    assert_eq!(obj.obj_type, ObjectType::Blob);
    assert_eq!(obj.data, b"Another file\n");
}

#[test]
fn read_commit_objects() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(dir.path());

    let obj = fx.pack.read_object(&fx.commit_add_other).unwrap().unwrap();
    assert_eq!(obj.obj_type, ObjectType::Commit);
    assert!(String::from_utf8_lossy(&obj.data).contains("add other"));

    let obj = fx.pack.read_object(&fx.commit_modify).unwrap().unwrap();
    assert_eq!(obj.obj_type, ObjectType::Commit);
    assert!(String::from_utf8_lossy(&obj.data).contains("modify"));
}

#[test]
fn read_delta_object() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(dir.path());

    // The initial commit is stored as a delta of the modify commit.
    let obj = fx.pack.read_object(&fx.commit_initial).unwrap().unwrap();
    assert_eq!(obj.obj_type, ObjectType::Commit);
    assert!(String::from_utf8_lossy(&obj.data).contains("initial"));
}

#[test]
fn read_tree_objects() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(dir.path());

    for tree_id in [fx.tree_v1, fx.tree_v2, fx.tree_v3] {
        let obj = fx.pack.read_object(&tree_id).unwrap().unwrap();
        assert_eq!(obj.obj_type, ObjectType::Tree);
    }
}

#[test]
fn read_all_objects_via_index() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(dir.path());

    let mut count = 0;
    for (oid, _offset) in fx.pack.index().iter() {
        let obj = fx.pack.read_object(&oid).unwrap();
        assert!(obj.is_some(), "failed to read object {oid}");
        count += 1;
    }
    assert_eq!(count, 9);
}

#[test]
fn missing_oid_returns_none() {
    let dir = tempfile::tempdir().unwrap();
    let fx = build_fixture(dir.path());
    let missing = ObjectId::from_hex("0000000000000000000000000000000000000000").unwrap();
    assert_eq!(fx.pack.read_object(&missing).unwrap(), None);
}
