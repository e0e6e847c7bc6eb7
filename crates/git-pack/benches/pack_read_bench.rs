use criterion::{criterion_group, criterion_main, Criterion};
use git_hash::hasher::Hasher;
use git_hash::{HashAlgorithm, ObjectId};
use git_object::{Commit, FileMode, ObjectType, Tree, TreeEntry};
use git_pack::pack::PackFile;
use git_pack::write::{build_pack_index, PackWriter};
use git_utils::date::{GitDate, Signature};

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

/// Builds a 9-object pack (3 blobs, 3 trees, 3 commits, one of them a
/// REF_DELTA) to bench against, mirroring a small real history.
fn fixture_pack() -> (tempfile::TempDir, PackFile, ObjectId, ObjectId) {
    let dir = tempfile::tempdir().unwrap();

    let blob_v1 = b"Hello, World!\n".to_vec();
    let blob_v2 = b"Modified content\n".to_vec();
    let blob_other = b"Another file\n".to_vec();

    let mut tree_v1 = Tree::new();
    tree_v1.entries.push(TreeEntry {
        mode: FileMode::Regular,
        name: "hello.txt".into(),
        oid: oid_of(ObjectType::Blob, &blob_v1),
    });
    tree_v1.sort();

    let mut tree_v2 = Tree::new();
    tree_v2.entries.push(TreeEntry {
        mode: FileMode::Regular,
        name: "hello.txt".into(),
        oid: oid_of(ObjectType::Blob, &blob_v2),
    });
    tree_v2.sort();

    let mut tree_v3 = Tree::new();
    tree_v3.entries.push(TreeEntry {
        mode: FileMode::Regular,
        name: "hello.txt".into(),
        oid: oid_of(ObjectType::Blob, &blob_v2),
    });
    tree_v3.entries.push(TreeEntry {
        mode: FileMode::Regular,
        name: "other.txt".into(),
        oid: oid_of(ObjectType::Blob, &blob_other),
    });
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

    let pack_path = dir.path().join("bench.pack");
    let idx_path = dir.path().join("bench.idx");
    let mut writer = PackWriter::new(&pack_path).unwrap();

    writer.add_object(ObjectType::Blob, &blob_v1).unwrap();
    writer.add_object(ObjectType::Blob, &blob_v2).unwrap();
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
    let blob_id = oid_of(ObjectType::Blob, &blob_v1);
    (dir, pack, blob_id, commit_initial_id)
}

fn bench_index_lookup(c: &mut Criterion) {
    let (_dir, pack, blob_id, _delta_id) = fixture_pack();

    c.bench_function("index_lookup", |b| {
        b.iter(|| {
            pack.index().lookup(&blob_id);
        });
    });
}

fn bench_read_blob(c: &mut Criterion) {
    let (_dir, pack, blob_id, _delta_id) = fixture_pack();

    c.bench_function("read_blob", |b| {
        b.iter(|| {
            pack.read_object(&blob_id).unwrap();
        });
    });
}

fn bench_read_delta_object(c: &mut Criterion) {
    let (_dir, pack, _blob_id, delta_id) = fixture_pack();

    c.bench_function("read_delta_object", |b| {
        b.iter(|| {
            pack.read_object(&delta_id).unwrap();
        });
    });
}

fn bench_read_all_objects(c: &mut Criterion) {
    let (_dir, pack, _blob_id, _delta_id) = fixture_pack();

    c.bench_function("read_all_9_objects", |b| {
        b.iter(|| {
            for result in pack.iter() {
                result.unwrap();
            }
        });
    });
}

fn bench_verify_checksum(c: &mut Criterion) {
    let (_dir, pack, _blob_id, _delta_id) = fixture_pack();

    c.bench_function("verify_checksum", |b| {
        b.iter(|| {
            pack.verify_checksum().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_index_lookup,
    bench_read_blob,
    bench_read_delta_object,
    bench_read_all_objects,
    bench_verify_checksum,
);
criterion_main!(benches);
