//! Typed sub-views over the shared [`ObjectDatabase`]: `blobs`, `trees`,
//! `commits`, `tags` (§4.4, §6 "Public API surface").
//!
//! Each view is a thin, non-owning wrapper that decodes/encodes through the
//! matching `git_object` type. Polymorphism stays by tag: the codec decides
//! how to interpret bytes from the header's type field, these views just
//! narrow the facade to one object type and special-case the well-known
//! empty tree.

use std::io::Read;

use git_hash::ObjectId;
use git_object::{Blob, Commit, Object, ObjectType, Tag, Tree, TreeEntry};

use crate::{ObjectDatabase, OdbError};

/// The well-known empty tree identity (§3): readable and reported present
/// without any persisted bytes.
pub const EMPTY_TREE_ID_HEX: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// The well-known empty tree identity, parsed once.
pub fn empty_tree_id() -> ObjectId {
    ObjectId::from_hex(EMPTY_TREE_ID_HEX).expect("well-known empty tree id is valid hex")
}

/// Typed view over blob objects.
pub struct BlobsView<'a> {
    odb: &'a ObjectDatabase,
}

impl<'a> BlobsView<'a> {
    pub(crate) fn new(odb: &'a ObjectDatabase) -> Self {
        Self { odb }
    }

    /// Store blob content of known size, hashing while streaming.
    pub fn store_with_size(
        &self,
        size: usize,
        reader: &mut dyn Read,
    ) -> Result<ObjectId, OdbError> {
        self.odb.write_stream(ObjectType::Blob, size, reader)
    }

    /// Store blob content of unknown size (buffered to determine length
    /// before hashing).
    pub fn store(&self, reader: &mut dyn Read) -> Result<ObjectId, OdbError> {
        self.odb.write_unsized(ObjectType::Blob, reader)
    }

    /// Store an in-memory blob.
    pub fn store_bytes(&self, data: &[u8]) -> Result<ObjectId, OdbError> {
        self.odb.write_raw(ObjectType::Blob, data)
    }

    /// Load a blob's content by id.
    pub fn load(&self, id: &ObjectId) -> Result<Option<Blob>, OdbError> {
        match self.odb.read(id)? {
            Some(Object::Blob(b)) => Ok(Some(b)),
            Some(_) => Err(OdbError::Corrupt {
                oid: *id,
                reason: "expected blob".into(),
            }),
            None => Ok(None),
        }
    }

    pub fn has(&self, id: &ObjectId) -> bool {
        self.odb.contains(id)
    }

    pub fn remove(&self, id: &ObjectId) -> Result<bool, OdbError> {
        self.odb.remove(id)
    }
}

/// Typed view over tree objects.
pub struct TreesView<'a> {
    odb: &'a ObjectDatabase,
}

impl<'a> TreesView<'a> {
    pub(crate) fn new(odb: &'a ObjectDatabase) -> Self {
        Self { odb }
    }

    /// The well-known empty tree identity.
    pub fn empty_tree_id(&self) -> ObjectId {
        empty_tree_id()
    }

    /// Store a tree, sorting its entries canonically first.
    pub fn store(&self, mut tree: Tree) -> Result<ObjectId, OdbError> {
        tree.sort();
        let content = tree.serialize_content();
        self.odb.write_raw(ObjectType::Tree, &content)
    }

    /// Load a tree by id. The well-known empty tree loads as zero entries
    /// without requiring any stored bytes.
    pub fn load(&self, id: &ObjectId) -> Result<Option<Tree>, OdbError> {
        if *id == empty_tree_id() {
            return Ok(Some(Tree::new()));
        }
        match self.odb.read(id)? {
            Some(Object::Tree(t)) => Ok(Some(t)),
            Some(_) => Err(OdbError::Corrupt {
                oid: *id,
                reason: "expected tree".into(),
            }),
            None => Ok(None),
        }
    }

    /// Look up a single entry by name within a loaded tree.
    pub fn get_entry(&self, tree: &Tree, name: &str) -> Option<TreeEntry> {
        tree.find(bstr::BStr::new(name.as_bytes())).cloned()
    }

    /// Whether `id` exists — true for the empty tree even though it is
    /// never persisted.
    pub fn has(&self, id: &ObjectId) -> bool {
        *id == empty_tree_id() || self.odb.contains(id)
    }

    pub fn remove(&self, id: &ObjectId) -> Result<bool, OdbError> {
        if *id == empty_tree_id() {
            return Ok(false);
        }
        self.odb.remove(id)
    }

    /// Identities of all stored tree objects.
    pub fn keys(&self) -> Result<Vec<ObjectId>, OdbError> {
        filter_by_type(self.odb, ObjectType::Tree)
    }
}

/// Typed view over commit objects.
pub struct CommitsView<'a> {
    odb: &'a ObjectDatabase,
}

impl<'a> CommitsView<'a> {
    pub(crate) fn new(odb: &'a ObjectDatabase) -> Self {
        Self { odb }
    }

    pub fn store(&self, commit: &Commit) -> Result<ObjectId, OdbError> {
        let content = commit.serialize_content();
        self.odb.write_raw(ObjectType::Commit, &content)
    }

    pub fn load(&self, id: &ObjectId) -> Result<Option<Commit>, OdbError> {
        match self.odb.read(id)? {
            Some(Object::Commit(c)) => Ok(Some(c)),
            Some(_) => Err(OdbError::Corrupt {
                oid: *id,
                reason: "expected commit".into(),
            }),
            None => Ok(None),
        }
    }

    pub fn has(&self, id: &ObjectId) -> bool {
        self.odb.contains(id)
    }
}

/// Typed view over annotated tag objects.
pub struct TagsView<'a> {
    odb: &'a ObjectDatabase,
}

impl<'a> TagsView<'a> {
    pub(crate) fn new(odb: &'a ObjectDatabase) -> Self {
        Self { odb }
    }

    pub fn store(&self, tag: &Tag) -> Result<ObjectId, OdbError> {
        let content = tag.serialize_content();
        self.odb.write_raw(ObjectType::Tag, &content)
    }

    pub fn load(&self, id: &ObjectId) -> Result<Option<Tag>, OdbError> {
        match self.odb.read(id)? {
            Some(Object::Tag(t)) => Ok(Some(t)),
            Some(_) => Err(OdbError::Corrupt {
                oid: *id,
                reason: "expected tag".into(),
            }),
            None => Ok(None),
        }
    }

    pub fn has(&self, id: &ObjectId) -> bool {
        self.odb.contains(id)
    }
}

fn filter_by_type(odb: &ObjectDatabase, want: ObjectType) -> Result<Vec<ObjectId>, OdbError> {
    let mut out = Vec::new();
    for id in odb.list()? {
        if let Some(info) = odb.read_header(&id)? {
            if info.obj_type == want {
                out.push(id);
            }
        }
    }
    Ok(out)
}

impl ObjectDatabase {
    pub fn blobs(&self) -> BlobsView<'_> {
        BlobsView::new(self)
    }

    pub fn trees(&self) -> TreesView<'_> {
        TreesView::new(self)
    }

    pub fn commits(&self) -> CommitsView<'_> {
        CommitsView::new(self)
    }

    pub fn tags(&self) -> TagsView<'_> {
        TagsView::new(self)
    }
}
