//! Automerge document wrapper for project file snapshots.
//!
//! This module provides a high-level wrapper around the Automerge document
//! that backs each project: a flat map of file paths to content hashes plus
//! a map of content-addressed blob metadata. The CRDT is an implementation
//! detail of this module; callers only see paths, hashes, and blob info.

use automerge::{
    transaction::Transactable, AutoCommit, ObjId, ObjType, ReadDoc, ScalarValue, Value, ROOT,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during document operations
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Automerge error: {0}")]
    Automerge(#[from] automerge::AutomergeError),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Document corruption: {0}")]
    Corruption(String),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Keys used in the Automerge document structure
mod keys {
    pub const FILES: &str = "files";
    pub const BLOBS: &str = "blobs";

    // File node keys
    pub const HASH: &str = "hash";
    pub const MTIME: &str = "mtime";

    // Blob info keys
    pub const SIZE: &str = "size";
    pub const CONTENT: &str = "content";
}

/// A file entry in the project document: content hash plus modification time
/// in Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub hash: String,
    pub mtime: i64,
}

/// Metadata for one content-addressed blob. `content` is an inline cache of
/// the file text; when absent the payload lives only in the blob store under
/// `{project_id}/{hash}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub size: u64,
    pub content: Option<String>,
}

/// Project document with CRDT-backed file and blob maps
pub struct ProjectDocument {
    /// The underlying Automerge document
    doc: AutoCommit,
}

impl ProjectDocument {
    /// Create a new empty project document
    pub fn new() -> DocumentResult<Self> {
        let mut doc = AutoCommit::new();
        Self::init_structure(&mut doc)?;
        Ok(Self { doc })
    }

    /// Decode a document from binary Automerge data.
    ///
    /// An empty buffer decodes to an empty document rather than an error:
    /// a project that has never been written has no snapshot bytes yet.
    pub fn decode(data: &[u8]) -> DocumentResult<Self> {
        if data.is_empty() {
            return Self::new();
        }
        let doc = AutoCommit::load(data)?;
        Ok(Self { doc })
    }

    /// Encode the document to binary format
    pub fn encode(&mut self) -> Vec<u8> {
        self.doc.save()
    }

    /// Merge another document's state into this one
    pub fn merge(&mut self, other: &mut ProjectDocument) -> DocumentResult<()> {
        self.doc.merge(&mut other.doc)?;
        Ok(())
    }

    /// Initialize the document structure with required maps
    fn init_structure(doc: &mut AutoCommit) -> DocumentResult<()> {
        doc.put_object(ROOT, keys::FILES, ObjType::Map)?;
        doc.put_object(ROOT, keys::BLOBS, ObjType::Map)?;
        Ok(())
    }

    // =========================================================================
    // File Operations
    // =========================================================================

    /// List all files as `(path, node)` pairs, in key order.
    pub fn list_files(&self) -> DocumentResult<Vec<(String, FileNode)>> {
        let files_id = match self.root_map(keys::FILES)? {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let mut files = Vec::new();
        for path in self.doc.keys(&files_id) {
            if let Some((Value::Object(ObjType::Map), node_obj)) =
                self.doc.get(&files_id, path.clone())?
            {
                files.push((path.clone(), self.read_file_node(&path, &node_obj)?));
            }
        }
        Ok(files)
    }

    /// Get a single file entry by path
    pub fn get_file(&self, path: &str) -> DocumentResult<Option<FileNode>> {
        let files_id = match self.root_map(keys::FILES)? {
            Some(id) => id,
            None => return Ok(None),
        };

        if let Some((Value::Object(ObjType::Map), node_obj)) = self.doc.get(&files_id, path)? {
            Ok(Some(self.read_file_node(path, &node_obj)?))
        } else {
            Ok(None)
        }
    }

    /// Create or replace a file entry
    pub fn set_file(&mut self, path: &str, hash: &str, mtime: i64) -> DocumentResult<()> {
        validate_path(path)?;
        let files_id = self.ensure_root_map(keys::FILES)?;

        let node_id = self.doc.put_object(&files_id, path, ObjType::Map)?;
        self.doc.put(&node_id, keys::HASH, hash)?;
        self.doc.put(&node_id, keys::MTIME, mtime)?;
        Ok(())
    }

    /// Number of file entries
    pub fn file_count(&self) -> DocumentResult<usize> {
        Ok(match self.root_map(keys::FILES)? {
            Some(id) => self.doc.length(&id),
            None => 0,
        })
    }

    // =========================================================================
    // Blob Operations
    // =========================================================================

    /// Get blob metadata for a content hash, if recorded.
    ///
    /// A file entry's hash is not guaranteed to have blob metadata; callers
    /// fall back to the blob store when this returns `None`.
    pub fn get_blob_info(&self, hash: &str) -> DocumentResult<Option<BlobInfo>> {
        let blobs_id = match self.root_map(keys::BLOBS)? {
            Some(id) => id,
            None => return Ok(None),
        };

        if let Some((Value::Object(ObjType::Map), blob_obj)) = self.doc.get(&blobs_id, hash)? {
            let size = self.get_uint_prop(&blob_obj, keys::SIZE)?.unwrap_or(0);
            let content = self.get_string_prop(&blob_obj, keys::CONTENT)?;
            Ok(Some(BlobInfo { size, content }))
        } else {
            Ok(None)
        }
    }

    /// Record blob metadata for a content hash
    pub fn set_blob_info(
        &mut self,
        hash: &str,
        size: u64,
        content: Option<&str>,
    ) -> DocumentResult<()> {
        let blobs_id = self.ensure_root_map(keys::BLOBS)?;

        let blob_id = self.doc.put_object(&blobs_id, hash, ObjType::Map)?;
        self.doc.put(&blob_id, keys::SIZE, size)?;
        if let Some(text) = content {
            self.doc.put(&blob_id, keys::CONTENT, text)?;
        }
        Ok(())
    }

    // =========================================================================
    // Helper methods for reading properties
    // =========================================================================

    /// Get a root-level map object ID, `None` when absent or the wrong shape
    fn root_map(&self, key: &str) -> DocumentResult<Option<ObjId>> {
        Ok(self.doc.get(ROOT, key)?.and_then(|(v, id)| {
            if matches!(v, Value::Object(ObjType::Map)) {
                Some(id)
            } else {
                None
            }
        }))
    }

    /// Get a root-level map object ID, creating it if absent
    fn ensure_root_map(&mut self, key: &str) -> DocumentResult<ObjId> {
        if let Some(id) = self.root_map(key)? {
            return Ok(id);
        }
        Ok(self.doc.put_object(ROOT, key, ObjType::Map)?)
    }

    fn read_file_node(&self, path: &str, obj_id: &ObjId) -> DocumentResult<FileNode> {
        let hash = self
            .get_string_prop(obj_id, keys::HASH)?
            .ok_or_else(|| DocumentError::Corruption(format!("file entry missing hash: {}", path)))?;
        let mtime = self.get_int_prop(obj_id, keys::MTIME)?.unwrap_or(0);
        Ok(FileNode { hash, mtime })
    }

    fn get_string_prop(&self, obj_id: &ObjId, prop: &str) -> DocumentResult<Option<String>> {
        if let Some((Value::Scalar(s), _)) = self.doc.get(obj_id, prop)? {
            if let ScalarValue::Str(text) = s.as_ref() {
                return Ok(Some(text.to_string()));
            }
        }
        Ok(None)
    }

    fn get_int_prop(&self, obj_id: &ObjId, prop: &str) -> DocumentResult<Option<i64>> {
        if let Some((Value::Scalar(s), _)) = self.doc.get(obj_id, prop)? {
            if let ScalarValue::Int(n) = s.as_ref() {
                return Ok(Some(*n));
            }
        }
        Ok(None)
    }

    fn get_uint_prop(&self, obj_id: &ObjId, prop: &str) -> DocumentResult<Option<u64>> {
        if let Some((Value::Scalar(s), _)) = self.doc.get(obj_id, prop)? {
            if let ScalarValue::Uint(n) = s.as_ref() {
                return Ok(Some(*n));
            }
        }
        Ok(None)
    }
}

/// Reject paths that could escape a mirror directory or collide with the
/// root: empty, absolute, or containing `..` components.
fn validate_path(path: &str) -> DocumentResult<()> {
    if path.is_empty() || path.starts_with('/') || path.split('/').any(|c| c == "..") {
        return Err(DocumentError::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::hasher::hash_content;

    #[test]
    fn test_new_document_is_empty() {
        let doc = ProjectDocument::new().unwrap();
        assert!(doc.list_files().unwrap().is_empty());
        assert_eq!(doc.file_count().unwrap(), 0);
    }

    #[test]
    fn test_decode_empty_buffer_yields_empty_document() {
        let doc = ProjectDocument::decode(&[]).unwrap();
        assert!(doc.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_set_and_get_file() {
        let mut doc = ProjectDocument::new().unwrap();
        let hash = hash_content(b"# readme");
        doc.set_file("README.md", &hash, 1_700_000_000_000).unwrap();

        let node = doc.get_file("README.md").unwrap().unwrap();
        assert_eq!(node.hash, hash);
        assert_eq!(node.mtime, 1_700_000_000_000);
        assert!(doc.get_file("missing.txt").unwrap().is_none());
    }

    #[test]
    fn test_set_file_replaces_existing_entry() {
        let mut doc = ProjectDocument::new().unwrap();
        doc.set_file("src/main.rs", "aaa", 1).unwrap();
        doc.set_file("src/main.rs", "bbb", 2).unwrap();

        assert_eq!(doc.file_count().unwrap(), 1);
        let node = doc.get_file("src/main.rs").unwrap().unwrap();
        assert_eq!(node.hash, "bbb");
        assert_eq!(node.mtime, 2);
    }

    #[test]
    fn test_listing_counts_paths_not_hashes() {
        // Two paths sharing one content hash are still two files.
        let mut doc = ProjectDocument::new().unwrap();
        let shared = hash_content(b"same bytes");
        doc.set_file("a.txt", &shared, 1).unwrap();
        doc.set_file("b.txt", &shared, 1).unwrap();

        let files = doc.list_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|(_, node)| node.hash == shared));
    }

    #[test]
    fn test_blob_info_inline_and_absent() {
        let mut doc = ProjectDocument::new().unwrap();
        doc.set_blob_info("hash-1", 11, Some("hello world")).unwrap();
        doc.set_blob_info("hash-2", 2048, None).unwrap();

        let inline = doc.get_blob_info("hash-1").unwrap().unwrap();
        assert_eq!(inline.size, 11);
        assert_eq!(inline.content.as_deref(), Some("hello world"));

        let external = doc.get_blob_info("hash-2").unwrap().unwrap();
        assert_eq!(external.size, 2048);
        assert!(external.content.is_none());

        assert!(doc.get_blob_info("unknown").unwrap().is_none());
    }

    #[test]
    fn test_file_without_blob_entry_still_listed() {
        let mut doc = ProjectDocument::new().unwrap();
        doc.set_file("notes.txt", "deadbeef", 5).unwrap();

        assert_eq!(doc.list_files().unwrap().len(), 1);
        assert!(doc.get_blob_info("deadbeef").unwrap().is_none());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut doc = ProjectDocument::new().unwrap();
        let hash = hash_content(b"console.log('hi')");
        doc.set_file("index.js", &hash, 42).unwrap();
        doc.set_file("docs/guide.md", "cafe", 43).unwrap();
        doc.set_blob_info(&hash, 17, Some("console.log('hi')")).unwrap();

        let encoded = doc.encode();
        let restored = ProjectDocument::decode(&encoded).unwrap();

        let files = restored.list_files().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(
            restored.get_file("index.js").unwrap().unwrap(),
            FileNode { hash: hash.clone(), mtime: 42 }
        );
        assert_eq!(
            restored.get_blob_info(&hash).unwrap().unwrap(),
            BlobInfo { size: 17, content: Some("console.log('hi')".to_string()) }
        );
    }

    #[test]
    fn test_invalid_paths_rejected() {
        let mut doc = ProjectDocument::new().unwrap();
        assert!(doc.set_file("", "h", 0).is_err());
        assert!(doc.set_file("/etc/passwd", "h", 0).is_err());
        assert!(doc.set_file("../outside.txt", "h", 0).is_err());
        assert!(doc.set_file("nested/../../", "h", 0).is_err());
    }

    #[test]
    fn test_merge_concurrent_file_adds() {
        let mut doc1 = ProjectDocument::new().unwrap();
        doc1.set_file("shared.txt", "base", 1).unwrap();

        let encoded = doc1.encode();
        let mut doc2 = ProjectDocument::decode(&encoded).unwrap();

        doc1.set_file("left.txt", "l", 2).unwrap();
        doc2.set_file("right.txt", "r", 3).unwrap();

        doc1.merge(&mut doc2).unwrap();

        let paths: Vec<String> = doc1
            .list_files()
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        assert!(paths.contains(&"shared.txt".to_string()));
        assert!(paths.contains(&"left.txt".to_string()));
        assert!(paths.contains(&"right.txt".to_string()));
    }
}
