//! Local pull mirror for agent workspaces.
//!
//! The mirror materializes a project's document state as plain files on
//! disk so command-line tools can read them. It is strictly one-way:
//! snapshot bytes come from a [`SnapshotSource`], file content resolves
//! inline-first with the blob store as fallback, and nothing is ever
//! written back.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::blob::BlobStore;
use crate::sync::document::ProjectDocument;
use crate::sync::{SyncError, SyncResult};

/// Read access to a project's raw CRDT snapshot
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, project_id: &str) -> SyncResult<Vec<u8>>;
}

// =============================================================================
// HTTP snapshot client
// =============================================================================

/// Fetches snapshots from the sync server's read endpoint
#[derive(Clone)]
pub struct ApiSnapshotClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiSnapshotClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl SnapshotSource for ApiSnapshotClient {
    async fn fetch_snapshot(&self, project_id: &str) -> SyncResult<Vec<u8>> {
        let url = snapshot_url(&self.base_url, project_id);

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| SyncError::Upstream(format!("Snapshot request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound("Project not found".to_string()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SyncError::Unauthorized("API token rejected".to_string()));
        }
        if !status.is_success() {
            return Err(SyncError::Upstream(format!(
                "Snapshot endpoint returned {} for {}",
                status, project_id
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Upstream(format!("Failed to read snapshot: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

/// Snapshot address on the sync server: `{base}/api/projects/{id}/snapshot`
fn snapshot_url(base_url: &str, project_id: &str) -> String {
    format!(
        "{}/api/projects/{}/snapshot",
        base_url.trim_end_matches('/'),
        project_id
    )
}

// =============================================================================
// Mirror configuration
// =============================================================================

/// Environment-driven configuration for the mirror binary
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub api_url: String,
    pub api_token: String,
    pub project_id: String,
    pub output_dir: PathBuf,
}

impl MirrorConfig {
    /// Read configuration from environment variables.
    ///
    /// `USPARK_API_URL`, `USPARK_API_TOKEN` and `USPARK_PROJECT_ID` are
    /// required; `USPARK_OUTPUT_DIR` defaults to `./uspark`.
    pub fn from_env() -> SyncResult<Self> {
        let api_url = std::env::var("USPARK_API_URL")
            .map_err(|_| SyncError::Config("USPARK_API_URL not set".to_string()))?;
        let api_token = std::env::var("USPARK_API_TOKEN")
            .map_err(|_| SyncError::Config("USPARK_API_TOKEN not set".to_string()))?;
        let project_id = std::env::var("USPARK_PROJECT_ID")
            .map_err(|_| SyncError::Config("USPARK_PROJECT_ID not set".to_string()))?;
        let output_dir =
            std::env::var("USPARK_OUTPUT_DIR").unwrap_or_else(|_| "./uspark".to_string());

        Ok(Self {
            api_url,
            api_token,
            project_id,
            output_dir: PathBuf::from(output_dir),
        })
    }
}

// =============================================================================
// Pull mirror
// =============================================================================

/// One-way mirror from a project document to a local directory
pub struct PullMirror<S, B> {
    source: S,
    blobs: B,
}

impl<S: SnapshotSource, B: BlobStore> PullMirror<S, B> {
    pub fn new(source: S, blobs: B) -> Self {
        Self { source, blobs }
    }

    /// Write every file in the project to `output_dir`; returns the count.
    ///
    /// The output directory is created even when the project has no files.
    /// A failure partway through leaves the files already written in place.
    pub async fn pull_all(&self, project_id: &str, output_dir: &Path) -> SyncResult<usize> {
        let doc = self.load_document(project_id).await?;
        let files = doc.list_files()?;

        tokio::fs::create_dir_all(output_dir).await?;

        let mut written = 0;
        for (path, node) in &files {
            let target = resolve_target(output_dir, path)?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = self.resolve_content(project_id, &doc, &node.hash).await?;
            tokio::fs::write(&target, &content).await?;
            debug!("Wrote {} ({} bytes)", target.display(), content.len());
            written += 1;
        }

        info!("Pulled {} file(s) into {}", written, output_dir.display());
        Ok(written)
    }

    /// Sorted file paths from CRDT metadata alone; never touches blobs
    pub async fn list_files(&self, project_id: &str) -> SyncResult<Vec<String>> {
        let doc = self.load_document(project_id).await?;
        let mut paths: Vec<String> = doc
            .list_files()?
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn load_document(&self, project_id: &str) -> SyncResult<ProjectDocument> {
        let snapshot = self.source.fetch_snapshot(project_id).await?;
        Ok(ProjectDocument::decode(&snapshot)?)
    }

    /// Resolve file bytes: inline document cache first, blob store after
    async fn resolve_content(
        &self,
        project_id: &str,
        doc: &ProjectDocument,
        hash: &str,
    ) -> SyncResult<Vec<u8>> {
        if let Some(info) = doc.get_blob_info(hash)? {
            if let Some(content) = info.content {
                return Ok(content.into_bytes());
            }
        }
        let bytes = self.blobs.fetch(project_id, hash).await?;
        Ok(bytes.to_vec())
    }
}

/// Join a document path onto the output directory, rejecting any path
/// that would land outside it.
fn resolve_target(output_dir: &Path, file_path: &str) -> SyncResult<PathBuf> {
    let relative = Path::new(file_path);
    if relative.is_absolute() {
        return Err(SyncError::Document(format!(
            "Unsafe file path in snapshot: {}",
            file_path
        )));
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(SyncError::Document(format!(
                    "Unsafe file path in snapshot: {}",
                    file_path
                )))
            }
        }
    }
    Ok(output_dir.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::hasher::hash_content;
    use bytes::Bytes;
    use std::collections::HashMap;
    use tempfile::tempdir;

    // ── fakes ────────────────────────────────────────────────────────────

    struct FakeSource {
        snapshots: HashMap<String, Vec<u8>>,
    }

    impl FakeSource {
        fn raw(project_id: &str, snapshot: Vec<u8>) -> Self {
            let mut snapshots = HashMap::new();
            snapshots.insert(project_id.to_string(), snapshot);
            Self { snapshots }
        }

        fn single(project_id: &str, doc: &mut ProjectDocument) -> Self {
            Self::raw(project_id, doc.encode())
        }

        fn none() -> Self {
            Self {
                snapshots: HashMap::new(),
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for FakeSource {
        async fn fetch_snapshot(&self, project_id: &str) -> SyncResult<Vec<u8>> {
            self.snapshots
                .get(project_id)
                .cloned()
                .ok_or_else(|| SyncError::NotFound("Project not found".to_string()))
        }
    }

    struct MapBlobs(HashMap<String, Vec<u8>>);

    impl MapBlobs {
        fn empty() -> Self {
            Self(HashMap::new())
        }

        fn with(hash: &str, bytes: &[u8]) -> Self {
            let mut map = HashMap::new();
            map.insert(hash.to_string(), bytes.to_vec());
            Self(map)
        }
    }

    #[async_trait]
    impl BlobStore for MapBlobs {
        async fn fetch(&self, _project_id: &str, hash: &str) -> SyncResult<Bytes> {
            self.0
                .get(hash)
                .map(|bytes| Bytes::from(bytes.clone()))
                .ok_or_else(|| {
                    SyncError::Upstream(format!("Blob store returned 404 Not Found for {}", hash))
                })
        }
    }

    fn doc_with_inline_files(files: &[(&str, &str)]) -> ProjectDocument {
        let mut doc = ProjectDocument::new().unwrap();
        for (path, content) in files.iter().copied() {
            let hash = hash_content(content.as_bytes());
            doc.set_file(path, &hash, 1_700_000_000_000).unwrap();
            doc.set_blob_info(&hash, content.len() as u64, Some(content))
                .unwrap();
        }
        doc
    }

    // ── pull_all ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_pull_empty_project_creates_directory() {
        let mut doc = ProjectDocument::new().unwrap();
        let mirror = PullMirror::new(FakeSource::single("p1", &mut doc), MapBlobs::empty());

        let dir = tempdir().unwrap();
        let out = dir.path().join("workspace");
        let written = mirror.pull_all("p1", &out).await.unwrap();

        assert_eq!(written, 0);
        assert!(out.is_dir());
    }

    #[tokio::test]
    async fn test_pull_writes_file_contents() {
        let mut doc = doc_with_inline_files(&[
            ("README.md", "# Project"),
            ("src/app/page.tsx", "export default function Page() {}"),
        ]);
        let mirror = PullMirror::new(FakeSource::single("p1", &mut doc), MapBlobs::empty());

        let dir = tempdir().unwrap();
        let written = mirror.pull_all("p1", dir.path()).await.unwrap();
        assert_eq!(written, 2);

        let readme = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert_eq!(readme, "# Project");
        let page = std::fs::read_to_string(dir.path().join("src/app/page.tsx")).unwrap();
        assert_eq!(page, "export default function Page() {}");
    }

    #[tokio::test]
    async fn test_sequential_pulls_are_identical() {
        let mut doc = doc_with_inline_files(&[("a.txt", "alpha"), ("b/c.txt", "gamma")]);
        let snapshot = doc.encode();

        let dir = tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");

        for out in [&first, &second] {
            let mirror =
                PullMirror::new(FakeSource::raw("p1", snapshot.clone()), MapBlobs::empty());
            assert_eq!(mirror.pull_all("p1", out).await.unwrap(), 2);
        }

        for path in ["a.txt", "b/c.txt"] {
            let left = std::fs::read(first.join(path)).unwrap();
            let right = std::fs::read(second.join(path)).unwrap();
            assert_eq!(left, right, "{} differs between pulls", path);
        }
    }

    #[tokio::test]
    async fn test_pull_prefers_inline_content() {
        let content = "inline wins";
        let hash = hash_content(content.as_bytes());
        let mut doc = doc_with_inline_files(&[("note.txt", content)]);

        // The blob store holds different bytes under the same hash; the
        // inline cache must shadow it.
        let mirror = PullMirror::new(
            FakeSource::single("p1", &mut doc),
            MapBlobs::with(&hash, b"stale remote bytes"),
        );

        let dir = tempdir().unwrap();
        mirror.pull_all("p1", dir.path()).await.unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("note.txt")).unwrap();
        assert_eq!(on_disk, "inline wins");
    }

    #[tokio::test]
    async fn test_pull_fetches_missing_content_from_blob_store() {
        let content = b"only in the blob store";
        let hash = hash_content(content);
        let mut doc = ProjectDocument::new().unwrap();
        doc.set_file("data.bin", &hash, 1).unwrap();
        doc.set_blob_info(&hash, content.len() as u64, None).unwrap();

        let mirror = PullMirror::new(
            FakeSource::single("p1", &mut doc),
            MapBlobs::with(&hash, content),
        );

        let dir = tempdir().unwrap();
        assert_eq!(mirror.pull_all("p1", dir.path()).await.unwrap(), 1);
        assert_eq!(
            std::fs::read(dir.path().join("data.bin")).unwrap(),
            content.to_vec()
        );
    }

    #[tokio::test]
    async fn test_pull_surfaces_blob_failure() {
        let hash = hash_content(b"gone");
        let mut doc = ProjectDocument::new().unwrap();
        doc.set_file("gone.txt", &hash, 1).unwrap();

        let mirror = PullMirror::new(FakeSource::single("p1", &mut doc), MapBlobs::empty());

        let dir = tempdir().unwrap();
        let err = mirror.pull_all("p1", dir.path()).await.unwrap_err();
        assert_eq!(err.reason_code(), "upstream_failure");
    }

    #[tokio::test]
    async fn test_pull_rejects_escaping_paths() {
        use automerge::{transaction::Transactable, AutoCommit, ObjType, ROOT};

        // Craft a snapshot with a traversal path that the document layer
        // would never produce itself.
        let mut doc = AutoCommit::new();
        let files = doc.put_object(ROOT, "files", ObjType::Map).unwrap();
        let entry = doc.put_object(&files, "../evil.txt", ObjType::Map).unwrap();
        doc.put(&entry, "hash", "deadbeef").unwrap();
        doc.put(&entry, "mtime", 1i64).unwrap();
        doc.put_object(ROOT, "blobs", ObjType::Map).unwrap();

        let mirror = PullMirror::new(FakeSource::raw("p1", doc.save()), MapBlobs::empty());

        let dir = tempdir().unwrap();
        let out = dir.path().join("inner");
        let err = mirror.pull_all("p1", &out).await.unwrap_err();
        assert_eq!(err.reason_code(), "document_error");
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn test_pull_unknown_project_is_not_found() {
        let mirror = PullMirror::new(FakeSource::none(), MapBlobs::empty());
        let dir = tempdir().unwrap();
        let err = mirror.pull_all("ghost", dir.path()).await.unwrap_err();
        assert_eq!(err.reason_code(), "not_found");
    }

    // ── list_files ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_list_files_sorted_without_blob_access() {
        // No inline content and an empty blob store: listing must still work
        let mut doc = ProjectDocument::new().unwrap();
        for path in ["zeta.txt", "alpha.txt", "src/main.rs"] {
            doc.set_file(path, &hash_content(path.as_bytes()), 1).unwrap();
        }

        let mirror = PullMirror::new(FakeSource::single("p1", &mut doc), MapBlobs::empty());
        let paths = mirror.list_files("p1").await.unwrap();
        assert_eq!(paths, vec!["alpha.txt", "src/main.rs", "zeta.txt"]);
    }

    // ── path handling ────────────────────────────────────────────────────

    #[test]
    fn test_resolve_target_rejects_traversal() {
        let out = Path::new("/srv/mirror");
        assert!(resolve_target(out, "docs/readme.md").is_ok());
        assert!(resolve_target(out, "/etc/passwd").is_err());
        assert!(resolve_target(out, "../outside.txt").is_err());
        assert!(resolve_target(out, "nested/../../outside.txt").is_err());
    }

    #[test]
    fn test_snapshot_url_shape() {
        assert_eq!(
            snapshot_url("https://api.uspark.dev", "proj-1"),
            "https://api.uspark.dev/api/projects/proj-1/snapshot"
        );
        assert_eq!(
            snapshot_url("https://api.uspark.dev/", "proj-1"),
            "https://api.uspark.dev/api/projects/proj-1/snapshot"
        );
    }
}
