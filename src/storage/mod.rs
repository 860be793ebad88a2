//! Storage module for project records and sync history using Sled.
//!
//! This module provides the embedded persistence layer behind the sync
//! engine: project records (with their binary Automerge snapshots),
//! repository links, and the append-only sync log. Callers go through
//! [`SyncStore`]; nothing else touches the database.

mod sled_store;

pub use sled_store::{StorageError, StoreStats, SyncStore};

use serde::{Deserialize, Serialize};

/// A project record: owner, current snapshot bytes, and a version counter
/// bumped on every document write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Unique project identifier
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Binary Automerge snapshot of the project document
    pub ydoc_data: Vec<u8>,
    /// Monotonic document version
    pub version: i64,
    /// Unix timestamp of creation
    pub created_at: i64,
    /// Unix timestamp of last modification
    pub updated_at: i64,
}

impl ProjectRecord {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            ydoc_data: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_doc(mut self, ydoc_data: Vec<u8>) -> Self {
        self.ydoc_data = ydoc_data;
        self
    }
}

/// The one GitHub repository a project is linked to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryLink {
    /// Linked project
    pub project_id: String,
    /// GitHub App installation the link was created under
    pub installation_id: i64,
    /// Numeric GitHub repository id
    pub repo_id: i64,
    /// Full repository name, "owner/repo"
    pub repo_name: String,
    /// Commit SHA of the last successful push, None until the first one
    pub last_sync_commit_sha: Option<String>,
    /// Unix timestamp of the last successful push
    pub last_sync_at: Option<i64>,
    /// Unix timestamp the link was created
    pub linked_at: i64,
}

impl RepositoryLink {
    pub fn new(
        project_id: impl Into<String>,
        installation_id: i64,
        repo_id: i64,
        repo_name: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            installation_id,
            repo_id,
            repo_name: repo_name.into(),
            last_sync_commit_sha: None,
            last_sync_at: None,
            linked_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Direction of a sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
}

/// Lifecycle state of a sync log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Success,
    Failed,
}

/// One entry in the append-only sync audit log.
///
/// Entries are created `pending` and finalized exactly once to `success`
/// or `failed`; a finalized entry is never touched again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Per-project sequence number, assigned on append
    pub seq: u64,
    /// Project the sync ran for
    pub project_id: String,
    /// Numeric GitHub repository id
    pub repo_id: i64,
    /// Push (outbound) or pull (inbound)
    pub direction: SyncDirection,
    /// Current lifecycle state
    pub status: SyncStatus,
    /// Paths included in the sync
    pub files_changed: Vec<String>,
    /// Commit SHA, set on success
    pub commit_sha: Option<String>,
    /// Failure message, set on failure
    pub error: Option<String>,
    /// Unix timestamp the entry was created
    pub started_at: i64,
    /// Unix timestamp the entry was finalized
    pub finished_at: Option<i64>,
}

impl SyncLogEntry {
    pub fn pending(
        project_id: impl Into<String>,
        repo_id: i64,
        direction: SyncDirection,
        files_changed: Vec<String>,
    ) -> Self {
        Self {
            seq: 0,
            project_id: project_id.into(),
            repo_id,
            direction,
            status: SyncStatus::Pending,
            files_changed,
            commit_sha: None,
            error: None,
            started_at: chrono::Utc::now().timestamp(),
            finished_at: None,
        }
    }
}

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the Sled database directory
    pub path: String,
    /// Cache size in bytes (default: 256MB)
    pub cache_size: u64,
    /// Flush interval in milliseconds (0 = immediate)
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/uspark.sled".to_string(),
            cache_size: 256 * 1024 * 1024,
            flush_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }
}
