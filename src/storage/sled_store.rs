//! Sled-based storage for project records, repository links, and sync history.
//!
//! This module persists the three record kinds the sync engine works with:
//! - Project records with their binary Automerge snapshots
//! - Repository links (one per project)
//! - The append-only sync log, keyed per project by sequence number
//!
//! All records are bincode-encoded. Writes go through a single store type so
//! the version counter and log sequencing have one owner.

use parking_lot::Mutex;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::{ProjectRecord, RepositoryLink, StorageConfig, SyncLogEntry, SyncStatus};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Tree names for different record kinds
const TREE_PROJECTS: &str = "projects";
const TREE_REPO_LINKS: &str = "repo_links";
const TREE_SYNC_LOG: &str = "sync_log";

/// Sled-based store for sync engine records
#[derive(Clone)]
pub struct SyncStore {
    db: Arc<Db>,
    projects: Tree,
    repo_links: Tree,
    sync_log: Tree,
    /// Serializes log-sequence allocation across clones
    append_guard: Arc<Mutex<()>>,
}

impl SyncStore {
    /// Open or create a store at the configured path
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let path = Path::new(&config.path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        let projects = db.open_tree(TREE_PROJECTS)?;
        let repo_links = db.open_tree(TREE_REPO_LINKS)?;
        let sync_log = db.open_tree(TREE_SYNC_LOG)?;

        Ok(Self {
            db: Arc::new(db),
            projects,
            repo_links,
            sync_log,
            append_guard: Arc::new(Mutex::new(())),
        })
    }

    /// Open with default configuration
    pub fn open_default() -> StorageResult<Self> {
        Self::open(StorageConfig::default())
    }

    // =========================================================================
    // Project records
    // =========================================================================

    /// Create a new project record; fails if the id is taken
    pub fn create_project(&self, record: &ProjectRecord) -> StorageResult<()> {
        if self.projects.contains_key(record.id.as_bytes())? {
            return Err(StorageError::AlreadyExists(record.id.clone()));
        }
        let bytes = bincode::serialize(record)?;
        self.projects.insert(record.id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Load a project record
    pub fn get_project(&self, project_id: &str) -> StorageResult<Option<ProjectRecord>> {
        match self.projects.get(project_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Replace a project's snapshot bytes, bumping its version counter.
    ///
    /// Every document mutation ends here: snapshot write plus version
    /// increment are one persisted step.
    pub fn update_project_doc(
        &self,
        project_id: &str,
        ydoc_data: Vec<u8>,
    ) -> StorageResult<ProjectRecord> {
        let mut record = self
            .get_project(project_id)?
            .ok_or_else(|| StorageError::NotFound(project_id.to_string()))?;

        record.ydoc_data = ydoc_data;
        record.version += 1;
        record.updated_at = chrono::Utc::now().timestamp();

        let bytes = bincode::serialize(&record)?;
        self.projects.insert(project_id.as_bytes(), bytes)?;
        Ok(record)
    }

    /// Number of stored projects
    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    // =========================================================================
    // Repository links
    // =========================================================================

    /// Create or replace a project's repository link
    pub fn upsert_link(&self, link: &RepositoryLink) -> StorageResult<()> {
        let bytes = bincode::serialize(link)?;
        self.repo_links.insert(link.project_id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Load a project's repository link
    pub fn get_link(&self, project_id: &str) -> StorageResult<Option<RepositoryLink>> {
        match self.repo_links.get(project_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record the commit a successful push landed as
    pub fn update_sync_pointer(
        &self,
        project_id: &str,
        commit_sha: &str,
        synced_at: i64,
    ) -> StorageResult<()> {
        let mut link = self
            .get_link(project_id)?
            .ok_or_else(|| StorageError::NotFound(format!("link for {}", project_id)))?;

        link.last_sync_commit_sha = Some(commit_sha.to_string());
        link.last_sync_at = Some(synced_at);

        let bytes = bincode::serialize(&link)?;
        self.repo_links.insert(project_id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Remove a project's repository link; returns whether one existed
    pub fn remove_link(&self, project_id: &str) -> StorageResult<bool> {
        Ok(self.repo_links.remove(project_id.as_bytes())?.is_some())
    }

    // =========================================================================
    // Sync log
    // =========================================================================

    /// Append a log entry, assigning it the project's next sequence number
    pub fn append_log(&self, mut entry: SyncLogEntry) -> StorageResult<u64> {
        let _guard = self.append_guard.lock();

        let seq = self.latest_log_seq(&entry.project_id)? + 1;
        entry.seq = seq;

        let key = format!("{}:{:020}", entry.project_id, seq);
        let bytes = bincode::serialize(&entry)?;
        self.sync_log.insert(key.as_bytes(), bytes)?;
        Ok(seq)
    }

    /// Finalize a pending entry exactly once.
    ///
    /// Finalized entries are immutable; a second finalization attempt fails.
    pub fn finalize_log(
        &self,
        project_id: &str,
        seq: u64,
        status: SyncStatus,
        commit_sha: Option<&str>,
        error: Option<&str>,
    ) -> StorageResult<()> {
        let key = format!("{}:{:020}", project_id, seq);

        let mut entry: SyncLogEntry = match self.sync_log.get(key.as_bytes())? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => {
                return Err(StorageError::NotFound(format!(
                    "sync log entry {}:{}",
                    project_id, seq
                )))
            }
        };

        if entry.status != SyncStatus::Pending {
            return Err(StorageError::AlreadyExists(format!(
                "sync log entry {}:{} already finalized",
                project_id, seq
            )));
        }

        entry.status = status;
        entry.commit_sha = commit_sha.map(|s| s.to_string());
        entry.error = error.map(|s| s.to_string());
        entry.finished_at = Some(chrono::Utc::now().timestamp());

        let bytes = bincode::serialize(&entry)?;
        self.sync_log.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// All log entries for a project, oldest first
    pub fn log_for_project(&self, project_id: &str) -> StorageResult<Vec<SyncLogEntry>> {
        let prefix = format!("{}:", project_id);
        let mut entries = Vec::new();
        for item in self.sync_log.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    /// Latest assigned log sequence for a project, 0 when none
    fn latest_log_seq(&self, project_id: &str) -> StorageResult<u64> {
        let prefix = format!("{}:", project_id);

        // Scan in reverse to find the last key
        if let Some(item) = self.sync_log.scan_prefix(prefix.as_bytes()).next_back() {
            let (key, _) = item?;
            let key_str = String::from_utf8_lossy(&key);
            if let Some(seq_str) = key_str.split(':').last() {
                if let Ok(seq) = seq_str.parse::<u64>() {
                    return Ok(seq);
                }
            }
        }
        Ok(0)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Force flush all pending writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            project_count: self.projects.len(),
            link_count: self.repo_links.len(),
            log_entry_count: self.sync_log.len(),
            total_size_bytes: self.db.size_on_disk().unwrap_or(0),
        }
    }
}

/// Statistics about the store
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub project_count: usize,
    pub link_count: usize,
    pub log_entry_count: usize,
    pub total_size_bytes: u64,
}

impl Drop for SyncStore {
    fn drop(&mut self) {
        // Attempt to flush on drop, but don't panic
        let _ = self.flush();
    }
}
