//! Synchronization module for CRDT-backed project documents.
//!
//! This module implements the core synchronization logic between project
//! documents and their linked GitHub repositories. It provides:
//! - The Automerge-backed project document model (files + blobs)
//! - Content hashing for blob addressing and change detection
//! - Per-project advisory sync locks
//! - The push engine and repository status check

pub mod document;
pub mod engine;
pub mod hasher;
pub mod lock;

pub use document::{BlobInfo, FileNode, ProjectDocument};
pub use engine::{PushOutcome, ReconcileState, RepoSyncStatus, SyncEngine};
pub use hasher::hash_content;
pub use lock::SyncLockCoordinator;

use serde::{Deserialize, Serialize};

/// Unique identifier for a project
pub type ProjectId = String;

/// Unique identifier for a user
pub type UserId = String;

/// Lowercase hex SHA-256 of file content
pub type ContentHash = String;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization.
///
/// Each variant maps to a stable reason code so API and tool callers can
/// branch on failures without parsing messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncError {
    /// Project or repository link absent
    NotFound(String),
    /// Caller does not own the project
    Unauthorized(String),
    /// Lock contention or unresolved remote changes
    Conflict(String),
    /// Nothing to sync
    EmptyInput(String),
    /// A blob store or Git hosting call failed
    Upstream(String),
    /// Required credentials or settings absent
    Config(String),
    /// Local persistence failed
    Storage(String),
    /// Document encode/decode failed
    Document(String),
    /// Local filesystem operation failed
    Io(String),
}

impl SyncError {
    /// Stable machine-readable reason code for this error class.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SyncError::NotFound(_) => "not_found",
            SyncError::Unauthorized(_) => "unauthorized",
            SyncError::Conflict(_) => "conflict",
            SyncError::EmptyInput(_) => "empty_input",
            SyncError::Upstream(_) => "upstream_failure",
            SyncError::Config(_) => "configuration_error",
            SyncError::Storage(_) => "storage_error",
            SyncError::Document(_) => "document_error",
            SyncError::Io(_) => "io_error",
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::NotFound(msg)
            | SyncError::Unauthorized(msg)
            | SyncError::Conflict(msg)
            | SyncError::EmptyInput(msg)
            | SyncError::Config(msg) => write!(f, "{}", msg),
            SyncError::Upstream(msg) => write!(f, "Upstream failure: {}", msg),
            SyncError::Storage(msg) => write!(f, "Storage error: {}", msg),
            SyncError::Document(msg) => write!(f, "Document error: {}", msg),
            SyncError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<crate::storage::StorageError> for SyncError {
    fn from(err: crate::storage::StorageError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<document::DocumentError> for SyncError {
    fn from(err: document::DocumentError) -> Self {
        SyncError::Document(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

/// Configuration for the push engine
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Git branch the engine pushes to and compares against
    pub branch: String,
    /// Advisory lock timeout
    pub lock_timeout: std::time::Duration,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            lock_timeout: std::time::Duration::from_secs(30),
        }
    }
}

impl SyncEngineConfig {
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}
