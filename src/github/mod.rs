//! GitHub Git Data API integration.
//!
//! The push engine talks to Git hosting through the [`GitHost`] trait:
//! blob upload, ref/commit reads, and tree/commit/ref writes. The only
//! production implementation is [`GithubClient`]; tests substitute an
//! in-memory repository.

pub mod client;

pub use client::GithubClient;

use crate::sync::SyncResult;
use async_trait::async_trait;

/// File mode for regular blobs in a Git tree
pub const FILE_MODE: &str = "100644";

/// One entry of a tree about to be created
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: String,
    pub sha: String,
}

/// A commit and the tree it points at
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub tree_sha: String,
}

/// Git hosting operations the push engine and status check depend on
#[async_trait]
pub trait GitHost: Send + Sync {
    /// Whether credentials are present; checked before any sync work begins
    fn is_configured(&self) -> bool {
        true
    }

    /// Upload file content as a Git blob, returning its SHA
    async fn create_blob(&self, repo: &str, content: &[u8]) -> SyncResult<String>;

    /// Resolve a branch to its head commit SHA
    async fn get_ref(&self, repo: &str, branch: &str) -> SyncResult<String>;

    /// Read a commit and the tree it points at
    async fn get_commit(&self, repo: &str, commit_sha: &str) -> SyncResult<CommitInfo>;

    /// Create a tree on top of `base_tree` with the given blob entries
    async fn create_tree(
        &self,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> SyncResult<String>;

    /// Create a commit pointing at `tree_sha` with a single parent
    async fn create_commit(
        &self,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parent_sha: &str,
    ) -> SyncResult<String>;

    /// Fast-forward a branch to a commit
    async fn update_ref(&self, repo: &str, branch: &str, commit_sha: &str) -> SyncResult<()>;
}
