//! Push engine and repository status check.
//!
//! The engine orchestrates one-way pushes from a project's document state
//! to its linked GitHub repository: lock, guards, blob upload, tree/commit
//! construction, ref update, and the audit trail around all of it. The
//! status check compares the recorded sync pointer against the live branch
//! head to spot drift.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::blob::BlobStore;
use crate::github::{GitHost, TreeEntry};
use crate::storage::{RepositoryLink, SyncDirection, SyncLogEntry, SyncStatus, SyncStore};
use crate::sync::document::{FileNode, ProjectDocument};
use crate::sync::lock::SyncLockCoordinator;
use crate::sync::{SyncEngineConfig, SyncError, SyncResult};

/// Result of a successful push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushOutcome {
    pub commit_sha: String,
    pub files_count: usize,
    pub message: String,
}

/// Reconciliation state between the project and its repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileState {
    Clean,
    Diverged,
}

/// Report from the repository status check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSyncStatus {
    pub linked: bool,
    pub has_external_changes: bool,
    pub state: ReconcileState,
    pub last_sync_commit_sha: Option<String>,
    pub current_commit_sha: Option<String>,
    pub message: String,
}

/// Orchestrates pushes from project documents to linked GitHub repositories
pub struct SyncEngine<G, B> {
    store: SyncStore,
    locks: SyncLockCoordinator,
    github: G,
    blobs: B,
    config: SyncEngineConfig,
}

impl<G: GitHost, B: BlobStore> SyncEngine<G, B> {
    pub fn new(store: SyncStore, github: G, blobs: B, config: SyncEngineConfig) -> Self {
        let locks = SyncLockCoordinator::with_timeout(config.lock_timeout);
        Self {
            store,
            locks,
            github,
            blobs,
            config,
        }
    }

    /// The store backing this engine
    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    /// The lock coordinator backing this engine
    pub fn locks(&self) -> &SyncLockCoordinator {
        &self.locks
    }

    /// Push the project's current document state to its linked repository.
    ///
    /// Holds the project's sync lock for the full duration; the lock is
    /// released on every exit path.
    pub async fn push(&self, project_id: &str, user_id: &str) -> SyncResult<PushOutcome> {
        if !self.locks.acquire(project_id, user_id) {
            return Err(SyncError::Conflict(
                "Sync already in progress for this project".to_string(),
            ));
        }

        let result = self.push_locked(project_id, user_id).await;
        self.locks.release(project_id, user_id);

        match &result {
            Ok(outcome) => info!(
                "Pushed {} ({} files) as {}",
                project_id, outcome.files_count, outcome.commit_sha
            ),
            Err(e) => warn!("Push failed for {}: {}", project_id, e),
        }
        result
    }

    async fn push_locked(&self, project_id: &str, user_id: &str) -> SyncResult<PushOutcome> {
        // Unpulled remote changes would be clobbered by a push
        if self.has_pending_pull(project_id)? {
            return Err(SyncError::Conflict(
                "Remote changes detected, pull first".to_string(),
            ));
        }

        let project = self
            .store
            .get_project(project_id)?
            .ok_or_else(|| SyncError::NotFound("Project not found".to_string()))?;
        if project.user_id != user_id {
            return Err(SyncError::Unauthorized(
                "Project does not belong to this user".to_string(),
            ));
        }

        let link = self
            .store
            .get_link(project_id)?
            .ok_or_else(|| SyncError::NotFound("Repository not linked to project".to_string()))?;

        let doc = ProjectDocument::decode(&project.ydoc_data)?;
        let files = doc.list_files()?;
        if files.is_empty() {
            return Err(SyncError::EmptyInput("No files to sync".to_string()));
        }

        // Credential preflight runs before the log entry exists, so a
        // misconfigured deployment leaves no trace in the audit trail.
        if !self.github.is_configured() {
            return Err(SyncError::Config(
                "GitHub credentials not configured".to_string(),
            ));
        }
        let mut needs_blob_store = false;
        for (_, node) in &files {
            match doc.get_blob_info(&node.hash)? {
                Some(info) if info.content.is_some() => {}
                _ => {
                    needs_blob_store = true;
                    break;
                }
            }
        }
        if needs_blob_store && !self.blobs.is_configured() {
            return Err(SyncError::Config(
                "Blob store credentials not configured".to_string(),
            ));
        }

        let paths: Vec<String> = files.iter().map(|(path, _)| path.clone()).collect();
        let entry = SyncLogEntry::pending(project_id, link.repo_id, SyncDirection::Push, paths);
        let seq = self.store.append_log(entry)?;

        match self.commit_files(project_id, &link, &doc, &files).await {
            Ok(commit_sha) => {
                let synced_at = chrono::Utc::now().timestamp();
                if let Err(e) = self.store.update_sync_pointer(project_id, &commit_sha, synced_at)
                {
                    let err = SyncError::from(e);
                    self.finalize_failed(project_id, seq, &err);
                    return Err(err);
                }
                if let Err(e) = self.store.finalize_log(
                    project_id,
                    seq,
                    SyncStatus::Success,
                    Some(&commit_sha),
                    None,
                ) {
                    warn!(
                        "Failed to finalize sync log entry {}:{}: {}",
                        project_id, seq, e
                    );
                }
                Ok(PushOutcome {
                    commit_sha,
                    files_count: files.len(),
                    message: format!(
                        "Successfully synced {} file(s) to {}",
                        files.len(),
                        link.repo_name
                    ),
                })
            }
            Err(e) => {
                self.finalize_failed(project_id, seq, &e);
                Err(e)
            }
        }
    }

    fn finalize_failed(&self, project_id: &str, seq: u64, err: &SyncError) {
        if let Err(log_err) = self.store.finalize_log(
            project_id,
            seq,
            SyncStatus::Failed,
            None,
            Some(&err.to_string()),
        ) {
            error!(
                "Failed to record sync failure for {}:{}: {}",
                project_id, seq, log_err
            );
        }
    }

    /// A pull entry still pending after the newest successful pull means
    /// remote changes have not been folded in yet.
    fn has_pending_pull(&self, project_id: &str) -> SyncResult<bool> {
        let entries = self.store.log_for_project(project_id)?;
        let last_ok_pull = entries
            .iter()
            .filter(|e| e.direction == SyncDirection::Pull && e.status == SyncStatus::Success)
            .map(|e| e.seq)
            .max()
            .unwrap_or(0);
        Ok(entries.iter().any(|e| {
            e.direction == SyncDirection::Pull
                && e.status == SyncStatus::Pending
                && e.seq > last_ok_pull
        }))
    }

    /// Upload blobs and build the tree/commit/ref chain for one push
    async fn commit_files(
        &self,
        project_id: &str,
        link: &RepositoryLink,
        doc: &ProjectDocument,
        files: &[(String, FileNode)],
    ) -> SyncResult<String> {
        let repo = &link.repo_name;

        // Distinct hashes upload once; paths sharing content reuse the blob
        let mut blob_shas: HashMap<String, String> = HashMap::new();
        let mut entries = Vec::with_capacity(files.len());
        for (path, node) in files {
            let sha = match blob_shas.get(&node.hash) {
                Some(sha) => sha.clone(),
                None => {
                    let content = self.resolve_content(project_id, doc, &node.hash).await?;
                    let sha = self.github.create_blob(repo, &content).await?;
                    blob_shas.insert(node.hash.clone(), sha.clone());
                    sha
                }
            };
            entries.push(TreeEntry {
                path: path.clone(),
                sha,
            });
        }

        let head_sha = self.github.get_ref(repo, &self.config.branch).await?;
        let base_commit = self.github.get_commit(repo, &head_sha).await?;
        let tree_sha = self
            .github
            .create_tree(repo, &base_commit.tree_sha, &entries)
            .await?;
        let message = format!("Sync {} file(s) from uspark", files.len());
        let commit_sha = self
            .github
            .create_commit(repo, &message, &tree_sha, &head_sha)
            .await?;
        self.github
            .update_ref(repo, &self.config.branch, &commit_sha)
            .await?;

        debug!(
            "Created commit {} on {}#{}",
            commit_sha, repo, self.config.branch
        );
        Ok(commit_sha)
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

    /// Compare the recorded sync pointer with the live branch head.
    pub async fn status(&self, project_id: &str) -> SyncResult<RepoSyncStatus> {
        let link = match self.store.get_link(project_id)? {
            Some(link) => link,
            None => {
                return Ok(RepoSyncStatus {
                    linked: false,
                    has_external_changes: false,
                    state: ReconcileState::Clean,
                    last_sync_commit_sha: None,
                    current_commit_sha: None,
                    message: "No GitHub repository linked".to_string(),
                })
            }
        };

        let last_sync = match link.last_sync_commit_sha {
            Some(sha) => sha,
            None => {
                return Ok(RepoSyncStatus {
                    linked: true,
                    has_external_changes: false,
                    state: ReconcileState::Clean,
                    last_sync_commit_sha: None,
                    current_commit_sha: None,
                    message: "Repository linked but never synced".to_string(),
                })
            }
        };

        let head = self
            .github
            .get_ref(&link.repo_name, &self.config.branch)
            .await?;

        if head == last_sync {
            Ok(RepoSyncStatus {
                linked: true,
                has_external_changes: false,
                state: ReconcileState::Clean,
                last_sync_commit_sha: Some(last_sync),
                current_commit_sha: Some(head),
                message: "Repository is up to date".to_string(),
            })
        } else {
            // One SHA comparison cannot tell our own out-of-band pushes
            // from someone else's; both read as external changes.
            Ok(RepoSyncStatus {
                linked: true,
                has_external_changes: true,
                state: ReconcileState::Diverged,
                last_sync_commit_sha: Some(last_sync),
                current_commit_sha: Some(head),
                message: "Repository was modified outside this project".to_string(),
            })
        }
    }
}
