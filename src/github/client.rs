//! Authenticated client for the GitHub Git Data API.
//!
//! Every push builds new Git objects bottom-up: blobs, then a tree on top
//! of the branch's current base tree, then a commit, then the ref update.
//! Calls are plain REST against `api.github.com` with a bearer token.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::{CommitInfo, GitHost, TreeEntry, FILE_MODE};
use crate::sync::{SyncError, SyncResult};

const GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "uspark-sync";

/// GitHub API client holding an installation or personal access token
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    token: String,
}

impl GithubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
        }
    }

    /// Build a client from the `GITHUB_TOKEN` environment variable
    pub fn from_env() -> SyncResult<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .map_err(|_| SyncError::Config("GITHUB_TOKEN not set".to_string()))?;
        Ok(Self::new(token))
    }

    /// Client without credentials; the engine's preflight refuses to use it
    pub fn unconfigured() -> Self {
        Self::new("")
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> SyncResult<T> {
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| SyncError::Upstream(format!("GitHub {} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Upstream(format!(
                "GitHub {} returned {}",
                what, status
            )));
        }

        response.json::<T>().await.map_err(|e| {
            SyncError::Upstream(format!("Failed to parse GitHub {} response: {}", what, e))
        })
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        what: &str,
    ) -> SyncResult<T> {
        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::Upstream(format!("GitHub {} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Upstream(format!(
                "GitHub {} returned {}",
                what, status
            )));
        }

        response.json::<T>().await.map_err(|e| {
            SyncError::Upstream(format!("Failed to parse GitHub {} response: {}", what, e))
        })
    }
}

#[async_trait]
impl GitHost for GithubClient {
    fn is_configured(&self) -> bool {
        !self.token.is_empty()
    }

    async fn create_blob(&self, repo: &str, content: &[u8]) -> SyncResult<String> {
        debug!("Creating Git blob in {} ({} bytes)", repo, content.len());
        let url = format!("{}/repos/{}/git/blobs", GITHUB_API_URL, repo);
        let body = CreateBlobRequest {
            content: BASE64.encode(content),
            encoding: "base64",
        };
        let response: ShaResponse = self.post_json(&url, &body, "create-blob").await?;
        Ok(response.sha)
    }

    async fn get_ref(&self, repo: &str, branch: &str) -> SyncResult<String> {
        let url = format!("{}/repos/{}/git/ref/heads/{}", GITHUB_API_URL, repo, branch);
        let response: RefResponse = self.get_json(&url, "get-ref").await?;
        Ok(response.object.sha)
    }

    async fn get_commit(&self, repo: &str, commit_sha: &str) -> SyncResult<CommitInfo> {
        let url = format!("{}/repos/{}/git/commits/{}", GITHUB_API_URL, repo, commit_sha);
        let response: CommitResponse = self.get_json(&url, "get-commit").await?;
        Ok(CommitInfo {
            sha: response.sha,
            tree_sha: response.tree.sha,
        })
    }

    async fn create_tree(
        &self,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> SyncResult<String> {
        debug!("Creating Git tree in {} with {} entries", repo, entries.len());
        let url = format!("{}/repos/{}/git/trees", GITHUB_API_URL, repo);
        let body = CreateTreeRequest {
            base_tree: base_tree.to_string(),
            tree: entries
                .iter()
                .map(|entry| TreeEntryBody {
                    path: entry.path.clone(),
                    mode: FILE_MODE,
                    entry_type: "blob",
                    sha: entry.sha.clone(),
                })
                .collect(),
        };
        let response: ShaResponse = self.post_json(&url, &body, "create-tree").await?;
        Ok(response.sha)
    }

    async fn create_commit(
        &self,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parent_sha: &str,
    ) -> SyncResult<String> {
        let url = format!("{}/repos/{}/git/commits", GITHUB_API_URL, repo);
        let body = CreateCommitRequest {
            message: message.to_string(),
            tree: tree_sha.to_string(),
            parents: vec![parent_sha.to_string()],
        };
        let response: ShaResponse = self.post_json(&url, &body, "create-commit").await?;
        Ok(response.sha)
    }

    async fn update_ref(&self, repo: &str, branch: &str, commit_sha: &str) -> SyncResult<()> {
        debug!("Updating {}#{} to {}", repo, branch, commit_sha);
        let url = format!("{}/repos/{}/git/refs/heads/{}", GITHUB_API_URL, repo, branch);
        let body = UpdateRefRequest {
            sha: commit_sha.to_string(),
            force: false,
        };

        let response = self
            .http
            .patch(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Upstream(format!("GitHub update-ref request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Upstream(format!(
                "GitHub update-ref returned {}",
                status
            )));
        }
        Ok(())
    }
}

// ── request/response bodies ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateBlobRequest {
    content: String,
    encoding: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateTreeRequest {
    base_tree: String,
    tree: Vec<TreeEntryBody>,
}

#[derive(Debug, Serialize)]
struct TreeEntryBody {
    path: String,
    mode: &'static str,
    #[serde(rename = "type")]
    entry_type: &'static str,
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreateCommitRequest {
    message: String,
    tree: String,
    parents: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UpdateRefRequest {
    sha: String,
    force: bool,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    tree: TreeRef,
}

#[derive(Debug, Deserialize)]
struct TreeRef {
    sha: String,
}
