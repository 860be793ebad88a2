//! Blob store access.
//!
//! File payloads live in an external content-addressed store under
//! `{project_id}/{hash}`. This module provides the read client used when a
//! document's inline content cache misses, plus the short-lived access
//! token issuer ([`token::BlobTokenIssuer`]) the API hands to clients.

pub mod token;

pub use token::{BlobTokenConfig, BlobTokenIssuer, IssuedBlobToken};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::sync::{SyncError, SyncResult};

/// Read access to content-addressed blobs
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether credentials are present; checked before any sync work begins
    fn is_configured(&self) -> bool {
        true
    }

    /// Fetch one blob by project and content hash
    async fn fetch(&self, project_id: &str, hash: &str) -> SyncResult<Bytes>;
}

/// Configuration for the blob store client
#[derive(Debug, Clone, Default)]
pub struct BlobStoreConfig {
    /// Base URL of the blob store
    pub base_url: String,
    /// Bearer token scoped for reads
    pub read_token: String,
}

impl BlobStoreConfig {
    pub fn new(base_url: impl Into<String>, read_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            read_token: read_token.into(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> SyncResult<Self> {
        let base_url = std::env::var("BLOB_STORE_URL")
            .map_err(|_| SyncError::Config("BLOB_STORE_URL not set".to_string()))?;
        let read_token = std::env::var("BLOB_READ_TOKEN")
            .map_err(|_| SyncError::Config("BLOB_READ_TOKEN not set".to_string()))?;
        Ok(Self::new(base_url, read_token))
    }

    /// Validate the configuration
    pub fn validate(&self) -> SyncResult<()> {
        if self.base_url.is_empty() || self.read_token.is_empty() {
            return Err(SyncError::Config(
                "Blob store credentials not configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP client for the external blob store
#[derive(Clone)]
pub struct BlobStoreClient {
    http: reqwest::Client,
    config: BlobStoreConfig,
}

impl BlobStoreClient {
    pub fn new(config: BlobStoreConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            http: reqwest::Client::new(),
            config,
        })
    }

    /// Client without credentials; fetches fail with a configuration error
    pub fn unconfigured() -> Self {
        Self {
            http: reqwest::Client::new(),
            config: BlobStoreConfig::default(),
        }
    }
}

#[async_trait]
impl BlobStore for BlobStoreClient {
    fn is_configured(&self) -> bool {
        self.config.validate().is_ok()
    }

    async fn fetch(&self, project_id: &str, hash: &str) -> SyncResult<Bytes> {
        self.config.validate()?;

        let url = blob_url(&self.config.base_url, project_id, hash);
        debug!("Fetching blob {}/{}", project_id, hash);

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.config.read_token))
            .send()
            .await
            .map_err(|e| SyncError::Upstream(format!("Blob store request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Upstream(format!(
                "Blob store returned {} for {}/{}",
                status, project_id, hash
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| SyncError::Upstream(format!("Failed to read blob {}: {}", hash, e)))
    }
}

/// Blob address within the store: `{base}/{project_id}/{hash}`
fn blob_url(base_url: &str, project_id: &str, hash: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), project_id, hash)
}
