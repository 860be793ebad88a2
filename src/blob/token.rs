//! Short-lived blob access token generation.
//!
//! The blob store authenticates requests with JWTs scoped to a single
//! project. The API mints them on demand so clients never hold long-lived
//! store credentials; the store itself verifies the claims.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::sync::{SyncError, SyncResult};

/// Default token lifetime: 15 minutes
const DEFAULT_TTL_SECONDS: u64 = 15 * 60;

/// Configuration for the token issuer
#[derive(Debug, Clone)]
pub struct BlobTokenConfig {
    /// HS256 signing secret shared with the blob store
    pub secret: String,
    /// Token TTL in seconds
    pub ttl_seconds: u64,
}

impl BlobTokenConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> SyncResult<Self> {
        let secret = std::env::var("BLOB_TOKEN_SECRET")
            .map_err(|_| SyncError::Config("BLOB_TOKEN_SECRET not set".to_string()))?;
        let ttl_seconds = std::env::var("BLOB_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TTL_SECONDS);

        Ok(Self::new(secret).with_ttl(ttl_seconds))
    }

    /// Set token TTL
    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> SyncResult<()> {
        if self.secret.is_empty() {
            return Err(SyncError::Config(
                "Blob token secret not configured".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BlobTokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }
}

/// Claims carried by a blob access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobTokenClaims {
    /// Subject: the project the token is scoped to
    pub sub: String,
    /// Issued at timestamp
    pub iat: u64,
    /// Expiration timestamp
    pub exp: u64,
    /// Not before timestamp
    pub nbf: u64,
    /// JWT ID
    pub jti: String,
}

/// A minted token with its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedBlobToken {
    /// The JWT token string
    pub token: String,
    /// Project the token is scoped to
    pub project_id: String,
    /// Token expiration timestamp
    pub expires_at: u64,
}

/// Issuer for short-lived blob access tokens
pub struct BlobTokenIssuer {
    config: BlobTokenConfig,
}

impl BlobTokenIssuer {
    pub fn new(config: BlobTokenConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create with empty config (token requests will fail until configured)
    pub fn unconfigured() -> Self {
        Self {
            config: BlobTokenConfig::default(),
        }
    }

    /// Check if the issuer is properly configured
    pub fn is_configured(&self) -> bool {
        self.config.validate().is_ok()
    }

    /// Mint a token scoped to one project
    pub fn issue(&self, project_id: &str) -> SyncResult<IssuedBlobToken> {
        self.config.validate()?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let exp = now + self.config.ttl_seconds;

        let claims = BlobTokenClaims {
            sub: project_id.to_string(),
            iat: now,
            exp,
            nbf: now,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(self.config.secret.as_bytes());
        let token = encode(&header, &claims, &key)
            .map_err(|e| SyncError::Config(format!("Blob token encoding failed: {}", e)))?;

        Ok(IssuedBlobToken {
            token,
            project_id: project_id.to_string(),
            expires_at: exp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    fn test_config() -> BlobTokenConfig {
        BlobTokenConfig::new("test-secret-that-is-long-enough")
    }

    #[test]
    fn test_config_validation() {
        assert!(test_config().validate().is_ok());
        assert!(BlobTokenConfig::default().validate().is_err());
    }

    #[test]
    fn test_issued_token_decodes() {
        let issuer = BlobTokenIssuer::new(test_config()).unwrap();
        let issued = issuer.issue("proj-1").unwrap();

        assert_eq!(issued.project_id, "proj-1");

        let decoded = decode::<BlobTokenClaims>(
            &issued.token,
            &DecodingKey::from_secret(b"test-secret-that-is-long-enough"),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap();
        assert_eq!(decoded.claims.sub, "proj-1");
        assert_eq!(decoded.claims.exp, issued.expires_at);
    }

    #[test]
    fn test_token_ttl_window() {
        let issuer = BlobTokenIssuer::new(test_config().with_ttl(3600)).unwrap();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        let issued = issuer.issue("proj-1").unwrap();
        assert!(issued.expires_at >= now + 3500);
        assert!(issued.expires_at <= now + 3700);
    }

    #[test]
    fn test_unconfigured_issuer() {
        let issuer = BlobTokenIssuer::unconfigured();
        assert!(!issuer.is_configured());
        assert!(issuer.issue("proj-1").is_err());
    }

    #[test]
    fn test_tokens_have_unique_ids() {
        let issuer = BlobTokenIssuer::new(test_config()).unwrap();
        let a = issuer.issue("proj-1").unwrap();
        let b = issuer.issue("proj-1").unwrap();
        assert_ne!(a.token, b.token);
    }
}
