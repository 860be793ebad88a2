//! Content hashing for blob addressing.
//!
//! File content is addressed by its SHA-256 digest, encoded as lowercase
//! hex. The digest doubles as the change-detection unit: identical content
//! hashes identically across files and across projects, so blobs deduplicate
//! naturally. Cross-project isolation comes from the `{project_id}/{hash}`
//! storage path, not from the hash itself.

use sha2::{Digest, Sha256};

/// Hash file content into its blob key.
pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
