//! Normalized request identity for artifact keys.

use sha2::{Digest, Sha256};

/// Compute the artifact key for a request. `url` must already be canonical.
pub fn compute_artifact_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
