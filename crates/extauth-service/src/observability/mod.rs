//! Observability for the authorization service.
//!
//! # Privacy by Default
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicitly allow-listed
//! fields. Fields fall into three groups:
//! - **SAFE**: logged in plaintext (hosts, plugin names, decisions)
//! - **HASHED**: SHA-256 prefix for correlation (issued tokens)
//! - **NEVER**: never logged (private keys, identity objects, token bodies)

pub mod metrics;

use sha2::{Digest, Sha256};

/// Hash a value for correlation in logs (SHA-256, first 8 hex chars)
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.get(..4).unwrap_or_default())
}
