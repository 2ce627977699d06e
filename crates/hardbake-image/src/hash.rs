//! SHA-256 content verification.
//!
//! Validates integrity of stored layers and derives the chained cache keys
//! that let unchanged recipe prefixes reuse their layers.

use std::io::Read;
use std::path::Path;

use hardbake_common::error::{HardbakeError, Result};
use hardbake_common::types::Sha256Hash;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 hash of an in-memory blob.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> Sha256Hash {
    Sha256Hash::from_digest(&Sha256::digest(data))
}

/// Computes the SHA-256 hash of a file, streaming its contents.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Hash> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(|e| HardbakeError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| HardbakeError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Sha256Hash::from_digest(&hasher.finalize()))
}

/// Validates that a blob matches the expected SHA-256 hash.
///
/// # Errors
///
/// Returns `HardbakeError::HashMismatch` if the hashes do not match.
pub fn validate_bytes(resource: &str, data: &[u8], expected: &Sha256Hash) -> Result<()> {
    let actual = hash_bytes(data);
    if &actual != expected {
        return Err(HardbakeError::HashMismatch {
            resource: resource.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Validates that a file matches the expected SHA-256 hash.
///
/// # Errors
///
/// Returns `HardbakeError::HashMismatch` if the hashes do not match.
pub fn validate_hash(path: &Path, expected: &Sha256Hash) -> Result<()> {
    tracing::debug!(path = %path.display(), "validating SHA-256 hash");
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(HardbakeError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Derives the cache key of a directive from its parent's key.
///
/// The key covers the base image and every directive up to and including
/// this one, so two builds share a key exactly when they share the prefix.
#[must_use]
pub fn chain_key(parent: &Sha256Hash, directive: &str) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_hex().as_bytes());
    hasher.update(b"\n");
    hasher.update(directive.as_bytes());
    Sha256Hash::from_digest(&hasher.finalize())
}
