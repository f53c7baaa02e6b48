//! # Hashing Utilities
//!
//! SHA-256 helpers used for payload digests, metadata roots and the
//! identifiers the sandbox service hands out.

use sha2::{Digest, Sha256};

/// SHA-256 of the input as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hex-encoded SHA-256 of the input. 64 characters.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// SHA-256 over a sequence of parts, each length-prefixed so that
/// `["ab", "c"]` and `["a", "bc"]` hash differently.
pub fn sha256_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}
