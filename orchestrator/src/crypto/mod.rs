//! # Cryptographic Primitives
//!
//! Thin wrappers over audited implementations:
//!
//! - **Ed25519** (ed25519-dalek) for account keys and transaction signatures.
//! - **SHA-256** (sha2) for payload digests and derived identifiers.
//!
//! Nothing here is hand-rolled.

pub mod hash;
pub mod keys;

pub use hash::{sha256, sha256_hex, sha256_parts};
pub use keys::{AccountKeypair, AccountPublicKey, AccountSignature, KeyError};
