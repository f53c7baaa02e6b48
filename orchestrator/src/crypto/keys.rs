//! # Account Keys
//!
//! Ed25519 keypairs for the accounts that sign workflow transactions.
//!
//! Every sender in a workflow (collection creator, NFT holder, buyer) is
//! identified by an [`Address`] derived from its public key. The address is
//! the base58 encoding of the 32-byte verifying key, which is also what the
//! sandbox prover uses to check that a signature belongs to the sender.
//!
//! ## Security considerations
//!
//! - Private keys are zeroized on drop (ed25519-dalek does this for us).
//! - Key generation uses `OsRng`.
//! - Key bytes are never logged. `Debug` prints the address only.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::operation::Address;

/// Errors that can occur while loading or using account keys.
///
/// Deliberately vague about *why* a key was rejected; error messages are
/// not a good place to leak hints about key material.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key: expected {SECRET_KEY_LENGTH} hex-encoded bytes")]
    InvalidSecretKey,

    #[error("invalid public key: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("address {0} does not encode a public key")]
    MalformedAddress(String),
}

// ---------------------------------------------------------------------------
// AccountKeypair
// ---------------------------------------------------------------------------

/// An account keypair wrapping an Ed25519 signing key.
///
/// `AccountKeypair` does NOT implement `Serialize`. Exporting a secret key
/// should be an explicit call to [`AccountKeypair::secret_key_hex`], never a
/// side effect of dumping a struct to JSON.
///
/// # Examples
///
/// ```
/// use nftflow_orchestrator::crypto::AccountKeypair;
///
/// let kp = AccountKeypair::generate();
/// let sig = kp.sign_bytes(b"mint one");
/// assert!(kp.public_key().verify(b"mint one", &sig));
/// ```
pub struct AccountKeypair {
    signing_key: SigningKey,
}

impl AccountKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Construct a keypair deterministically from a 32-byte seed.
    ///
    /// In Ed25519 the 32-byte secret key *is* the seed. Tests use this to get
    /// stable addresses.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Reconstruct a keypair from a hex-encoded secret key.
    ///
    /// This is how accounts are loaded from the CLI config file.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; SECRET_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Returns the public half of this keypair.
    pub fn public_key(&self) -> AccountPublicKey {
        AccountPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// The on-chain address of this account.
    pub fn address(&self) -> Address {
        self.public_key().to_address()
    }

    /// Sign raw bytes. Deterministic for a given (key, message) pair.
    pub fn sign_bytes(&self, message: &[u8]) -> AccountSignature {
        AccountSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Export the secret key as hex.
    ///
    /// **Handle with care.** Only the `keygen` subcommand should ever call this.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl Clone for AccountKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for AccountKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountKeypair({})", self.address())
    }
}

impl PartialEq for AccountKeypair {
    /// Keypairs compare by public key; secret material is never compared.
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for AccountKeypair {}

// ---------------------------------------------------------------------------
// AccountPublicKey
// ---------------------------------------------------------------------------

/// The public half of an account, safe to share.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountPublicKey {
    bytes: [u8; 32],
}

impl AccountPublicKey {
    /// Parse the public key encoded in an address.
    ///
    /// Fails if the address is not base58, is the wrong length, or is not a
    /// valid curve point.
    pub fn from_address(address: &Address) -> Result<Self, KeyError> {
        let malformed = || KeyError::MalformedAddress(address.to_string());
        let decoded = bs58::decode(address.as_str())
            .into_vec()
            .map_err(|_| malformed())?;
        let bytes: [u8; 32] = decoded.as_slice().try_into().map_err(|_| malformed())?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    /// Parse a hex-encoded public key.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let decoded = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey)?;
        let bytes: [u8; 32] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Base58 address form.
    pub fn to_address(&self) -> Address {
        Address::new(bs58::encode(self.bytes).into_string())
    }

    /// Hex form, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Verify a signature against this public key.
    ///
    /// Returns a plain `bool`: callers only ever want yes/no.
    pub fn verify(&self, message: &[u8], signature: &AccountSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature.bytes.as_slice()) else {
            return false;
        };
        verifying_key
            .verify(message, &DalekSignature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

impl fmt::Display for AccountPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for AccountPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// AccountSignature
// ---------------------------------------------------------------------------

/// An Ed25519 signature. Always 64 bytes when produced by this crate; a
/// signature of any other length simply fails verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSignature {
    bytes: Vec<u8>,
}

impl AccountSignature {
    /// Parse a hex-encoded signature.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self {
            bytes: hex::decode(s)?,
        })
    }

    /// Hex form, 128 characters for a valid signature.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for AccountSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "AccountSignature({}...)", &hex[..hex.len().min(16)])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
