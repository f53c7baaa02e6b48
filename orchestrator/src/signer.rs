//! Local transaction signing.
//!
//! Signing is a pure function of (payload, key): no network, no clock. It
//! is separate from building because the key may live somewhere the
//! builder cannot reach (hardware wallet, remote signer). The only things
//! that can go wrong are a key that does not belong to the payload's
//! sender and, for remote signers, the signer itself failing.

use thiserror::Error;

use crate::crypto::AccountKeypair;
use crate::operation::{Address, SignerPayload, TxSignature};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("key for {key} cannot sign for sender {sender}")]
    SenderMismatch { sender: Address, key: Address },

    #[error("malformed signing key: {0}")]
    MalformedKey(String),
}

/// Produces signatures over [`SignerPayload`]s for a single account.
pub trait Signer: Send + Sync {
    /// The account this signer signs for.
    fn address(&self) -> Address;

    /// Sign the payload. Must be deterministic for a given payload.
    fn sign(&self, payload: &SignerPayload) -> Result<TxSignature, SignError>;
}

impl Signer for AccountKeypair {
    fn address(&self) -> Address {
        AccountKeypair::address(self)
    }

    fn sign(&self, payload: &SignerPayload) -> Result<TxSignature, SignError> {
        let own = AccountKeypair::address(self);
        if payload.sender != own {
            return Err(SignError::SenderMismatch {
                sender: payload.sender.clone(),
                key: own,
            });
        }
        let signature = self.sign_bytes(&payload.signable_bytes());
        Ok(TxSignature::new(signature.to_hex()))
    }
}

/// Parse a hex secret key into a signer, mapping the key error into the
/// signing taxonomy.
pub fn signer_from_hex(secret_hex: &str) -> Result<AccountKeypair, SignError> {
    AccountKeypair::from_hex(secret_hex).map_err(|e| SignError::MalformedKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AccountPublicKey, AccountSignature};

    fn payload_for(sender: Address) -> SignerPayload {
        SignerPayload {
            sender,
            nonce: 0,
            fee: 100_000_000,
            memo: "mint".into(),
            transaction: "body".into(),
        }
    }

    #[test]
    fn signing_same_payload_twice_is_identical() {
        let kp = AccountKeypair::from_seed(&[3u8; 32]);
        let payload = payload_for(kp.address());
        let a = Signer::sign(&kp, &payload).unwrap();
        let b = Signer::sign(&kp, &payload).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn signature_verifies_against_sender_address() {
        let kp = AccountKeypair::generate();
        let payload = payload_for(kp.address());
        let sig = Signer::sign(&kp, &payload).unwrap();

        let pk = AccountPublicKey::from_address(&payload.sender).unwrap();
        let raw = AccountSignature::from_hex(sig.as_str()).unwrap();
        assert!(pk.verify(&payload.signable_bytes(), &raw));
    }

    #[test]
    fn foreign_sender_is_rejected() {
        let kp = AccountKeypair::generate();
        let other = AccountKeypair::generate();
        let err = Signer::sign(&kp, &payload_for(other.address())).unwrap_err();
        assert!(matches!(err, SignError::SenderMismatch { .. }));
    }

    #[test]
    fn malformed_hex_key_maps_to_sign_error() {
        assert!(matches!(
            signer_from_hex("zz"),
            Err(SignError::MalformedKey(_))
        ));
    }
}
