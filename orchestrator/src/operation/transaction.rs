//! Unsigned and signed transaction payloads.
//!
//! The builder service produces an [`UnsignedTransaction`]: an opaque
//! payload we never interpret, the [`SignerPayload`] the local signer
//! signs, and bookkeeping [`TransactionMetadata`]. Signing consumes the
//! unsigned transaction and yields a [`SignedEnvelope`], so a payload can
//! only ever be submitted once.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::Address;
use crate::crypto::sha256_hex;

// ---------------------------------------------------------------------------
// SignerPayload
// ---------------------------------------------------------------------------

/// The fields the sender's key commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerPayload {
    pub sender: Address,
    pub nonce: u64,
    /// Fee in the chain's smallest unit.
    pub fee: u64,
    #[serde(default)]
    pub memo: String,
    /// Serialized transaction body, opaque to us.
    pub transaction: String,
}

impl SignerPayload {
    /// Canonical byte encoding that is signed.
    ///
    /// Each field is length-prefixed (u64 LE) so no field boundary can be
    /// shifted without changing the bytes.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let nonce = self.nonce.to_le_bytes();
        let fee = self.fee.to_le_bytes();
        let fields: [&[u8]; 5] = [
            self.sender.as_str().as_bytes(),
            &nonce,
            &fee,
            self.memo.as_bytes(),
            self.transaction.as_bytes(),
        ];

        let mut buf = Vec::with_capacity(fields.iter().map(|f| f.len() + 8).sum());
        for field in fields {
            buf.extend_from_slice(&(field.len() as u64).to_le_bytes());
            buf.extend_from_slice(field);
        }
        buf
    }

    /// Hex SHA-256 of [`signable_bytes`](Self::signable_bytes). Handy as a
    /// log field; two payloads are the same iff their digests match.
    pub fn digest(&self) -> String {
        sha256_hex(&self.signable_bytes())
    }
}

// ---------------------------------------------------------------------------
// UnsignedTransaction
// ---------------------------------------------------------------------------

/// Derived addresses and storage roots returned alongside a build.
///
/// Everything is optional because each operation fills in a different
/// subset: a launch yields a collection address, a mint yields an NFT
/// address and metadata roots, a transfer yields neither.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_contract_address: Option<Address>,
    /// Secret keys of contracts deployed by this transaction. Only ever
    /// written to record files; never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_contract_private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_contract_private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft_contract_private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

impl fmt::Debug for TransactionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |k: &Option<String>| k.as_ref().map(|_| "<redacted>");
        f.debug_struct("TransactionMetadata")
            .field("collection_address", &self.collection_address)
            .field("nft_address", &self.nft_address)
            .field("admin_contract_address", &self.admin_contract_address)
            .field(
                "collection_contract_private_key",
                &redacted(&self.collection_contract_private_key),
            )
            .field(
                "admin_contract_private_key",
                &redacted(&self.admin_contract_private_key),
            )
            .field(
                "nft_contract_private_key",
                &redacted(&self.nft_contract_private_key),
            )
            .field("storage", &self.storage)
            .field("metadata_root", &self.metadata_root)
            .field("nft_name", &self.nft_name)
            .field("collection_name", &self.collection_name)
            .finish_non_exhaustive()
    }
}

/// A built transaction awaiting its signature.
///
/// Deliberately not `Clone`: it is moved into the signing step.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    /// Opaque body returned by the builder, echoed back on submission.
    pub raw: serde_json::Value,
    pub signer_payload: SignerPayload,
    #[serde(default)]
    pub metadata: TransactionMetadata,
}

impl UnsignedTransaction {
    pub fn sender(&self) -> &Address {
        &self.signer_payload.sender
    }

    pub fn nonce(&self) -> u64 {
        self.signer_payload.nonce
    }

    /// Attach a signature, consuming the transaction.
    pub fn into_signed(self, signature: TxSignature) -> SignedEnvelope {
        SignedEnvelope {
            transaction: self,
            signature,
        }
    }
}

// ---------------------------------------------------------------------------
// Signature and envelope
// ---------------------------------------------------------------------------

/// Serialized signature over a [`SignerPayload`], in the form the prover
/// accepts (hex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxSignature(String);

impl TxSignature {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unsigned transaction plus signature, ready for the prover.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedEnvelope {
    pub transaction: UnsignedTransaction,
    pub signature: TxSignature,
}

impl SignedEnvelope {
    pub fn sender(&self) -> &Address {
        self.transaction.sender()
    }

    pub fn nonce(&self) -> u64 {
        self.transaction.nonce()
    }

    pub fn metadata(&self) -> &TransactionMetadata {
        &self.transaction.metadata
    }
}
