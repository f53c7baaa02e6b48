//! Core value types shared by requests, transactions and collaborators.
//!
//! Identifiers handed out by the remote service (`JobHandle`,
//! `SettlementHash`) are opaque strings; we wrap them so a job id can never
//! be passed where a settlement hash is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A ledger account or contract address (base58).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cheap shape check: non-empty base58 that decodes to at least 20 bytes.
    ///
    /// This is what a builder can reject up front. Whether the address is a
    /// valid curve point is the signer's problem.
    pub fn is_well_formed(&self) -> bool {
        match bs58::decode(&self.0).into_vec() {
            Ok(bytes) => bytes.len() >= 20,
            Err(_) => false,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of an in-flight proof job on the prover service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a transaction accepted for ledger inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementHash(String);

impl SettlementHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SettlementHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// OperationKind
// ---------------------------------------------------------------------------

/// Fieldless discriminant of an operation, used for logging, metrics and
/// the `txType` tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    LaunchCollection,
    Mint,
    Approve,
    Sell,
    Buy,
    Transfer,
}

impl OperationKind {
    /// The `txType` tag the hosted API uses.
    pub fn tx_type(&self) -> &'static str {
        match self {
            Self::LaunchCollection => "nft:launch",
            Self::Mint => "nft:mint",
            Self::Approve => "nft:approve",
            Self::Sell => "nft:sell",
            Self::Buy => "nft:buy",
            Self::Transfer => "nft:transfer",
        }
    }

    /// Whether this operation changes an existing NFT and is therefore
    /// subject to its capability flags.
    pub fn touches_existing_nft(&self) -> bool {
        matches!(
            self,
            Self::Approve | Self::Sell | Self::Buy | Self::Transfer
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LaunchCollection => "launch",
            Self::Mint => "mint",
            Self::Approve => "approve",
            Self::Sell => "sell",
            Self::Buy => "buy",
            Self::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// TxStatus
// ---------------------------------------------------------------------------

/// Ledger status of a settlement hash, as reported by the status endpoint.
///
/// `Pending` means not yet in a block. `Included` means in a block but not
/// yet finally applied. `Applied` is the only success state. Anything else
/// the service reports is kept verbatim in `Other`. An unrecognised status
/// is neither included nor terminal, so polling continues until its budget
/// runs out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TxStatus {
    Pending,
    Included,
    Applied,
    Failed,
    Other(String),
}

impl TxStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Included => "included",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Other(s) => s,
        }
    }

    /// The transaction has left the mempool.
    pub fn is_included(&self) -> bool {
        matches!(self, Self::Included | Self::Applied | Self::Failed)
    }

    /// No further status change is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }
}

impl From<String> for TxStatus {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "included" => Self::Included,
            "applied" => Self::Applied,
            "failed" => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl From<TxStatus> for String {
    fn from(status: TxStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// NFT state
// ---------------------------------------------------------------------------

/// What a given NFT allows. A soulbound NFT has every flag cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftCapabilities {
    pub transferable: bool,
    pub approvable: bool,
    pub sellable: bool,
}

impl NftCapabilities {
    pub fn unrestricted() -> Self {
        Self {
            transferable: true,
            approvable: true,
            sellable: true,
        }
    }

    pub fn soulbound() -> Self {
        Self {
            transferable: false,
            approvable: false,
            sellable: false,
        }
    }

    pub fn is_soulbound(&self) -> bool {
        !self.transferable && !self.approvable && !self.sellable
    }

    /// The capability an operation needs, or `None` if it needs none.
    pub fn required_for(kind: OperationKind) -> Option<&'static str> {
        match kind {
            OperationKind::Approve => Some("approvable"),
            OperationKind::Sell | OperationKind::Buy => Some("sellable"),
            OperationKind::Transfer => Some("transferable"),
            OperationKind::LaunchCollection | OperationKind::Mint => None,
        }
    }

    /// Whether `kind` is permitted on an NFT with these capabilities.
    pub fn permits(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Approve => self.approvable,
            OperationKind::Sell | OperationKind::Buy => self.sellable,
            OperationKind::Transfer => self.transferable,
            OperationKind::LaunchCollection | OperationKind::Mint => true,
        }
    }
}

impl Default for NftCapabilities {
    fn default() -> Self {
        Self::unrestricted()
    }
}

/// Snapshot of an NFT as reported by the info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftInfo {
    pub collection: Address,
    pub address: Address,
    pub name: String,
    pub owner: Address,
    #[serde(default)]
    pub approved: Option<Address>,
    #[serde(default)]
    pub price: Option<u64>,
    #[serde(default)]
    pub capabilities: NftCapabilities,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_known_values_case_insensitively() {
        assert_eq!(TxStatus::from("Applied".to_string()), TxStatus::Applied);
        assert_eq!(TxStatus::from("pending".to_string()), TxStatus::Pending);
        assert_eq!(
            TxStatus::from("rejected".to_string()),
            TxStatus::Other("rejected".to_string())
        );
    }

    #[test]
    fn status_serializes_as_plain_string() {
        let json = serde_json::to_string(&TxStatus::Applied).unwrap();
        assert_eq!(json, "\"applied\"");
        let parsed: TxStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, TxStatus::Failed);
    }

    #[test]
    fn inclusion_and_terminality() {
        assert!(!TxStatus::Pending.is_included());
        assert!(TxStatus::Included.is_included());
        assert!(!TxStatus::Included.is_terminal());
        assert!(TxStatus::Applied.is_terminal());
        assert!(TxStatus::Failed.is_included());
        assert!(TxStatus::Failed.is_terminal());
    }

    #[test]
    fn unrecognised_status_keeps_polling() {
        let unknown = TxStatus::from("unknown".to_string());
        assert!(!unknown.is_included());
        assert!(!unknown.is_terminal());
    }

    #[test]
    fn soulbound_permits_only_creation() {
        let caps = NftCapabilities::soulbound();
        assert!(caps.is_soulbound());
        assert!(caps.permits(OperationKind::Mint));
        assert!(!OperationKind::LaunchCollection.touches_existing_nft());
        for kind in [
            OperationKind::Approve,
            OperationKind::Sell,
            OperationKind::Buy,
            OperationKind::Transfer,
        ] {
            assert!(kind.touches_existing_nft());
            assert!(!caps.permits(kind), "{} should be denied", kind);
        }
    }

    #[test]
    fn address_shape_check() {
        assert!(!Address::new("").is_well_formed());
        assert!(!Address::new("0xdeadbeef").is_well_formed());
        let ok = Address::new(bs58::encode([9u8; 32]).into_string());
        assert!(ok.is_well_formed());
    }

    #[test]
    fn tx_type_tags() {
        assert_eq!(OperationKind::Mint.tx_type(), "nft:mint");
        assert_eq!(OperationKind::Transfer.tx_type(), "nft:transfer");
    }
}
