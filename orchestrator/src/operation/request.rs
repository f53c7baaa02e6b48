//! Typed operation requests.
//!
//! An [`OperationRequest`] is what a caller hands to the orchestrator. It is
//! immutable once constructed; assigning a nonce consumes the request and
//! returns a new one.

use serde::{Deserialize, Serialize};

use super::types::{Address, NftCapabilities, OperationKind};

/// A single NFT operation, signed by `sender`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    sender: Address,
    nonce: Option<u64>,
    memo: Option<String>,
    operation: Operation,
}

/// The variant-specific half of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Operation {
    LaunchCollection(LaunchCollectionParams),
    Mint {
        collection: Address,
        params: MintParams,
    },
    Approve {
        collection: Address,
        nft: Address,
        to: Address,
    },
    Sell {
        collection: Address,
        nft: Address,
        price: u64,
    },
    Buy {
        collection: Address,
        nft: Address,
        buyer: Address,
    },
    Transfer {
        collection: Address,
        nft: Address,
        from: Address,
        to: Address,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::LaunchCollection(_) => OperationKind::LaunchCollection,
            Self::Mint { .. } => OperationKind::Mint,
            Self::Approve { .. } => OperationKind::Approve,
            Self::Sell { .. } => OperationKind::Sell,
            Self::Buy { .. } => OperationKind::Buy,
            Self::Transfer { .. } => OperationKind::Transfer,
        }
    }

    /// The collection this operation acts on, if it already exists.
    pub fn collection(&self) -> Option<&Address> {
        match self {
            Self::LaunchCollection(_) => None,
            Self::Mint { collection, .. }
            | Self::Approve { collection, .. }
            | Self::Sell { collection, .. }
            | Self::Buy { collection, .. }
            | Self::Transfer { collection, .. } => Some(collection),
        }
    }

    /// The existing NFT this operation acts on, if any.
    pub fn nft(&self) -> Option<&Address> {
        match self {
            Self::LaunchCollection(_) | Self::Mint { .. } => None,
            Self::Approve { nft, .. }
            | Self::Sell { nft, .. }
            | Self::Buy { nft, .. }
            | Self::Transfer { nft, .. } => Some(nft),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchCollectionParams {
    pub collection_name: String,
    pub symbol: String,
    /// Admin contract flavour, e.g. `"standard"`.
    pub admin_contract: String,
    /// Metadata of the collection's master NFT.
    pub master_nft: NftMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintParams {
    pub name: String,
    pub owner: Address,
    pub permissions: NftPermissions,
    pub metadata: NftMetadata,
}

/// Mint-time permission flags. Fixed for the lifetime of the NFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftPermissions {
    pub can_change_owner_by_proof: bool,
    pub can_transfer: bool,
    pub can_approve: bool,
    pub can_change_metadata: bool,
    pub can_change_storage: bool,
    pub can_change_name: bool,
    pub can_change_metadata_verification_key_hash: bool,
    pub can_pause: bool,
}

impl NftPermissions {
    /// No transfer, no approval. The NFT stays with its first owner.
    pub fn soulbound() -> Self {
        Self {
            can_transfer: false,
            can_approve: false,
            ..Self::default()
        }
    }

    /// Capabilities the ledger derives from these permissions. Selling goes
    /// through an approval followed by a transfer, so it needs both.
    pub fn capabilities(&self) -> NftCapabilities {
        NftCapabilities {
            transferable: self.can_transfer,
            approvable: self.can_approve,
            sellable: self.can_transfer && self.can_approve,
        }
    }
}

impl Default for NftPermissions {
    fn default() -> Self {
        Self {
            can_change_owner_by_proof: false,
            can_transfer: true,
            can_approve: true,
            can_change_metadata: false,
            can_change_storage: false,
            can_change_name: false,
            can_change_metadata_verification_key_hash: false,
            can_pause: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftMetadata {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    pub description: String,
    #[serde(default)]
    pub traits: Vec<Trait>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trait {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: TraitKind,
    pub value: String,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TraitKind {
    String,
    Text,
    Url,
    Image,
}

// ---------------------------------------------------------------------------
// OperationRequest
// ---------------------------------------------------------------------------

impl OperationRequest {
    pub fn new(sender: Address, operation: Operation) -> Self {
        Self {
            sender,
            nonce: None,
            memo: None,
            operation,
        }
    }

    pub fn launch_collection(sender: Address, params: LaunchCollectionParams) -> Self {
        Self::new(sender, Operation::LaunchCollection(params))
    }

    pub fn mint(sender: Address, collection: Address, params: MintParams) -> Self {
        Self::new(sender, Operation::Mint { collection, params })
    }

    pub fn approve(sender: Address, collection: Address, nft: Address, to: Address) -> Self {
        Self::new(sender, Operation::Approve { collection, nft, to })
    }

    pub fn sell(sender: Address, collection: Address, nft: Address, price: u64) -> Self {
        Self::new(
            sender,
            Operation::Sell {
                collection,
                nft,
                price,
            },
        )
    }

    /// Buy an NFT that is on offer. The buyer is also the sender.
    pub fn buy(buyer: Address, collection: Address, nft: Address) -> Self {
        Self::new(
            buyer.clone(),
            Operation::Buy {
                collection,
                nft,
                buyer,
            },
        )
    }

    /// Transfer from the sender to `to`.
    pub fn transfer(sender: Address, collection: Address, nft: Address, to: Address) -> Self {
        Self::new(
            sender.clone(),
            Operation::Transfer {
                collection,
                nft,
                from: sender,
                to,
            },
        )
    }

    /// A copy of this request carrying an explicit nonce.
    pub fn with_nonce(self, nonce: u64) -> Self {
        Self {
            nonce: Some(nonce),
            ..self
        }
    }

    pub fn with_memo(self, memo: impl Into<String>) -> Self {
        Self {
            memo: Some(memo.into()),
            ..self
        }
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> Address {
        Address::new(bs58::encode([tag; 32]).into_string())
    }

    #[test]
    fn with_nonce_leaves_original_untouched() {
        let original = OperationRequest::sell(addr(1), addr(2), addr(3), 10);
        let numbered = original.clone().with_nonce(5);
        assert_eq!(original.nonce(), None);
        assert_eq!(numbered.nonce(), Some(5));
        assert_eq!(numbered.operation(), original.operation());
    }

    #[test]
    fn transfer_uses_sender_as_from() {
        let req = OperationRequest::transfer(addr(1), addr(2), addr(3), addr(4));
        match req.operation() {
            Operation::Transfer { from, to, .. } => {
                assert_eq!(from, &addr(1));
                assert_eq!(to, &addr(4));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn soulbound_permissions_yield_soulbound_capabilities() {
        assert!(NftPermissions::soulbound().capabilities().is_soulbound());
        assert_eq!(
            NftPermissions::default().capabilities(),
            NftCapabilities::unrestricted()
        );
    }

    #[test]
    fn selling_needs_transfer_and_approve() {
        let perms = NftPermissions {
            can_transfer: false,
            ..NftPermissions::default()
        };
        let caps = perms.capabilities();
        assert!(caps.approvable);
        assert!(!caps.sellable);
    }

    #[test]
    fn accessors_expose_targets() {
        let req = OperationRequest::approve(addr(1), addr(2), addr(3), addr(4));
        assert_eq!(req.kind(), OperationKind::Approve);
        assert_eq!(req.operation().collection(), Some(&addr(2)));
        assert_eq!(req.operation().nft(), Some(&addr(3)));
    }

    #[test]
    fn trait_kind_serializes_as_type() {
        let t = Trait {
            key: "rarity".into(),
            kind: TraitKind::String,
            value: "rare".into(),
            is_private: true,
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["isPrivate"], true);
    }
}
