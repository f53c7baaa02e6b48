//! JSON wire schema of the hosted NFT API.
//!
//! Requests are built from [`OperationRequest`]s, responses are decoded
//! into the crate's own types. The API speaks camelCase and is loose about
//! numbers (nonces and fees sometimes arrive as strings), so decoding is
//! lenient where it has to be and strict everywhere else.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use super::{ProofPoll, ServiceError};
use crate::operation::{
    Address, NftCapabilities, NftInfo, NftPermissions, Operation, OperationKind,
    OperationRequest, SettlementHash, SignedEnvelope, SignerPayload, TransactionMetadata,
    TxStatus, UnsignedTransaction,
};

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Path of the build endpoint for an operation, relative to the API base.
pub fn build_path(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::LaunchCollection => "nft/launch",
        OperationKind::Mint => "nft/mint",
        OperationKind::Approve => "nft/approve",
        OperationKind::Sell => "nft/sell",
        OperationKind::Buy => "nft/buy",
        OperationKind::Transfer => "nft/transfer",
    }
}

pub const PROVE_PATH: &str = "transaction/prove";
pub const PROOFS_PATH: &str = "transaction/proofs";
pub const STATUS_PATH: &str = "transaction/status";
pub const NONCE_PATH: &str = "info/nonce";
pub const NFT_INFO_PATH: &str = "info/nft";

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of a build request.
pub fn build_body(request: &OperationRequest) -> Value {
    let mut body = json!({
        "txType": request.kind().tx_type(),
        "sender": request.sender(),
    });

    let params = match request.operation() {
        Operation::LaunchCollection(p) => json!({
            "collectionName": p.collection_name,
            "symbol": p.symbol,
            "adminContract": p.admin_contract,
            "masterNFT": {
                "name": p.master_nft.name,
                "data": { "owner": request.sender() },
                "metadata": p.master_nft,
            },
        }),
        Operation::Mint { collection, params } => json!({
            "collectionAddress": collection,
            "nftMintParams": {
                "name": params.name,
                "data": permissions_with_owner(&params.permissions, &params.owner),
                "metadata": params.metadata,
            },
        }),
        Operation::Approve {
            collection,
            nft,
            to,
        } => json!({
            "collectionAddress": collection,
            "nftAddress": nft,
            "nftApproveParams": { "to": to },
        }),
        Operation::Sell {
            collection,
            nft,
            price,
        } => json!({
            "collectionAddress": collection,
            "nftAddress": nft,
            "nftSellParams": { "price": price },
        }),
        Operation::Buy {
            collection,
            nft,
            buyer,
        } => json!({
            "collectionAddress": collection,
            "nftAddress": nft,
            "nftBuyParams": { "buyer": buyer },
        }),
        Operation::Transfer {
            collection,
            nft,
            from,
            to,
        } => json!({
            "collectionAddress": collection,
            "nftAddress": nft,
            "nftTransferParams": { "from": from, "to": to },
        }),
    };
    merge(&mut body, params);

    if let Some(nonce) = request.nonce() {
        body["nonce"] = json!(nonce);
    }
    if let Some(memo) = request.memo() {
        body["memo"] = json!(memo);
    }
    body
}

fn permissions_with_owner(permissions: &NftPermissions, owner: &Address) -> Value {
    let mut data = serde_json::to_value(permissions).unwrap_or_else(|_| json!({}));
    data["owner"] = json!(owner);
    data
}

fn merge(target: &mut Value, extra: Value) {
    if let (Value::Object(t), Value::Object(e)) = (target, extra) {
        t.extend(e);
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveRequest<'a> {
    pub tx: &'a Value,
    pub signed_data: String,
}

impl<'a> ProveRequest<'a> {
    pub fn from_envelope(envelope: &'a SignedEnvelope) -> Self {
        let signed_data = json!({
            "publicKey": envelope.sender(),
            "signature": envelope.signature.as_str(),
            "data": envelope.transaction.signer_payload,
        })
        .to_string();
        Self {
            tx: &envelope.transaction.raw,
            signed_data,
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Decode a build response. The whole response object is kept as the
/// opaque `raw` body and echoed back to the prover.
pub fn decode_build(raw: Value) -> Result<UnsignedTransaction, ServiceError> {
    let parsed: BuildResponse = serde_json::from_value(raw.clone())?;
    let request = parsed.request.unwrap_or_default();
    let mint = request.nft_mint_params.unwrap_or_default();

    let metadata = TransactionMetadata {
        collection_address: request.collection_address,
        nft_address: mint.address,
        admin_contract_address: request.admin_contract_address,
        collection_contract_private_key: request.collection_contract_private_key,
        admin_contract_private_key: request.admin_contract_private_key,
        nft_contract_private_key: mint.address_private_key,
        storage: parsed.storage,
        metadata_root: parsed.metadata_root,
        private_metadata: parsed.private_metadata,
        nft_name: parsed.nft_name,
        collection_name: parsed.collection_name,
    };

    let fee_payer = parsed.mina_signer_payload.fee_payer;
    Ok(UnsignedTransaction {
        signer_payload: SignerPayload {
            sender: fee_payer.fee_payer,
            nonce: fee_payer.nonce,
            fee: fee_payer.fee,
            memo: fee_payer.memo,
            transaction: parsed.mina_signer_payload.zkapp_command.to_string(),
        },
        metadata,
        raw,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildResponse {
    #[serde(default)]
    request: Option<BuildRequestEcho>,
    mina_signer_payload: WireSignerPayload,
    #[serde(default)]
    storage: Option<String>,
    #[serde(default)]
    metadata_root: Option<String>,
    #[serde(default)]
    private_metadata: Option<Value>,
    #[serde(default)]
    nft_name: Option<String>,
    #[serde(default)]
    collection_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildRequestEcho {
    #[serde(default)]
    collection_address: Option<Address>,
    #[serde(default)]
    admin_contract_address: Option<Address>,
    #[serde(default)]
    collection_contract_private_key: Option<String>,
    #[serde(default)]
    admin_contract_private_key: Option<String>,
    #[serde(default)]
    nft_mint_params: Option<MintEcho>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MintEcho {
    #[serde(default)]
    address: Option<Address>,
    #[serde(default)]
    address_private_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSignerPayload {
    fee_payer: WireFeePayer,
    zkapp_command: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFeePayer {
    fee_payer: Address,
    #[serde(deserialize_with = "u64_lenient")]
    fee: u64,
    #[serde(deserialize_with = "u64_lenient")]
    nonce: u64,
    #[serde(default)]
    memo: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveResponse {
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofsResponse {
    pub job_status: String,
    #[serde(default)]
    pub hashes: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProofsResponse {
    pub fn into_poll(self) -> ProofPoll {
        match self.job_status.as_str() {
            "finished" | "used" => {
                ProofPoll::Ready(self.hashes.into_iter().map(SettlementHash::new).collect())
            }
            "failed" => ProofPoll::Failed(self.error.unwrap_or(self.job_status)),
            _ => ProofPoll::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: TxStatus,
}

#[derive(Debug, Deserialize)]
pub struct NonceResponse {
    #[serde(deserialize_with = "u64_lenient")]
    pub nonce: u64,
}

/// NFT snapshot as the info endpoint reports it. Capabilities come from the
/// mint-time permission flags.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftInfoResponse {
    pub collection_address: Address,
    pub nft_address: Address,
    #[serde(default)]
    pub name: String,
    pub owner: Address,
    #[serde(default)]
    pub approved: Option<Address>,
    #[serde(default, deserialize_with = "opt_u64_lenient")]
    pub price: Option<u64>,
    #[serde(default = "yes")]
    pub can_transfer: bool,
    #[serde(default = "yes")]
    pub can_approve: bool,
}

fn yes() -> bool {
    true
}

impl From<NftInfoResponse> for NftInfo {
    fn from(wire: NftInfoResponse) -> Self {
        NftInfo {
            collection: wire.collection_address,
            address: wire.nft_address,
            name: wire.name,
            owner: wire.owner,
            approved: wire.approved,
            price: wire.price.filter(|p| *p > 0),
            capabilities: NftCapabilities {
                transferable: wire.can_transfer,
                approvable: wire.can_approve,
                sellable: wire.can_transfer && wire.can_approve,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Lenient number decoding
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

impl NumberOrString {
    fn into_u64<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            Self::Number(n) => Ok(n),
            Self::String(s) => s.trim().parse().map_err(E::custom),
        }
    }
}

fn u64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    NumberOrString::deserialize(d)?.into_u64()
}

fn opt_u64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Option::<NumberOrString>::deserialize(d)?
        .map(NumberOrString::into_u64)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{MintParams, NftMetadata};

    fn addr(tag: u8) -> Address {
        Address::new(bs58::encode([tag; 32]).into_string())
    }

    #[test]
    fn mint_body_carries_permissions_and_owner() {
        let req = OperationRequest::mint(
            addr(1),
            addr(2),
            MintParams {
                name: "Pebble".into(),
                owner: addr(1),
                permissions: NftPermissions::soulbound(),
                metadata: NftMetadata::default(),
            },
        )
        .with_nonce(7);
        let body = build_body(&req);
        assert_eq!(body["txType"], "nft:mint");
        assert_eq!(body["collectionAddress"], addr(2).as_str());
        assert_eq!(body["nftMintParams"]["data"]["owner"], addr(1).as_str());
        assert_eq!(body["nftMintParams"]["data"]["canTransfer"], false);
        assert_eq!(body["nonce"], 7);
    }

    #[test]
    fn transfer_body_shape() {
        let req = OperationRequest::transfer(addr(1), addr(2), addr(3), addr(4));
        let body = build_body(&req);
        assert_eq!(body["nftTransferParams"]["from"], addr(1).as_str());
        assert_eq!(body["nftTransferParams"]["to"], addr(4).as_str());
        assert!(body.get("nonce").is_none());
    }

    #[test]
    fn build_response_decodes_string_numbers_and_metadata() {
        let raw = json!({
            "request": {
                "collectionAddress": addr(2),
                "nftMintParams": { "address": addr(3), "addressPrivateKey": "EKnft" }
            },
            "minaSignerPayload": {
                "feePayer": { "feePayer": addr(1), "fee": "100000000", "nonce": "12", "memo": "mint" },
                "zkappCommand": { "accountUpdates": [] }
            },
            "storage": "bafy",
            "metadataRoot": "root"
        });
        let tx = decode_build(raw).unwrap();
        assert_eq!(tx.signer_payload.nonce, 12);
        assert_eq!(tx.signer_payload.fee, 100_000_000);
        assert_eq!(tx.metadata.nft_address, Some(addr(3)));
        assert_eq!(tx.metadata.nft_contract_private_key.as_deref(), Some("EKnft"));
        assert_eq!(tx.raw["storage"], "bafy");
    }

    #[test]
    fn proofs_response_maps_job_status() {
        let ready: ProofsResponse =
            serde_json::from_value(json!({"jobStatus": "finished", "hashes": ["h1"]})).unwrap();
        assert_eq!(
            ready.into_poll(),
            ProofPoll::Ready(vec![SettlementHash::new("h1")])
        );

        let pending: ProofsResponse =
            serde_json::from_value(json!({"jobStatus": "started"})).unwrap();
        assert_eq!(pending.into_poll(), ProofPoll::Pending);

        let failed: ProofsResponse =
            serde_json::from_value(json!({"jobStatus": "failed", "error": "oom"})).unwrap();
        assert_eq!(failed.into_poll(), ProofPoll::Failed("oom".into()));
    }

    #[test]
    fn nft_info_derives_capabilities() {
        let wire: NftInfoResponse = serde_json::from_value(json!({
            "collectionAddress": addr(2),
            "nftAddress": addr(3),
            "owner": addr(1),
            "price": "0",
            "canTransfer": false,
            "canApprove": true
        }))
        .unwrap();
        let info = NftInfo::from(wire);
        assert_eq!(info.price, None);
        assert!(!info.capabilities.transferable);
        assert!(info.capabilities.approvable);
        assert!(!info.capabilities.sellable);
    }
}
