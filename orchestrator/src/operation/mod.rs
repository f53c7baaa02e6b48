//! # Operations
//!
//! The data model flowing through a workflow:
//!
//! ```text
//! OperationRequest --build--> UnsignedTransaction --sign--> SignedEnvelope
//!        --submit--> JobHandle --prove--> SettlementHash --settle--> TxStatus
//! ```
//!
//! Each arrow happens at most once per request.

pub mod request;
pub mod transaction;
pub mod types;

pub use request::{
    LaunchCollectionParams, MintParams, NftMetadata, NftPermissions, Operation, OperationRequest,
    Trait, TraitKind,
};
pub use transaction::{
    SignedEnvelope, SignerPayload, TransactionMetadata, TxSignature, UnsignedTransaction,
};
pub use types::{
    Address, JobHandle, NftCapabilities, NftInfo, OperationKind, SettlementHash, TxStatus,
};
