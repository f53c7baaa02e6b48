//! # Collaborator Services
//!
//! The orchestrator talks to the outside world through three async traits:
//!
//! | Trait                        | Responsibility                                   |
//! |------------------------------|--------------------------------------------------|
//! | [`TransactionBuilderService`] | request → unsigned transaction + metadata        |
//! | [`ProverService`]            | accept signed envelopes, report proof progress    |
//! | [`LedgerService`]            | transaction status, account nonce, NFT snapshots  |
//!
//! Two implementations ship with the crate: [`http::ApiClient`] for the
//! hosted API and [`sandbox::SandboxService`], an in-memory ledger used by
//! tests and offline runs.
//!
//! Every method is a single request. Waiting and backoff belong to the
//! orchestrator (see [`crate::poll`]), never to a service.

pub mod http;
pub mod sandbox;
pub mod wire;

use async_trait::async_trait;
use thiserror::Error;

use crate::operation::{
    Address, JobHandle, NftInfo, OperationRequest, SettlementHash, SignedEnvelope, TxStatus,
    UnsignedTransaction,
};

pub use http::{ApiClient, ApiClientBuilder, Chain};
pub use sandbox::{FaultPlan, SandboxService};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure talking to a collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service understood the request and refused it.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The thing asked about does not exist (unknown NFT, unknown job).
    #[error("not found: {0}")]
    NotFound(String),

    /// The request never got a usable answer (connect, timeout, 5xx).
    #[error("transport error: {0}")]
    Transport(String),

    /// The answer arrived but could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ServiceError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Whether re-issuing the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Turns a typed request into an unsigned transaction.
#[async_trait]
pub trait TransactionBuilderService: Send + Sync {
    async fn build(&self, request: &OperationRequest) -> Result<UnsignedTransaction, ServiceError>;
}

/// Progress of a proof job, as of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofPoll {
    Pending,
    /// The job finished. Normally exactly one hash.
    Ready(Vec<SettlementHash>),
    Failed(String),
}

/// Accepts signed envelopes and proves them.
#[async_trait]
pub trait ProverService: Send + Sync {
    async fn submit_for_proof(&self, envelope: SignedEnvelope) -> Result<JobHandle, ServiceError>;

    /// One probe of the job's state.
    async fn proof_status(&self, job: &JobHandle) -> Result<ProofPoll, ServiceError>;
}

/// Read access to ledger state.
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn tx_status(&self, hash: &SettlementHash) -> Result<TxStatus, ServiceError>;

    /// Next nonce to use for `address`, as the ledger sees it.
    async fn nonce(&self, address: &Address) -> Result<u64, ServiceError>;

    async fn nft_info(&self, collection: &Address, nft: &Address)
        -> Result<NftInfo, ServiceError>;
}
