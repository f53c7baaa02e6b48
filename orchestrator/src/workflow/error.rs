//! Error types for workflows and batches.
//!
//! Every way a single operation can fail is a [`WorkflowError`]. Each
//! variant knows the [`Stage`] it happened in and whether retrying (with a
//! fresh build and signature) could help. The orchestrator itself never
//! retries.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::{Address, JobHandle, OperationKind, SettlementHash, TxStatus};
use crate::service::ServiceError;
use crate::signer::SignError;

/// The workflow step an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Precondition,
    Build,
    Sign,
    Submit,
    Proof,
    Inclusion,
    Confirm,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Precondition => "precondition",
            Self::Build => "build",
            Self::Sign => "sign",
            Self::Submit => "submit",
            Self::Proof => "proof",
            Self::Inclusion => "inclusion",
            Self::Confirm => "confirm",
        };
        f.write_str(s)
    }
}

/// Failure of a single workflow.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkflowError {
    /// The NFT's capability flags forbid this operation.
    #[error("{kind} denied: nft {nft} is not {capability}")]
    CapabilityDenied {
        kind: OperationKind,
        nft: Address,
        capability: &'static str,
    },

    /// The capability lookup itself failed.
    #[error("precondition lookup failed: {0}")]
    Precondition(#[source] ServiceError),

    /// The builder rejected the request.
    #[error("build failed: {0}")]
    Build(#[source] ServiceError),

    /// Malformed key, or a key that does not belong to the sender.
    #[error("signing failed: {0}")]
    Sign(#[from] SignError),

    /// The prover did not accept the signed envelope.
    #[error("submission failed: {0}")]
    Submit(#[source] ServiceError),

    /// The prover reported the job as failed.
    #[error("proof job {job} failed: {reason}")]
    ProofJobFailed { job: JobHandle, reason: String },

    #[error("proof job {job} not ready after {attempts} probes ({elapsed:?})")]
    ProofTimeout {
        job: JobHandle,
        attempts: u32,
        elapsed: Duration,
    },

    /// The job finished with a hash count other than one.
    #[error("proof job {job} produced {count} settlement hashes, expected exactly 1")]
    UnexpectedProofCount { job: JobHandle, count: usize },

    #[error("{hash} not settled at {stage} after {attempts} probes ({elapsed:?})")]
    SettlementTimeout {
        hash: SettlementHash,
        stage: Stage,
        attempts: u32,
        elapsed: Duration,
    },

    /// The transaction reached a terminal status other than `applied`.
    #[error("{hash} finished with status '{status}', expected 'applied'")]
    AppliedMismatch {
        hash: SettlementHash,
        status: TxStatus,
    },

    /// A status probe failed outright.
    #[error("polling failed during {stage}: {source}")]
    Poll {
        stage: Stage,
        #[source]
        source: ServiceError,
    },

    /// Shutdown was requested while waiting. The remote job is unaffected.
    #[error("cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl WorkflowError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::CapabilityDenied { .. } | Self::Precondition(_) => Stage::Precondition,
            Self::Build(_) => Stage::Build,
            Self::Sign(_) => Stage::Sign,
            Self::Submit(_) => Stage::Submit,
            Self::ProofJobFailed { .. }
            | Self::ProofTimeout { .. }
            | Self::UnexpectedProofCount { .. } => Stage::Proof,
            Self::SettlementTimeout { stage, .. } => *stage,
            Self::AppliedMismatch { .. } => Stage::Confirm,
            Self::Poll { stage, .. } | Self::Cancelled { stage } => *stage,
        }
    }

    /// Whether re-invoking the workflow could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Submit(_)
            | Self::ProofJobFailed { .. }
            | Self::ProofTimeout { .. }
            | Self::SettlementTimeout { .. } => true,
            Self::Precondition(source) | Self::Poll { source, .. } => source.is_transient(),
            Self::CapabilityDenied { .. }
            | Self::Build(_)
            | Self::Sign(_)
            | Self::UnexpectedProofCount { .. }
            | Self::AppliedMismatch { .. }
            | Self::Cancelled { .. } => false,
        }
    }

    /// The prover finished without producing any settlement hash.
    ///
    /// This is reported as an error, but callers that treat "nothing to
    /// settle" as a skip can test for it here.
    pub fn is_missing_settlement(&self) -> bool {
        matches!(self, Self::UnexpectedProofCount { count: 0, .. })
    }

    /// The settlement hash involved, once one is known.
    pub fn settlement_hash(&self) -> Option<&SettlementHash> {
        match self {
            Self::SettlementTimeout { hash, .. } | Self::AppliedMismatch { hash, .. } => Some(hash),
            _ => None,
        }
    }
}

/// Failure of a batch before any operation was submitted.
///
/// Failures of individual operations are reported per entry in the
/// [`BatchReport`](super::BatchReport), not here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatchError {
    #[error("batch is empty")]
    EmptyBatch,

    #[error("request {index} is from {found}, batch sender is {expected}")]
    MixedSenders {
        index: usize,
        expected: Address,
        found: Address,
    },

    #[error("request {index} carries an explicit nonce; batches assign nonces")]
    ExplicitNonce { index: usize },

    #[error("no signer supplied for sender {0}")]
    MissingSigner(Address),

    #[error("sender {0} already has a batch in flight")]
    SenderBusy(Address),

    #[error("could not fetch nonce for {sender}: {source}")]
    NonceFetch {
        sender: Address,
        #[source]
        source: ServiceError,
    },
}
