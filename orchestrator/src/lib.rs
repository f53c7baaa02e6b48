// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # nftflow: NFT Workflow Orchestration
//!
//! Client-side core for driving a hosted NFT API: launch a collection, mint,
//! approve, sell, buy and transfer NFTs, one at a time or in batches.
//!
//! All real ledger work (proving, transaction construction, consensus)
//! happens in the remote service. What lives here is the part that is easy
//! to get wrong: sequencing every operation through
//!
//! ```text
//! build -> sign -> submit -> await proof -> await inclusion -> confirm
//! ```
//!
//! with bounded, cancellable polling, typed failures, and nonce management
//! for batches.
//!
//! ## Architecture
//!
//! - **operation**: requests, transactions and the identifiers flowing
//!   between stages.
//! - **crypto**: Ed25519 account keys and SHA-256 helpers.
//! - **signer**: the local signing step.
//! - **service**: collaborator traits plus the HTTP client and an
//!   in-memory sandbox.
//! - **poll**: backoff polling with shutdown awareness.
//! - **workflow**: the orchestrator, batch coordinator and state machine.
//! - **config**: injected timing configuration.
//!
//! ## Design Philosophy
//!
//! 1. The orchestrator never retries on its own. Errors say whether a
//!    retry could help; the caller decides.
//! 2. No bare sleeps. Every wait is a bounded poll that shutdown can cut.
//! 3. The core never reads the environment. Configuration is injected.

pub mod config;
pub mod crypto;
pub mod operation;
pub mod poll;
pub mod service;
pub mod signer;
pub mod workflow;

pub use config::{ConfigError, OrchestratorConfig, PollPolicy};
pub use operation::{Address, OperationKind, OperationRequest, SettlementHash, TxStatus};
pub use service::{LedgerService, ProverService, ServiceError, TransactionBuilderService};
pub use signer::{SignError, Signer};
pub use workflow::{
    BatchCoordinator, BatchError, BatchReport, Orchestrator, Stage, WorkflowError,
    WorkflowReceipt, WorkflowResult,
};
