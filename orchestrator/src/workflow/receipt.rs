//! What a successful workflow hands back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::WorkflowError;
use super::state::StateChange;
use crate::operation::{
    Address, JobHandle, OperationKind, SettlementHash, TransactionMetadata, TxStatus,
};

/// Proof that an operation reached `applied` on the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReceipt {
    pub id: Uuid,
    pub kind: OperationKind,
    pub sender: Address,
    pub nonce: u64,
    pub job: JobHandle,
    pub hash: SettlementHash,
    pub status: TxStatus,
    /// Addresses and roots the builder derived, e.g. a freshly minted NFT.
    pub metadata: TransactionMetadata,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub history: Vec<StateChange>,
}

impl WorkflowReceipt {
    pub fn collection_address(&self) -> Option<&Address> {
        self.metadata.collection_address.as_ref()
    }

    pub fn nft_address(&self) -> Option<&Address> {
        self.metadata.nft_address.as_ref()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Outcome of a single workflow.
pub type WorkflowResult = Result<WorkflowReceipt, WorkflowError>;
