//! # Batch Coordinator
//!
//! Submits several operations back to back without waiting for any of them
//! to land, then waits for all of them at once.
//!
//! ## Nonces
//!
//! The hosted builder fills in the sender's *ledger* nonce, which does not
//! move until a transaction is applied. Back-to-back submissions would all
//! get the same nonce, so a batch fetches each sender's nonce once and
//! assigns `base, base + 1, ...` itself through a [`NonceCursor`]. The
//! cursor is use-then-increment and only advances when a submission
//! succeeds, so the nonces that reach the ledger are contiguous.
//!
//! ## Failure
//!
//! The first failure during submission stops the batch. Everything already
//! submitted is still settled and reported; the failing request reports its
//! error; the rest are reported as [`BatchEntry::NotSubmitted`].
//!
//! ## Exclusivity
//!
//! A sender can be in at most one batch at a time, otherwise two cursors
//! would hand out the same nonces. A second batch for a busy sender fails
//! with [`BatchError::SenderBusy`] before anything is built.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::error::{BatchError, WorkflowError};
use super::orchestrator::{Orchestrator, Submitted};
use super::receipt::{WorkflowReceipt, WorkflowResult};
use crate::operation::{Address, OperationRequest};
use crate::signer::Signer;

// ---------------------------------------------------------------------------
// NonceCursor
// ---------------------------------------------------------------------------

/// Per-sender nonce counter, owned by one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceCursor {
    sender: Address,
    base: u64,
    next: u64,
}

impl NonceCursor {
    pub fn new(sender: Address, base: u64) -> Self {
        Self {
            sender,
            base,
            next: base,
        }
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// The nonce the next submission will use.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Mark the current nonce as used and move on. Returns the used nonce.
    pub fn advance(&mut self) -> u64 {
        let used = self.next;
        self.next += 1;
        used
    }

    pub fn used(&self) -> u64 {
        self.next - self.base
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of one request in a batch.
#[derive(Debug, Clone)]
pub enum BatchEntry {
    Settled(WorkflowReceipt),
    Failed(WorkflowError),
    NotSubmitted,
}

impl BatchEntry {
    fn from_result(result: WorkflowResult) -> Self {
        match result {
            Ok(receipt) => Self::Settled(receipt),
            Err(err) => Self::Failed(err),
        }
    }

    pub fn receipt(&self) -> Option<&WorkflowReceipt> {
        match self {
            Self::Settled(r) => Some(r),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&WorkflowError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

/// Per-request outcomes, in submission order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Nonce each sender started from.
    pub base_nonces: BTreeMap<Address, u64>,
    pub entries: Vec<BatchEntry>,
    /// Index of the request whose submission stopped the batch.
    pub aborted_at: Option<usize>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_settled(&self) -> bool {
        self.entries.iter().all(BatchEntry::is_settled)
    }

    pub fn receipts(&self) -> impl Iterator<Item = &WorkflowReceipt> {
        self.entries.iter().filter_map(BatchEntry::receipt)
    }

    pub fn settled_count(&self) -> usize {
        self.receipts().count()
    }

    pub fn summary(&self) -> BatchSummary {
        let settled = self.settled_count();
        let not_submitted = self
            .entries
            .iter()
            .filter(|e| matches!(e, BatchEntry::NotSubmitted))
            .count();
        BatchSummary {
            total: self.len(),
            settled,
            failed: self.len() - settled - not_submitted,
            not_submitted,
            aborted_at: self.aborted_at,
        }
    }
}

/// Counts for logging and CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub settled: usize,
    pub failed: usize,
    pub not_submitted: usize,
    pub aborted_at: Option<usize>,
}

// ---------------------------------------------------------------------------
// Sender leases
// ---------------------------------------------------------------------------

/// Held for the duration of a batch; releases the sender on drop.
struct SenderLease {
    leases: Arc<DashMap<Address, ()>>,
    sender: Address,
}

impl Drop for SenderLease {
    fn drop(&mut self) {
        self.leases.remove(&self.sender);
    }
}

// ---------------------------------------------------------------------------
// BatchCoordinator
// ---------------------------------------------------------------------------

pub struct BatchCoordinator {
    orchestrator: Arc<Orchestrator>,
    leases: Arc<DashMap<Address, ()>>,
}

impl BatchCoordinator {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            leases: Arc::new(DashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Whether `sender` currently has a batch in flight.
    pub fn is_busy(&self, sender: &Address) -> bool {
        self.leases.contains_key(sender)
    }

    fn acquire(&self, sender: &Address) -> Result<SenderLease, BatchError> {
        match self.leases.entry(sender.clone()) {
            Entry::Occupied(_) => Err(BatchError::SenderBusy(sender.clone())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(SenderLease {
                    leases: self.leases.clone(),
                    sender: sender.clone(),
                })
            }
        }
    }

    /// Run a batch where every request comes from `signer`'s account.
    pub async fn execute_batch(
        &self,
        requests: Vec<OperationRequest>,
        signer: &dyn Signer,
    ) -> Result<BatchReport, BatchError> {
        let expected = signer.address();
        for (index, request) in requests.iter().enumerate() {
            if *request.sender() != expected {
                return Err(BatchError::MixedSenders {
                    index,
                    expected,
                    found: request.sender().clone(),
                });
            }
        }
        self.execute_multi_sender(requests, &[signer]).await
    }

    /// Run a batch whose requests may come from several senders. Each sender
    /// gets its own nonce cursor; order is preserved across the whole batch.
    pub async fn execute_multi_sender(
        &self,
        requests: Vec<OperationRequest>,
        signers: &[&dyn Signer],
    ) -> Result<BatchReport, BatchError> {
        if requests.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        let by_address: HashMap<Address, &dyn Signer> =
            signers.iter().map(|s| (s.address(), *s)).collect();
        for (index, request) in requests.iter().enumerate() {
            if request.nonce().is_some() {
                return Err(BatchError::ExplicitNonce { index });
            }
            if !by_address.contains_key(request.sender()) {
                return Err(BatchError::MissingSigner(request.sender().clone()));
            }
        }

        // Distinct senders in first-seen order.
        let mut senders: Vec<Address> = Vec::new();
        for request in &requests {
            if !senders.contains(request.sender()) {
                senders.push(request.sender().clone());
            }
        }
        let mut leases = Vec::with_capacity(senders.len());
        for sender in &senders {
            leases.push(self.acquire(sender)?);
        }

        let mut cursors: HashMap<Address, NonceCursor> = HashMap::new();
        for sender in &senders {
            let base = self
                .orchestrator
                .ledger()
                .nonce(sender)
                .await
                .map_err(|source| BatchError::NonceFetch {
                    sender: sender.clone(),
                    source,
                })?;
            cursors.insert(sender.clone(), NonceCursor::new(sender.clone(), base));
        }
        let base_nonces = cursors
            .iter()
            .map(|(address, cursor)| (address.clone(), cursor.base()))
            .collect();

        let total = requests.len();
        info!(total, senders = senders.len(), "batch started");

        let mut submitted: Vec<(usize, Submitted)> = Vec::with_capacity(total);
        let mut aborted: Option<(usize, WorkflowError)> = None;
        for (index, request) in requests.into_iter().enumerate() {
            let sender = request.sender().clone();
            let (Some(cursor), Some(signer)) = (cursors.get_mut(&sender), by_address.get(&sender))
            else {
                continue;
            };
            let numbered = request.with_nonce(cursor.peek());
            match self.orchestrator.submit(numbered, *signer).await {
                Ok(sub) => {
                    cursor.advance();
                    submitted.push((index, sub));
                }
                Err(err) => {
                    warn!(index, %sender, error = %err, "batch aborted during submission");
                    aborted = Some((index, err));
                    break;
                }
            }
        }

        let settled = join_all(submitted.into_iter().map(|(index, sub)| async move {
            (index, self.orchestrator.settle(sub).await)
        }))
        .await;

        let mut entries: Vec<BatchEntry> = (0..total).map(|_| BatchEntry::NotSubmitted).collect();
        for (index, result) in settled {
            entries[index] = BatchEntry::from_result(result);
        }
        let aborted_at = aborted.as_ref().map(|(index, _)| *index);
        if let Some((index, err)) = aborted {
            entries[index] = BatchEntry::Failed(err);
        }
        drop(leases);

        let report = BatchReport {
            base_nonces,
            entries,
            aborted_at,
        };
        let summary = report.summary();
        info!(
            total = summary.total,
            settled = summary.settled,
            failed = summary.failed,
            not_submitted = summary.not_submitted,
            "batch finished"
        );
        Ok(report)
    }
}
