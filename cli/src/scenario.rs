//! # Scenario Runner
//!
//! Drives a full collection lifecycle and checks the ledger after every
//! step:
//!
//! ```text
//! started -> launched -> minted -> approved -> sold -> bought
//!         -> transferred -> batchMinted -> batchSold
//! ```
//!
//! Steps are gated by [`StepTracker`]: a step can only run once the one
//! before it completed. In soulbound mode the NFTs are minted without
//! transfer or approve rights, so approve, sell, buy and transfer must be
//! refused, and the batch sell is skipped.

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use nftflow_orchestrator::crypto::AccountKeypair;
use nftflow_orchestrator::operation::{Address, NftInfo, OperationRequest, SettlementHash};
use nftflow_orchestrator::service::ServiceError;
use nftflow_orchestrator::workflow::{
    BatchCoordinator, BatchError, BatchReport, Orchestrator, WorkflowError, WorkflowReceipt,
};
use nftflow_orchestrator::{Signer, TxStatus};

use crate::fixtures;
use crate::metrics::WorkflowMetrics;
use crate::records::RecordStore;

/// NFTs minted by the batch step.
const BATCH_MINT_SIZE: usize = 3;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScenarioStep {
    Started,
    Launched,
    Minted,
    Approved,
    Sold,
    Bought,
    Transferred,
    BatchMinted,
    BatchSold,
}

impl ScenarioStep {
    pub fn next(self) -> Option<Self> {
        use ScenarioStep::*;
        match self {
            Started => Some(Launched),
            Launched => Some(Minted),
            Minted => Some(Approved),
            Approved => Some(Sold),
            Sold => Some(Bought),
            Bought => Some(Transferred),
            Transferred => Some(BatchMinted),
            BatchMinted => Some(BatchSold),
            BatchSold => None,
        }
    }
}

impl fmt::Display for ScenarioStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Launched => "launched",
            Self::Minted => "minted",
            Self::Approved => "approved",
            Self::Sold => "sold",
            Self::Bought => "bought",
            Self::Transferred => "transferred",
            Self::BatchMinted => "batchMinted",
            Self::BatchSold => "batchSold",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("step '{requested}' cannot run after '{current}'")]
    OutOfOrder {
        current: ScenarioStep,
        requested: ScenarioStep,
    },

    #[error("{step}: {source}")]
    Workflow {
        step: ScenarioStep,
        #[source]
        source: WorkflowError,
    },

    #[error("{step}: {source}")]
    Batch {
        step: ScenarioStep,
        #[source]
        source: BatchError,
    },

    #[error("{step}: ledger query failed: {source}")]
    Query {
        step: ScenarioStep,
        #[source]
        source: ServiceError,
    },

    #[error("{step}: {message}")]
    Postcondition { step: ScenarioStep, message: String },

    #[error("{step}: a soulbound NFT was not refused")]
    NotRefused { step: ScenarioStep },
}

/// Tracks which step may run next.
#[derive(Debug, Clone)]
pub struct StepTracker {
    current: ScenarioStep,
}

impl Default for StepTracker {
    fn default() -> Self {
        Self {
            current: ScenarioStep::Started,
        }
    }
}

impl StepTracker {
    pub fn current(&self) -> ScenarioStep {
        self.current
    }

    /// Refuse `step` unless it directly follows the last completed one.
    pub fn begin(&self, step: ScenarioStep) -> Result<(), ScenarioError> {
        if self.current.next() == Some(step) {
            Ok(())
        } else {
            Err(ScenarioError::OutOfOrder {
                current: self.current,
                requested: step,
            })
        }
    }

    pub fn complete(&mut self, step: ScenarioStep) -> Result<(), ScenarioError> {
        self.begin(step)?;
        self.current = step;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Accounts and report
// ---------------------------------------------------------------------------

/// Keys for every role in the scenario.
pub struct ScenarioAccounts {
    pub creator: AccountKeypair,
    pub buyer: AccountKeypair,
    pub recipient: AccountKeypair,
    /// Owners of the first two batch-minted NFTs, who then sell them.
    pub sellers: [AccountKeypair; 2],
}

impl ScenarioAccounts {
    pub const ROLES: [&'static str; 5] = ["creator", "buyer", "recipient", "seller1", "seller2"];

    pub fn generate() -> Self {
        Self {
            creator: AccountKeypair::generate(),
            buyer: AccountKeypair::generate(),
            recipient: AccountKeypair::generate(),
            sellers: [AccountKeypair::generate(), AccountKeypair::generate()],
        }
    }

    /// Build from keys listed in [`ROLES`](Self::ROLES) order.
    pub fn from_keys(keys: [AccountKeypair; 5]) -> Self {
        let [creator, buyer, recipient, seller1, seller2] = keys;
        Self {
            creator,
            buyer,
            recipient,
            sellers: [seller1, seller2],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step: ScenarioStep,
    /// Settlement hash, absent when the step was refused.
    pub hash: Option<SettlementHash>,
    pub note: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub soulbound: bool,
    pub collection: Option<Address>,
    pub nft: Option<Address>,
    pub batch_nfts: Vec<Address>,
    pub steps: Vec<StepOutcome>,
}

impl ScenarioReport {
    pub fn last_step(&self) -> Option<ScenarioStep> {
        self.steps.last().map(|s| s.step)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct ScenarioRunner<'a> {
    orchestrator: Arc<Orchestrator>,
    coordinator: BatchCoordinator,
    accounts: &'a ScenarioAccounts,
    metrics: &'a WorkflowMetrics,
    records: Option<RecordStore>,
    soulbound: bool,
    rng: StdRng,
    tracker: StepTracker,
    report: ScenarioReport,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        accounts: &'a ScenarioAccounts,
        metrics: &'a WorkflowMetrics,
    ) -> Self {
        Self {
            coordinator: BatchCoordinator::new(orchestrator.clone()),
            orchestrator,
            accounts,
            metrics,
            records: None,
            soulbound: false,
            rng: StdRng::from_entropy(),
            tracker: StepTracker::default(),
            report: ScenarioReport::default(),
        }
    }

    pub fn soulbound(mut self, soulbound: bool) -> Self {
        self.soulbound = soulbound;
        self
    }

    pub fn with_records(mut self, records: RecordStore) -> Self {
        self.records = Some(records);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub async fn run(mut self) -> Result<ScenarioReport, ScenarioError> {
        use ScenarioStep::*;
        self.report.soulbound = self.soulbound;
        let accounts = self.accounts;
        let creator = &accounts.creator;

        // Launch.
        self.tracker.begin(Launched)?;
        let params = fixtures::collection_params(&mut self.rng);
        let name = params.collection_name.clone();
        let request = OperationRequest::launch_collection(creator.address(), params);
        let receipt = self.execute(Launched, request, creator).await?;
        let collection = receipt
            .collection_address()
            .cloned()
            .ok_or_else(|| postcondition(Launched, "no collection address in receipt"))?;
        self.report.collection = Some(collection.clone());
        self.complete(Launched, Some(&receipt), format!("collection '{}'", name))?;

        // Mint.
        self.tracker.begin(Minted)?;
        let params = fixtures::mint_params(&mut self.rng, &creator.address(), self.soulbound);
        let request = OperationRequest::mint(creator.address(), collection.clone(), params);
        let receipt = self.execute(Minted, request, creator).await?;
        let nft = receipt
            .nft_address()
            .cloned()
            .ok_or_else(|| postcondition(Minted, "no nft address in receipt"))?;
        let minted = self.info(Minted, &collection, &nft).await?;
        ensure(minted.owner == creator.address(), Minted, "owner is not the creator")?;
        ensure(
            minted.capabilities.is_soulbound() == self.soulbound,
            Minted,
            "capabilities do not match the mint permissions",
        )?;
        self.report.nft = Some(nft.clone());
        self.complete(Minted, Some(&receipt), format!("nft {}", nft))?;

        if self.soulbound {
            self.refuse_all(&collection, &nft).await?;
        } else {
            self.trade(&collection, &nft).await?;
        }

        // Batch mint.
        self.tracker.begin(BatchMinted)?;
        let owners = [
            accounts.sellers[0].address(),
            accounts.sellers[1].address(),
            creator.address(),
        ];
        let requests: Vec<_> = owners
            .iter()
            .take(BATCH_MINT_SIZE)
            .map(|owner| {
                let params = fixtures::mint_params(&mut self.rng, owner, self.soulbound);
                OperationRequest::mint(creator.address(), collection.clone(), params)
            })
            .collect();
        let kinds: Vec<_> = requests.iter().map(OperationRequest::kind).collect();
        let batch = self
            .coordinator
            .execute_batch(requests, creator)
            .await
            .map_err(|source| ScenarioError::Batch {
                step: BatchMinted,
                source,
            })?;
        self.metrics.record_batch(&kinds, &batch);
        let nfts = self.check_batch(BatchMinted, &batch)?;
        check_contiguous_nonces(&batch, &creator.address())?;
        for (nft, owner) in nfts.iter().zip(&owners) {
            let info = self.info(BatchMinted, &collection, nft).await?;
            ensure(info.owner == *owner, BatchMinted, "batch mint went to the wrong owner")?;
        }
        for receipt in batch.receipts() {
            self.save_records(receipt);
        }
        self.report.batch_nfts = nfts.clone();
        self.complete(
            BatchMinted,
            batch.receipts().last(),
            format!("{} nfts minted", nfts.len()),
        )?;

        if self.soulbound {
            info!("soulbound scenario: skipping batch sell");
            return Ok(self.report);
        }

        // Batch sell across two holders.
        self.tracker.begin(BatchSold)?;
        let prices = [
            fixtures::random_price(&mut self.rng),
            fixtures::random_price(&mut self.rng),
        ];
        let requests: Vec<_> = accounts
            .sellers
            .iter()
            .zip(&nfts)
            .zip(prices)
            .map(|((seller, nft), price)| {
                OperationRequest::sell(seller.address(), collection.clone(), nft.clone(), price)
            })
            .collect();
        let kinds: Vec<_> = requests.iter().map(OperationRequest::kind).collect();
        let signers: Vec<&dyn Signer> = accounts.sellers.iter().map(|s| s as &dyn Signer).collect();
        let batch = self
            .coordinator
            .execute_multi_sender(requests, &signers)
            .await
            .map_err(|source| ScenarioError::Batch {
                step: BatchSold,
                source,
            })?;
        self.metrics.record_batch(&kinds, &batch);
        self.check_batch(BatchSold, &batch)?;
        for (nft, price) in nfts.iter().zip(prices) {
            let info = self.info(BatchSold, &collection, nft).await?;
            ensure(info.price == Some(price), BatchSold, "listing price not set")?;
        }
        self.complete(
            BatchSold,
            batch.receipts().last(),
            format!("listed at {:?}", prices),
        )?;

        Ok(self.report)
    }

    /// Approve, sell, buy and transfer the first NFT.
    async fn trade(&mut self, collection: &Address, nft: &Address) -> Result<(), ScenarioError> {
        use ScenarioStep::*;
        let accounts = self.accounts;
        let (creator, buyer, recipient) = (&accounts.creator, &accounts.buyer, &accounts.recipient);

        self.tracker.begin(Approved)?;
        let request = OperationRequest::approve(
            creator.address(),
            collection.clone(),
            nft.clone(),
            recipient.address(),
        );
        let receipt = self.execute(Approved, request, creator).await?;
        let approved = self.info(Approved, collection, nft).await?;
        ensure(
            approved.approved == Some(recipient.address()),
            Approved,
            "approval not recorded",
        )?;
        self.complete(Approved, Some(&receipt), format!("approved {}", recipient.address()))?;

        self.tracker.begin(Sold)?;
        let price = fixtures::random_price(&mut self.rng);
        let request =
            OperationRequest::sell(creator.address(), collection.clone(), nft.clone(), price);
        let receipt = self.execute(Sold, request, creator).await?;
        let listed = self.info(Sold, collection, nft).await?;
        ensure(listed.price == Some(price), Sold, "listing price not set")?;
        ensure(
            listed.approved != approved.approved,
            Sold,
            "approved address did not change on sale",
        )?;
        self.complete(Sold, Some(&receipt), format!("listed at {}", price))?;

        self.tracker.begin(Bought)?;
        let request = OperationRequest::buy(buyer.address(), collection.clone(), nft.clone());
        let receipt = self.execute(Bought, request, buyer).await?;
        let bought = self.info(Bought, collection, nft).await?;
        ensure(bought.owner == buyer.address(), Bought, "buyer does not own the nft")?;
        ensure(
            bought.approved != approved.approved,
            Bought,
            "approved address survived the purchase",
        )?;
        self.complete(Bought, Some(&receipt), format!("bought by {}", buyer.address()))?;

        self.tracker.begin(Transferred)?;
        let request = OperationRequest::transfer(
            buyer.address(),
            collection.clone(),
            nft.clone(),
            recipient.address(),
        );
        let receipt = self.execute(Transferred, request, buyer).await?;
        let moved = self.info(Transferred, collection, nft).await?;
        ensure(
            moved.owner == recipient.address(),
            Transferred,
            "recipient does not own the nft",
        )?;
        self.complete(
            Transferred,
            Some(&receipt),
            format!("transferred to {}", recipient.address()),
        )
    }

    /// Every trading step must be refused for a soulbound NFT.
    async fn refuse_all(&mut self, collection: &Address, nft: &Address) -> Result<(), ScenarioError> {
        use ScenarioStep::*;
        let accounts = self.accounts;
        let (creator, buyer, recipient) = (&accounts.creator, &accounts.buyer, &accounts.recipient);
        let price = fixtures::random_price(&mut self.rng);

        let attempts = [
            (
                Approved,
                OperationRequest::approve(
                    creator.address(),
                    collection.clone(),
                    nft.clone(),
                    recipient.address(),
                ),
                creator,
            ),
            (
                Sold,
                OperationRequest::sell(creator.address(), collection.clone(), nft.clone(), price),
                creator,
            ),
            (
                Bought,
                OperationRequest::buy(buyer.address(), collection.clone(), nft.clone()),
                buyer,
            ),
            (
                Transferred,
                OperationRequest::transfer(
                    creator.address(),
                    collection.clone(),
                    nft.clone(),
                    recipient.address(),
                ),
                creator,
            ),
        ];

        for (step, request, signer) in attempts {
            self.tracker.begin(step)?;
            let kind = request.kind();
            let result = self.orchestrator.execute(request, signer).await;
            self.metrics.record(kind, &result);
            match result {
                Err(err) if refused(&err) => {
                    info!(%step, error = %err, "refused as expected");
                    self.complete(step, None, format!("refused: {}", err))?;
                }
                Err(source) => return Err(ScenarioError::Workflow { step, source }),
                Ok(_) => return Err(ScenarioError::NotRefused { step }),
            }
        }

        let after = self.info(Transferred, collection, nft).await?;
        ensure(
            after.owner == creator.address(),
            Transferred,
            "soulbound nft changed owner",
        )
    }

    async fn execute(
        &mut self,
        step: ScenarioStep,
        request: OperationRequest,
        signer: &dyn Signer,
    ) -> Result<WorkflowReceipt, ScenarioError> {
        let kind = request.kind();
        let result = self.orchestrator.execute(request, signer).await;
        self.metrics.record(kind, &result);
        let receipt = result.map_err(|source| ScenarioError::Workflow { step, source })?;
        self.save_records(&receipt);
        Ok(receipt)
    }

    async fn info(
        &self,
        step: ScenarioStep,
        collection: &Address,
        nft: &Address,
    ) -> Result<NftInfo, ScenarioError> {
        self.orchestrator
            .ledger()
            .nft_info(collection, nft)
            .await
            .map_err(|source| ScenarioError::Query { step, source })
    }

    fn check_batch(
        &self,
        step: ScenarioStep,
        batch: &BatchReport,
    ) -> Result<Vec<Address>, ScenarioError> {
        if let Some(err) = batch.entries.iter().find_map(|e| e.error()) {
            return Err(ScenarioError::Workflow {
                step,
                source: err.clone(),
            });
        }
        if !batch.all_settled() {
            return Err(postcondition(step, "batch did not settle completely"));
        }
        Ok(batch
            .receipts()
            .filter_map(|r| r.nft_address().cloned())
            .collect())
    }

    fn save_records(&self, receipt: &WorkflowReceipt) {
        let Some(records) = &self.records else {
            return;
        };
        // A record that fails to write is not a reason to abandon the run.
        if let Err(err) = records.save(receipt) {
            tracing::warn!(error = %err, "failed to write record files");
        }
    }

    fn complete(
        &mut self,
        step: ScenarioStep,
        receipt: Option<&WorkflowReceipt>,
        note: String,
    ) -> Result<(), ScenarioError> {
        self.tracker.complete(step)?;
        info!(%step, note = %note, "scenario step complete");
        self.report.steps.push(StepOutcome {
            step,
            hash: receipt.map(|r| r.hash.clone()),
            note,
        });
        Ok(())
    }
}

/// Refused either up front by the capability check or by the ledger.
fn refused(err: &WorkflowError) -> bool {
    matches!(
        err,
        WorkflowError::CapabilityDenied { .. }
            | WorkflowError::AppliedMismatch {
                status: TxStatus::Failed,
                ..
            }
    )
}

fn postcondition(step: ScenarioStep, message: &str) -> ScenarioError {
    ScenarioError::Postcondition {
        step,
        message: message.to_string(),
    }
}

fn ensure(condition: bool, step: ScenarioStep, message: &str) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(postcondition(step, message))
    }
}

fn check_contiguous_nonces(batch: &BatchReport, sender: &Address) -> Result<(), ScenarioError> {
    let step = ScenarioStep::BatchMinted;
    let base = batch
        .base_nonces
        .get(sender)
        .copied()
        .ok_or_else(|| postcondition(step, "no base nonce for the creator"))?;
    let contiguous = batch
        .receipts()
        .zip(base..)
        .all(|(receipt, expected)| receipt.nonce == expected);
    ensure(contiguous, step, "batch nonces are not contiguous")
}
