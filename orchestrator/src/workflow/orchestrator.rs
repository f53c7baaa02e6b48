//! # Workflow Orchestrator
//!
//! Drives one operation through the full pipeline:
//!
//! 0. **Precondition**: for approve/sell/buy/transfer, fetch the NFT and
//!    refuse early if its capabilities forbid the operation.
//! 1. **Build** the unsigned transaction.
//! 2. **Sign** the signer payload locally.
//! 3. **Submit** the envelope for proving.
//! 4. **Await proof**: poll until the job yields exactly one hash.
//! 5. **Await inclusion**: poll until the hash leaves the mempool.
//! 6. **Confirm**: after a settling delay, poll until a terminal status;
//!    only `applied` counts as success.
//!
//! Steps 0 through 4 are [`Orchestrator::submit`], steps 5 and 6 are
//! [`Orchestrator::settle`]. The batch coordinator calls them separately
//! so it can submit a whole batch before waiting on any of it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{Stage, WorkflowError};
use super::receipt::{WorkflowReceipt, WorkflowResult};
use super::state::{WorkflowState, WorkflowTracker};
use crate::config::OrchestratorConfig;
use crate::operation::{
    Address, JobHandle, NftCapabilities, OperationKind, OperationRequest, SettlementHash,
    TransactionMetadata, TxStatus,
};
use crate::poll::{cancellable_sleep, poll_until, CancelSignal, PollOutcome};
use crate::service::{
    LedgerService, ProofPoll, ProverService, ServiceError, TransactionBuilderService,
};
use crate::signer::Signer;

/// An operation that made it through proving and now awaits settlement.
#[derive(Debug)]
pub struct Submitted {
    tracker: WorkflowTracker,
    sender: Address,
    nonce: u64,
    job: JobHandle,
    hash: SettlementHash,
    metadata: TransactionMetadata,
}

impl Submitted {
    pub fn kind(&self) -> OperationKind {
        self.tracker.kind()
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &SettlementHash {
        &self.hash
    }

    pub fn metadata(&self) -> &TransactionMetadata {
        &self.metadata
    }
}

/// Sequences build, sign, prove and settle for single operations.
pub struct Orchestrator {
    builder: Arc<dyn TransactionBuilderService>,
    prover: Arc<dyn ProverService>,
    ledger: Arc<dyn LedgerService>,
    config: OrchestratorConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Orchestrator {
    pub fn new(
        builder: Arc<dyn TransactionBuilderService>,
        prover: Arc<dyn ProverService>,
        ledger: Arc<dyn LedgerService>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            builder,
            prover,
            ledger,
            config,
            shutdown: None,
        }
    }

    /// Use one service for all three roles.
    pub fn from_service<S>(service: Arc<S>, config: OrchestratorConfig) -> Self
    where
        S: TransactionBuilderService + ProverService + LedgerService + 'static,
    {
        Self::new(service.clone(), service.clone(), service, config)
    }

    /// Abort pending polls when `true` is sent or the sender is dropped.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerService> {
        &self.ledger
    }

    fn cancel_signal(&self) -> CancelSignal {
        self.shutdown
            .clone()
            .map(CancelSignal::new)
            .unwrap_or_default()
    }

    /// Run one operation end to end.
    pub async fn execute(&self, request: OperationRequest, signer: &dyn Signer) -> WorkflowResult {
        let submitted = self.submit(request, signer).await?;
        self.settle(submitted).await
    }

    /// Steps 0 through 4: precondition, build, sign, submit, await proof.
    pub async fn submit(
        &self,
        request: OperationRequest,
        signer: &dyn Signer,
    ) -> Result<Submitted, WorkflowError> {
        let mut tracker = WorkflowTracker::new(request.kind());
        info!(
            operation = %request.kind(),
            sender = %request.sender(),
            nonce = ?request.nonce(),
            "workflow started"
        );

        match self.submit_inner(&request, signer, &mut tracker).await {
            Ok((nonce, job, hash, metadata)) => Ok(Submitted {
                tracker,
                sender: request.sender().clone(),
                nonce,
                job,
                hash,
                metadata,
            }),
            Err(err) => {
                fail(&mut tracker, &err);
                Err(err)
            }
        }
    }

    async fn submit_inner(
        &self,
        request: &OperationRequest,
        signer: &dyn Signer,
        tracker: &mut WorkflowTracker,
    ) -> Result<(u64, JobHandle, SettlementHash, TransactionMetadata), WorkflowError> {
        self.check_capabilities(request).await?;

        let unsigned = self
            .builder
            .build(request)
            .await
            .map_err(WorkflowError::Build)?;
        transition(tracker, WorkflowState::Built);

        let signature = signer.sign(&unsigned.signer_payload)?;
        let nonce = unsigned.nonce();
        let metadata = unsigned.metadata.clone();
        let envelope = unsigned.into_signed(signature);
        transition(tracker, WorkflowState::Signed);

        let job = self
            .prover
            .submit_for_proof(envelope)
            .await
            .map_err(WorkflowError::Submit)?;
        transition(tracker, WorkflowState::Submitted);
        debug!(operation = %request.kind(), nonce, %job, "submitted for proof");

        transition(tracker, WorkflowState::ProofPending);
        let hash = self.await_proof(&job).await?;
        transition(tracker, WorkflowState::ProofReady);
        debug!(operation = %request.kind(), %job, %hash, "proof ready");

        Ok((nonce, job, hash, metadata))
    }

    async fn check_capabilities(&self, request: &OperationRequest) -> Result<(), WorkflowError> {
        let kind = request.kind();
        if !self.config.check_capabilities || !kind.touches_existing_nft() {
            return Ok(());
        }
        let (Some(collection), Some(nft)) =
            (request.operation().collection(), request.operation().nft())
        else {
            return Ok(());
        };
        let Some(capability) = NftCapabilities::required_for(kind) else {
            return Ok(());
        };

        let info = self
            .ledger
            .nft_info(collection, nft)
            .await
            .map_err(WorkflowError::Precondition)?;
        if !info.capabilities.permits(kind) {
            return Err(WorkflowError::CapabilityDenied {
                kind,
                nft: nft.clone(),
                capability,
            });
        }
        Ok(())
    }

    async fn await_proof(&self, job: &JobHandle) -> Result<SettlementHash, WorkflowError> {
        let prover = &self.prover;
        let mut cancel = self.cancel_signal();
        let outcome = poll_until(&self.config.proof_poll, &mut cancel, move |_| async move {
            Ok::<_, ServiceError>(match prover.proof_status(job).await? {
                ProofPoll::Pending => None,
                ProofPoll::Ready(hashes) => Some(Ok(hashes)),
                ProofPoll::Failed(reason) => Some(Err(reason)),
            })
        })
        .await
        .map_err(|source| WorkflowError::Poll {
            stage: Stage::Proof,
            source,
        })?;

        match outcome {
            PollOutcome::Ready(Ok(mut hashes)) => {
                if hashes.len() != 1 {
                    return Err(WorkflowError::UnexpectedProofCount {
                        job: job.clone(),
                        count: hashes.len(),
                    });
                }
                Ok(hashes.remove(0))
            }
            PollOutcome::Ready(Err(reason)) => Err(WorkflowError::ProofJobFailed {
                job: job.clone(),
                reason,
            }),
            PollOutcome::TimedOut { attempts, elapsed } => Err(WorkflowError::ProofTimeout {
                job: job.clone(),
                attempts,
                elapsed,
            }),
            PollOutcome::Cancelled => Err(WorkflowError::Cancelled {
                stage: Stage::Proof,
            }),
        }
    }

    /// Steps 5 and 6: await inclusion, then confirm the final status.
    pub async fn settle(&self, submitted: Submitted) -> WorkflowResult {
        let Submitted {
            mut tracker,
            sender,
            nonce,
            job,
            hash,
            metadata,
        } = submitted;
        let kind = tracker.kind();

        transition(&mut tracker, WorkflowState::IncludedPending);
        match self.settle_inner(&hash).await {
            Ok(status) => {
                transition(&mut tracker, WorkflowState::Confirmed);
                info!(operation = %kind, %sender, nonce, %hash, %status, "workflow confirmed");
                Ok(WorkflowReceipt {
                    id: Uuid::new_v4(),
                    kind,
                    sender,
                    nonce,
                    job,
                    hash,
                    status,
                    metadata,
                    started_at: tracker.started_at(),
                    finished_at: Utc::now(),
                    history: tracker.into_history(),
                })
            }
            Err(err) => {
                fail(&mut tracker, &err);
                Err(err)
            }
        }
    }

    async fn settle_inner(
        &self,
        hash: &SettlementHash,
    ) -> Result<TxStatus, WorkflowError> {
        let ledger = &self.ledger;
        let mut cancel = self.cancel_signal();

        let included = poll_until(&self.config.inclusion_poll, &mut cancel, move |_| async move {
            let status = ledger.tx_status(hash).await?;
            Ok::<_, ServiceError>(status.is_included().then_some(status))
        })
        .await
        .map_err(|source| WorkflowError::Poll {
            stage: Stage::Inclusion,
            source,
        })?;
        match included {
            PollOutcome::Ready(status) => debug!(%hash, %status, "included"),
            PollOutcome::TimedOut { attempts, elapsed } => {
                return Err(WorkflowError::SettlementTimeout {
                    hash: hash.clone(),
                    stage: Stage::Inclusion,
                    attempts,
                    elapsed,
                })
            }
            PollOutcome::Cancelled => {
                return Err(WorkflowError::Cancelled {
                    stage: Stage::Inclusion,
                })
            }
        }

        if !cancellable_sleep(self.config.settle_delay(), &mut cancel).await {
            return Err(WorkflowError::Cancelled {
                stage: Stage::Confirm,
            });
        }

        let terminal = poll_until(&self.config.confirm_poll, &mut cancel, move |_| async move {
            let status = ledger.tx_status(hash).await?;
            Ok::<_, ServiceError>(status.is_terminal().then_some(status))
        })
        .await
        .map_err(|source| WorkflowError::Poll {
            stage: Stage::Confirm,
            source,
        })?;

        match terminal {
            PollOutcome::Ready(TxStatus::Applied) => {
                Ok(TxStatus::Applied)
            }
            PollOutcome::Ready(status) => Err(WorkflowError::AppliedMismatch {
                hash: hash.clone(),
                status,
            }),
            PollOutcome::TimedOut { attempts, elapsed } => Err(WorkflowError::SettlementTimeout {
                hash: hash.clone(),
                stage: Stage::Confirm,
                attempts,
                elapsed,
            }),
            PollOutcome::Cancelled => Err(WorkflowError::Cancelled {
                stage: Stage::Confirm,
            }),
        }
    }
}

fn transition(tracker: &mut WorkflowTracker, to: WorkflowState) {
    let from = tracker.state();
    if tracker.advance(to) {
        debug!(operation = %tracker.kind(), %from, %to, "state transition");
    } else {
        warn!(operation = %tracker.kind(), %from, %to, "refused state transition");
    }
}

fn fail(tracker: &mut WorkflowTracker, err: &WorkflowError) {
    let from = tracker.state();
    tracker.fail(err.to_string());
    warn!(
        operation = %tracker.kind(),
        %from,
        stage = %err.stage(),
        transient = err.is_transient(),
        error = %err,
        "workflow failed"
    );
}
