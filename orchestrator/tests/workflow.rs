//! Workflow integration tests against the in-memory sandbox.
//!
//! Every test builds its own sandbox and orchestrator, so there is no
//! shared ledger and no ordering dependency. Time is paused: the poll
//! loops sleep on tokio's clock, which auto-advances whenever the runtime
//! is idle, so even multi-minute budgets finish instantly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use nftflow_orchestrator::config::{OrchestratorConfig, PollPolicy};
use nftflow_orchestrator::crypto::AccountKeypair;
use nftflow_orchestrator::operation::{
    Address, LaunchCollectionParams, MintParams, NftInfo, NftMetadata, NftPermissions,
    OperationRequest, SettlementHash, Trait, TraitKind, TxStatus,
};
use nftflow_orchestrator::service::{FaultPlan, LedgerService, SandboxService, ServiceError};
use nftflow_orchestrator::signer::SignError;
use nftflow_orchestrator::workflow::{
    BatchCoordinator, BatchEntry, BatchError, Orchestrator, Stage, WorkflowError, WorkflowState,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::fast(Duration::from_millis(100))
}

fn setup() -> (Arc<SandboxService>, Arc<Orchestrator>) {
    setup_with(fast_config())
}

fn setup_with(config: OrchestratorConfig) -> (Arc<SandboxService>, Arc<Orchestrator>) {
    let sandbox = Arc::new(SandboxService::new());
    let orchestrator = Arc::new(Orchestrator::from_service(sandbox.clone(), config));
    (sandbox, orchestrator)
}

fn launch_request(creator: &AccountKeypair, name: &str) -> OperationRequest {
    OperationRequest::launch_collection(
        creator.address(),
        LaunchCollectionParams {
            collection_name: name.to_string(),
            symbol: "NFT".into(),
            admin_contract: "standard".into(),
            master_nft: NftMetadata {
                name: name.to_string(),
                image: "https://example.com/master.png".into(),
                banner: None,
                description: "master".into(),
                traits: vec![],
            },
        },
    )
}

fn mint_request(
    creator: &AccountKeypair,
    collection: &Address,
    owner: &Address,
    permissions: NftPermissions,
) -> OperationRequest {
    OperationRequest::mint(
        creator.address(),
        collection.clone(),
        MintParams {
            name: "Pebble".into(),
            owner: owner.clone(),
            permissions,
            metadata: NftMetadata {
                name: "Pebble".into(),
                image: "https://example.com/pebble.png".into(),
                banner: None,
                description: "a pebble".into(),
                traits: vec![Trait {
                    key: "secret".into(),
                    kind: TraitKind::String,
                    value: "hidden".into(),
                    is_private: true,
                }],
            },
        },
    )
}

/// Reports `unknown` for the first `unknown_probes` status queries, then
/// defers to the sandbox. Mimics a node that has not seen the transaction
/// yet.
struct LaggingLedger {
    inner: Arc<SandboxService>,
    unknown_probes: usize,
    probes: AtomicUsize,
}

impl LaggingLedger {
    fn new(inner: Arc<SandboxService>, unknown_probes: usize) -> Self {
        Self {
            inner,
            unknown_probes,
            probes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LedgerService for LaggingLedger {
    async fn tx_status(&self, hash: &SettlementHash) -> Result<TxStatus, ServiceError> {
        if self.probes.fetch_add(1, Ordering::SeqCst) < self.unknown_probes {
            return Ok(TxStatus::Other("unknown".into()));
        }
        self.inner.tx_status(hash).await
    }

    async fn nonce(&self, address: &Address) -> Result<u64, ServiceError> {
        self.inner.nonce(address).await
    }

    async fn nft_info(&self, collection: &Address, nft: &Address) -> Result<NftInfo, ServiceError> {
        self.inner.nft_info(collection, nft).await
    }
}

fn setup_lagging(unknown_probes: usize) -> (Arc<SandboxService>, Orchestrator) {
    let sandbox = Arc::new(SandboxService::new());
    let ledger = Arc::new(LaggingLedger::new(sandbox.clone(), unknown_probes));
    let orchestrator = Orchestrator::new(sandbox.clone(), sandbox.clone(), ledger, fast_config());
    (sandbox, orchestrator)
}

async fn launch(orchestrator: &Orchestrator, creator: &AccountKeypair) -> Address {
    let receipt = orchestrator
        .execute(launch_request(creator, "Tide"), creator)
        .await
        .expect("launch should settle");
    receipt.collection_address().cloned().expect("collection address")
}

async fn mint(
    orchestrator: &Orchestrator,
    creator: &AccountKeypair,
    collection: &Address,
    owner: &Address,
    permissions: NftPermissions,
) -> Address {
    let receipt = orchestrator
        .execute(mint_request(creator, collection, owner, permissions), creator)
        .await
        .expect("mint should settle");
    receipt.nft_address().cloned().expect("nft address")
}

// ---------------------------------------------------------------------------
// Single operations
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn launch_and_mint_reach_applied() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();

    let receipt = orchestrator
        .execute(launch_request(&creator, "Tide"), &creator)
        .await
        .unwrap();
    assert_eq!(receipt.status, TxStatus::Applied);
    assert_eq!(receipt.nonce, 0);
    let collection = receipt.collection_address().cloned().unwrap();
    assert!(sandbox.collection_exists(&collection));
    assert_eq!(
        receipt.history.last().map(|c| c.state),
        Some(WorkflowState::Confirmed)
    );

    let nft = mint(
        &orchestrator,
        &creator,
        &collection,
        &creator.address(),
        NftPermissions::default(),
    )
    .await;
    let info = sandbox.nft_info(&collection, &nft).await.unwrap();
    assert_eq!(info.owner, creator.address());
    assert!(info.capabilities.sellable);
}

#[tokio::test(start_paused = true)]
async fn mint_before_launch_is_applied_is_rejected() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();

    // Proven but never settled: the launch is still queued on the ledger.
    let pending = orchestrator
        .submit(launch_request(&creator, "Early"), &creator)
        .await
        .unwrap();
    let collection = pending.metadata().collection_address.clone().unwrap();
    assert!(!sandbox.collection_exists(&collection));

    let err = orchestrator
        .execute(
            mint_request(&creator, &collection, &creator.address(), NftPermissions::default()),
            &creator,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Build(ServiceError::Rejected { status: 422, .. })
    ));
    assert_eq!(err.stage(), Stage::Build);
}

#[tokio::test(start_paused = true)]
async fn transfer_moves_ownership() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    let holder = AccountKeypair::generate();
    let collection = launch(&orchestrator, &creator).await;
    let nft = mint(
        &orchestrator,
        &creator,
        &collection,
        &creator.address(),
        NftPermissions::default(),
    )
    .await;

    orchestrator
        .execute(
            OperationRequest::transfer(
                creator.address(),
                collection.clone(),
                nft.clone(),
                holder.address(),
            ),
            &creator,
        )
        .await
        .unwrap();

    let info = sandbox.nft_info(&collection, &nft).await.unwrap();
    assert_eq!(info.owner, holder.address());
    assert_ne!(info.owner, creator.address());
}

#[tokio::test(start_paused = true)]
async fn approve_sell_buy_changes_approved_and_owner() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    let delegate = AccountKeypair::generate();
    let buyer = AccountKeypair::generate();
    let collection = launch(&orchestrator, &creator).await;
    let nft = mint(
        &orchestrator,
        &creator,
        &collection,
        &creator.address(),
        NftPermissions::default(),
    )
    .await;

    orchestrator
        .execute(
            OperationRequest::approve(
                creator.address(),
                collection.clone(),
                nft.clone(),
                delegate.address(),
            ),
            &creator,
        )
        .await
        .unwrap();
    let before_sale = sandbox.nft_info(&collection, &nft).await.unwrap();
    assert_eq!(before_sale.approved, Some(delegate.address()));

    orchestrator
        .execute(
            OperationRequest::sell(creator.address(), collection.clone(), nft.clone(), 10),
            &creator,
        )
        .await
        .unwrap();
    let on_sale = sandbox.nft_info(&collection, &nft).await.unwrap();
    assert_eq!(on_sale.price, Some(10));
    assert_ne!(on_sale.approved, before_sale.approved);

    orchestrator
        .execute(
            OperationRequest::buy(buyer.address(), collection.clone(), nft.clone()),
            &buyer,
        )
        .await
        .unwrap();
    let sold = sandbox.nft_info(&collection, &nft).await.unwrap();
    assert_eq!(sold.owner, buyer.address());
    assert_eq!(sold.price, None);
    assert_ne!(sold.approved, before_sale.approved);
    assert_ne!(sold.approved, on_sale.approved);
}

#[tokio::test(start_paused = true)]
async fn wrong_key_fails_at_sign_without_submitting() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    let impostor = AccountKeypair::generate();

    let err = orchestrator
        .execute(launch_request(&creator, "Tide"), &impostor)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Sign(SignError::SenderMismatch { .. })
    ));
    assert!(!err.is_transient());
    assert_eq!(sandbox.submission_count(), 0);
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn soulbound_nft_is_denied_before_build() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    let holder = AccountKeypair::generate();
    let collection = launch(&orchestrator, &creator).await;
    let nft = mint(
        &orchestrator,
        &creator,
        &collection,
        &creator.address(),
        NftPermissions::soulbound(),
    )
    .await;
    let submissions = sandbox.submission_count();

    let denied = [
        OperationRequest::approve(
            creator.address(),
            collection.clone(),
            nft.clone(),
            holder.address(),
        ),
        OperationRequest::sell(creator.address(), collection.clone(), nft.clone(), 10),
        OperationRequest::transfer(
            creator.address(),
            collection.clone(),
            nft.clone(),
            holder.address(),
        ),
    ];
    for request in denied {
        let kind = request.kind();
        let err = orchestrator.execute(request, &creator).await.unwrap_err();
        assert!(
            matches!(err, WorkflowError::CapabilityDenied { .. }),
            "{} should be denied, got {:?}",
            kind,
            err
        );
    }
    assert_eq!(sandbox.submission_count(), submissions);
}

#[tokio::test(start_paused = true)]
async fn unchecked_soulbound_transfer_fails_on_ledger() {
    let config = OrchestratorConfig {
        check_capabilities: false,
        ..fast_config()
    };
    let (sandbox, orchestrator) = setup_with(config);
    let creator = AccountKeypair::generate();
    let holder = AccountKeypair::generate();
    let collection = launch(&orchestrator, &creator).await;
    let nft = mint(
        &orchestrator,
        &creator,
        &collection,
        &creator.address(),
        NftPermissions::soulbound(),
    )
    .await;

    let err = orchestrator
        .execute(
            OperationRequest::transfer(
                creator.address(),
                collection.clone(),
                nft.clone(),
                holder.address(),
            ),
            &creator,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::AppliedMismatch {
            status: TxStatus::Failed,
            ..
        }
    ));
    let info = sandbox.nft_info(&collection, &nft).await.unwrap();
    assert_eq!(info.owner, creator.address());
}

// ---------------------------------------------------------------------------
// Proof and settlement failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn non_applied_final_status_is_a_mismatch() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    sandbox.set_faults(FaultPlan {
        final_status: Some(TxStatus::Failed),
        ..FaultPlan::default()
    });

    let err = orchestrator
        .execute(launch_request(&creator, "Tide"), &creator)
        .await
        .unwrap_err();
    match err {
        WorkflowError::AppliedMismatch { status, .. } => {
            assert_eq!(status, TxStatus::Failed)
        }
        other => panic!("expected AppliedMismatch, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn zero_proof_hashes_is_missing_settlement() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    sandbox.set_faults(FaultPlan {
        proof_hash_count: Some(0),
        ..FaultPlan::default()
    });

    let err = orchestrator
        .execute(launch_request(&creator, "Tide"), &creator)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::UnexpectedProofCount { count: 0, .. }
    ));
    assert!(err.is_missing_settlement());
}

#[tokio::test(start_paused = true)]
async fn two_proof_hashes_is_a_protocol_violation() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    sandbox.set_faults(FaultPlan {
        proof_hash_count: Some(2),
        ..FaultPlan::default()
    });

    let err = orchestrator
        .execute(launch_request(&creator, "Tide"), &creator)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::UnexpectedProofCount { count: 2, .. }
    ));
    assert!(!err.is_missing_settlement());
    assert!(!err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn failed_proof_job_is_reported() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    sandbox.set_faults(FaultPlan {
        proof_failure: Some("prover out of memory".into()),
        ..FaultPlan::default()
    });

    let err = orchestrator
        .execute(launch_request(&creator, "Tide"), &creator)
        .await
        .unwrap_err();
    match err {
        WorkflowError::ProofJobFailed { reason, .. } => {
            assert_eq!(reason, "prover out of memory")
        }
        other => panic!("expected ProofJobFailed, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn proof_that_never_completes_times_out() {
    let config = OrchestratorConfig {
        proof_poll: PollPolicy::fixed(Duration::from_secs(1), 5),
        ..fast_config()
    };
    let (sandbox, orchestrator) = setup_with(config);
    let creator = AccountKeypair::generate();
    sandbox.set_faults(FaultPlan {
        proof_never_ready: true,
        ..FaultPlan::default()
    });

    let err = orchestrator
        .execute(launch_request(&creator, "Tide"), &creator)
        .await
        .unwrap_err();
    match &err {
        WorkflowError::ProofTimeout { attempts, .. } => assert_eq!(*attempts, 5),
        other => panic!("expected ProofTimeout, got {:?}", other),
    }
    assert!(err.is_transient());
    assert_eq!(err.stage(), Stage::Proof);
}

#[tokio::test(start_paused = true)]
async fn transaction_never_included_times_out_at_inclusion() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    sandbox.set_faults(FaultPlan {
        never_included: true,
        ..FaultPlan::default()
    });

    let err = orchestrator
        .execute(launch_request(&creator, "Tide"), &creator)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::SettlementTimeout {
            stage: Stage::Inclusion,
            ..
        }
    ));
    assert!(err.settlement_hash().is_some());
}

#[tokio::test(start_paused = true)]
async fn unrecognised_status_keeps_waiting_for_inclusion() {
    let (sandbox, orchestrator) = setup_lagging(2);
    let creator = AccountKeypair::generate();

    let receipt = orchestrator
        .execute(launch_request(&creator, "Tide"), &creator)
        .await
        .expect("unknown status must not end the wait");
    assert_eq!(receipt.status, TxStatus::Applied);
    assert_eq!(sandbox.applied_nonces(&creator.address()), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn status_that_stays_unrecognised_times_out() {
    let (_sandbox, orchestrator) = setup_lagging(usize::MAX);
    let creator = AccountKeypair::generate();

    let err = orchestrator
        .execute(launch_request(&creator, "Tide"), &creator)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            WorkflowError::SettlementTimeout {
                stage: Stage::Inclusion,
                ..
            }
        ),
        "got {:?}",
        err
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_a_pending_proof_wait() {
    let (tx, rx) = watch::channel(false);
    let sandbox = Arc::new(SandboxService::new());
    let config = OrchestratorConfig {
        proof_poll: PollPolicy::fixed(Duration::from_secs(10), 1_000),
        ..fast_config()
    };
    let orchestrator = Orchestrator::from_service(sandbox.clone(), config).with_shutdown(rx);
    sandbox.set_faults(FaultPlan {
        proof_never_ready: true,
        ..FaultPlan::default()
    });
    let creator = AccountKeypair::generate();

    let (result, _) = tokio::join!(
        orchestrator.execute(launch_request(&creator, "Tide"), &creator),
        async move {
            tokio::time::sleep(Duration::from_secs(35)).await;
            let _ = tx.send(true);
        }
    );
    let err = result.unwrap_err();
    assert_eq!(err, WorkflowError::Cancelled { stage: Stage::Proof });
    // The job was submitted; cancelling only stops us watching it.
    assert_eq!(sandbox.submission_count(), 1);
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn batch_mint_uses_contiguous_nonces() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    sandbox.seed_nonce(&creator.address(), 5);
    let collection = launch(&orchestrator, &creator).await;

    let holders: Vec<AccountKeypair> = (0..3).map(|_| AccountKeypair::generate()).collect();
    let requests = holders
        .iter()
        .map(|h| mint_request(&creator, &collection, &h.address(), NftPermissions::default()))
        .collect();

    let coordinator = BatchCoordinator::new(orchestrator.clone());
    let report = coordinator.execute_batch(requests, &creator).await.unwrap();

    assert!(report.all_settled());
    assert_eq!(report.base_nonces.get(&creator.address()), Some(&6));
    let nonces: Vec<u64> = report.receipts().map(|r| r.nonce).collect();
    assert_eq!(nonces, vec![6, 7, 8]);
    assert_eq!(sandbox.applied_nonces(&creator.address()), vec![5, 6, 7, 8]);

    for (receipt, holder) in report.receipts().zip(&holders) {
        let nft = receipt.nft_address().unwrap();
        let info = sandbox.nft_info(&collection, nft).await.unwrap();
        assert_eq!(info.owner, holder.address());
    }
    assert!(!coordinator.is_busy(&creator.address()));
}

#[tokio::test(start_paused = true)]
async fn batch_stops_at_first_submission_failure() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    let collection = launch(&orchestrator, &creator).await;
    // Submission 0 was the launch; fail the batch's second request.
    sandbox.set_faults(FaultPlan {
        reject_submission_at: Some(2),
        ..FaultPlan::default()
    });

    let requests = (0..4)
        .map(|_| mint_request(&creator, &collection, &creator.address(), NftPermissions::default()))
        .collect();
    let coordinator = BatchCoordinator::new(orchestrator.clone());
    let report = coordinator.execute_batch(requests, &creator).await.unwrap();

    assert_eq!(report.aborted_at, Some(1));
    assert!(report.entries[0].is_settled());
    assert!(matches!(
        report.entries[1],
        BatchEntry::Failed(WorkflowError::Submit(_))
    ));
    assert!(matches!(report.entries[2], BatchEntry::NotSubmitted));
    assert!(matches!(report.entries[3], BatchEntry::NotSubmitted));
    // Nothing after the failing request reached the prover.
    assert_eq!(sandbox.submission_count(), 3);
    assert_eq!(sandbox.applied_nonces(&creator.address()), vec![0, 1]);

    let summary = report.summary();
    assert_eq!((summary.settled, summary.failed, summary.not_submitted), (1, 1, 2));
}

#[tokio::test(start_paused = true)]
async fn second_batch_for_busy_sender_is_rejected() {
    let (_sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    let collection = launch(&orchestrator, &creator).await;
    let coordinator = BatchCoordinator::new(orchestrator.clone());

    let first = vec![mint_request(
        &creator,
        &collection,
        &creator.address(),
        NftPermissions::default(),
    )];
    let second = vec![mint_request(
        &creator,
        &collection,
        &creator.address(),
        NftPermissions::default(),
    )];

    let (a, b) = tokio::join!(
        coordinator.execute_batch(first, &creator),
        coordinator.execute_batch(second, &creator)
    );
    assert!(a.unwrap().all_settled());
    assert_eq!(b.unwrap_err(), BatchError::SenderBusy(creator.address()));
    assert!(!coordinator.is_busy(&creator.address()));
}

#[tokio::test(start_paused = true)]
async fn batch_rejects_explicit_nonces_and_empty_input() {
    let (_sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    let coordinator = BatchCoordinator::new(orchestrator);

    let err = coordinator
        .execute_batch(vec![], &creator)
        .await
        .unwrap_err();
    assert_eq!(err, BatchError::EmptyBatch);

    let err = coordinator
        .execute_batch(vec![launch_request(&creator, "Tide").with_nonce(3)], &creator)
        .await
        .unwrap_err();
    assert_eq!(err, BatchError::ExplicitNonce { index: 0 });
}

#[tokio::test(start_paused = true)]
async fn batch_sell_across_holders_keeps_order() {
    let (sandbox, orchestrator) = setup();
    let creator = AccountKeypair::generate();
    let holders: Vec<AccountKeypair> = (0..2).map(|_| AccountKeypair::generate()).collect();
    let collection = launch(&orchestrator, &creator).await;

    let mut nfts = Vec::new();
    for holder in &holders {
        nfts.push(
            mint(
                &orchestrator,
                &creator,
                &collection,
                &holder.address(),
                NftPermissions::default(),
            )
            .await,
        );
    }

    let prices = [30, 70];
    let requests = holders
        .iter()
        .zip(&nfts)
        .zip(prices)
        .map(|((holder, nft), price)| {
            OperationRequest::sell(holder.address(), collection.clone(), nft.clone(), price)
        })
        .collect();
    let signers: Vec<&dyn nftflow_orchestrator::Signer> =
        holders.iter().map(|h| h as &dyn nftflow_orchestrator::Signer).collect();

    let coordinator = BatchCoordinator::new(orchestrator.clone());
    let report = coordinator
        .execute_multi_sender(requests, &signers)
        .await
        .unwrap();

    assert!(report.all_settled());
    for ((receipt, holder), nft) in report.receipts().zip(&holders).zip(&nfts) {
        assert_eq!(receipt.sender, holder.address());
        assert_eq!(receipt.nonce, 0);
        let info = sandbox.nft_info(&collection, nft).await.unwrap();
        assert!(info.price.is_some());
    }
    let info = sandbox.nft_info(&collection, &nfts[1]).await.unwrap();
    assert_eq!(info.price, Some(70));
}
