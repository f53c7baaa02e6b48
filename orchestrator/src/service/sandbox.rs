//! In-memory stand-in for the hosted API.
//!
//! [`SandboxService`] implements all three collaborator traits against a
//! small ledger kept behind a mutex. It is faithful where the orchestrator
//! cares:
//!
//! - builds carry the sender's current ledger nonce unless one is given,
//!   and every build is unique (fresh id and timestamp in the body)
//! - the prover checks the Ed25519 signature against the sender address
//! - transactions are applied in submission order; a transaction whose
//!   nonce is not the sender's next nonce fails
//! - ownership, approval, price and capability rules are enforced at
//!   apply time, and violations surface as a `failed` status
//!
//! Progress is driven by probes rather than wall-clock time: a proof job
//! is ready after `proof_delay` pending probes, and a transaction is
//! included after `inclusion_delay` pending probes and applied on the probe
//! after that. [`FaultPlan`] injects the failures the orchestrator has to
//! handle.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{LedgerService, ProofPoll, ProverService, ServiceError, TransactionBuilderService};
use crate::config::DEFAULT_FEE;
use crate::crypto::{sha256_parts, AccountPublicKey, AccountSignature};
use crate::operation::{
    Address, JobHandle, NftCapabilities, NftInfo, Operation, OperationRequest, SettlementHash,
    SignedEnvelope, SignerPayload, TransactionMetadata, TxStatus, UnsignedTransaction,
};

// ---------------------------------------------------------------------------
// FaultPlan
// ---------------------------------------------------------------------------

/// Failures to inject. Everything defaults to "behave normally".
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Reject the n-th submission (0-based, counted across all senders).
    pub reject_submission_at: Option<usize>,
    /// Report this many hashes when a proof completes instead of one.
    pub proof_hash_count: Option<usize>,
    /// Proof jobs stay pending forever.
    pub proof_never_ready: bool,
    /// Proof jobs fail with this message.
    pub proof_failure: Option<String>,
    /// Transactions stay pending forever.
    pub never_included: bool,
    /// Report this terminal status instead of the real outcome.
    pub final_status: Option<TxStatus>,
}

// ---------------------------------------------------------------------------
// Ledger state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Collection {
    name: String,
    creator: Address,
}

#[derive(Debug, Clone)]
struct Nft {
    name: String,
    owner: Address,
    approved: Option<Address>,
    price: Option<u64>,
    capabilities: NftCapabilities,
}

/// A build that has not been submitted yet.
#[derive(Debug)]
struct PendingBuild {
    request: OperationRequest,
    digest: String,
    metadata: TransactionMetadata,
}

#[derive(Debug)]
struct Job {
    hash: SettlementHash,
    probes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Progress {
    Queued { probes: u32 },
    Included(TxStatus),
    Final(TxStatus),
}

#[derive(Debug)]
struct Tx {
    seq: u64,
    request: OperationRequest,
    nonce: u64,
    metadata: TransactionMetadata,
    progress: Progress,
}

#[derive(Debug, Default)]
struct Ledger {
    nonces: HashMap<Address, u64>,
    applied_nonces: HashMap<Address, Vec<u64>>,
    collections: HashMap<Address, Collection>,
    nfts: HashMap<(Address, Address), Nft>,
    builds: HashMap<String, PendingBuild>,
    jobs: HashMap<JobHandle, Job>,
    txs: HashMap<SettlementHash, Tx>,
    /// Submission order of queued transactions.
    queue: BTreeMap<u64, SettlementHash>,
    submissions: usize,
    next_seq: u64,
}

impl Ledger {
    fn next_nonce(&self, address: &Address) -> u64 {
        self.nonces.get(address).copied().unwrap_or(0)
    }

    fn nft(&self, collection: &Address, nft: &Address) -> Result<&Nft, ServiceError> {
        self.nfts
            .get(&(collection.clone(), nft.clone()))
            .ok_or_else(|| ServiceError::NotFound(format!("nft {} in {}", nft, collection)))
    }

    /// Apply every queued transaction up to and including `seq`, oldest
    /// first.
    fn apply_through(&mut self, seq: u64) {
        let due: Vec<(u64, SettlementHash)> = self
            .queue
            .range(..=seq)
            .map(|(s, h)| (*s, h.clone()))
            .collect();
        for (s, hash) in due {
            self.queue.remove(&s);
            let Some((request, nonce, metadata)) = self
                .txs
                .get(&hash)
                .map(|tx| (tx.request.clone(), tx.nonce, tx.metadata.clone()))
            else {
                continue;
            };
            let status = match self.apply(&request, nonce, &metadata, s) {
                Ok(()) => TxStatus::Applied,
                Err(reason) => {
                    warn!(%hash, %reason, "sandbox transaction failed");
                    TxStatus::Failed
                }
            };
            if let Some(tx) = self.txs.get_mut(&hash) {
                tx.progress = Progress::Included(status);
            }
        }
    }

    fn apply(
        &mut self,
        request: &OperationRequest,
        nonce: u64,
        metadata: &TransactionMetadata,
        seq: u64,
    ) -> Result<(), String> {
        let sender = request.sender().clone();
        let expected = self.next_nonce(&sender);
        if nonce != expected {
            return Err(format!("nonce mismatch: expected {}, got {}", expected, nonce));
        }
        // From here on the fee is paid and the nonce is consumed, even if
        // the operation itself fails.
        self.nonces.insert(sender.clone(), expected + 1);
        self.applied_nonces
            .entry(sender.clone())
            .or_default()
            .push(nonce);

        match request.operation() {
            Operation::LaunchCollection(params) => {
                let address = metadata
                    .collection_address
                    .clone()
                    .ok_or("launch without collection address")?;
                self.collections.insert(
                    address,
                    Collection {
                        name: params.collection_name.clone(),
                        creator: sender,
                    },
                );
                Ok(())
            }
            Operation::Mint { collection, params } => {
                let creator = &self
                    .collections
                    .get(collection)
                    .ok_or("collection not deployed")?
                    .creator;
                if *creator != sender {
                    return Err("only the collection creator may mint".into());
                }
                let address = metadata
                    .nft_address
                    .clone()
                    .ok_or("mint without nft address")?;
                self.nfts.insert(
                    (collection.clone(), address),
                    Nft {
                        name: params.name.clone(),
                        owner: params.owner.clone(),
                        approved: None,
                        price: None,
                        capabilities: params.permissions.capabilities(),
                    },
                );
                Ok(())
            }
            Operation::Approve {
                collection,
                nft,
                to,
            } => {
                let record = self.nft_mut(collection, nft)?;
                if !record.capabilities.approvable {
                    return Err("nft is not approvable".into());
                }
                if record.owner != sender {
                    return Err("only the owner may approve".into());
                }
                record.approved = Some(to.clone());
                Ok(())
            }
            Operation::Sell {
                collection,
                nft,
                price,
            } => {
                let offer = derived_address(&[b"offer", nft.as_str().as_bytes(), &seq.to_le_bytes()]);
                let record = self.nft_mut(collection, nft)?;
                if !record.capabilities.sellable {
                    return Err("nft is not sellable".into());
                }
                if record.owner != sender {
                    return Err("only the owner may sell".into());
                }
                record.price = Some(*price);
                record.approved = Some(offer);
                Ok(())
            }
            Operation::Buy {
                collection,
                nft,
                buyer,
            } => {
                let record = self.nft_mut(collection, nft)?;
                if !record.capabilities.sellable {
                    return Err("nft is not sellable".into());
                }
                if record.price.is_none() {
                    return Err("nft is not for sale".into());
                }
                if *buyer != sender {
                    return Err("buyer must sign the purchase".into());
                }
                record.owner = buyer.clone();
                record.approved = None;
                record.price = None;
                Ok(())
            }
            Operation::Transfer {
                collection,
                nft,
                from,
                to,
            } => {
                let record = self.nft_mut(collection, nft)?;
                if !record.capabilities.transferable {
                    return Err("nft is not transferable".into());
                }
                if record.owner != *from {
                    return Err("transfer source is not the owner".into());
                }
                let approved_sender = record.approved.as_ref() == Some(&sender);
                if record.owner != sender && !approved_sender {
                    return Err("sender may not transfer this nft".into());
                }
                record.owner = to.clone();
                record.approved = None;
                record.price = None;
                Ok(())
            }
        }
    }

    fn nft_mut(&mut self, collection: &Address, nft: &Address) -> Result<&mut Nft, String> {
        self.nfts
            .get_mut(&(collection.clone(), nft.clone()))
            .ok_or_else(|| format!("nft {} not found", nft))
    }
}

fn derived_address(parts: &[&[u8]]) -> Address {
    Address::new(bs58::encode(sha256_parts(parts)).into_string())
}

fn bad_request(message: impl Into<String>) -> ServiceError {
    ServiceError::rejected(400, message)
}

// ---------------------------------------------------------------------------
// SandboxService
// ---------------------------------------------------------------------------

/// In-memory NFT ledger, builder and prover.
#[derive(Debug)]
pub struct SandboxService {
    ledger: Mutex<Ledger>,
    faults: Mutex<FaultPlan>,
    proof_delay: u32,
    inclusion_delay: u32,
}

impl Default for SandboxService {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxService {
    /// One pending probe before a proof is ready, one before inclusion.
    pub fn new() -> Self {
        Self::with_delays(1, 1)
    }

    /// Number of pending probes before a proof is ready and before a
    /// transaction is included.
    pub fn with_delays(proof_delay: u32, inclusion_delay: u32) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            faults: Mutex::new(FaultPlan::default()),
            proof_delay,
            inclusion_delay,
        }
    }

    pub fn set_faults(&self, plan: FaultPlan) {
        *self.faults.lock() = plan;
    }

    /// Start `address` at a non-zero nonce, as if it had history.
    pub fn seed_nonce(&self, address: &Address, nonce: u64) {
        self.ledger.lock().nonces.insert(address.clone(), nonce);
    }

    /// Total submissions accepted or rejected so far.
    pub fn submission_count(&self) -> usize {
        self.ledger.lock().submissions
    }

    /// Nonces applied for `address`, in application order.
    pub fn applied_nonces(&self, address: &Address) -> Vec<u64> {
        self.ledger
            .lock()
            .applied_nonces
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    pub fn collection_exists(&self, address: &Address) -> bool {
        self.ledger.lock().collections.contains_key(address)
    }

    pub fn collection_name(&self, address: &Address) -> Option<String> {
        self.ledger
            .lock()
            .collections
            .get(address)
            .map(|c| c.name.clone())
    }

    fn build_locked(
        &self,
        ledger: &mut Ledger,
        request: &OperationRequest,
    ) -> Result<UnsignedTransaction, ServiceError> {
        let sender = request.sender();
        if !sender.is_well_formed() {
            return Err(bad_request(format!("malformed sender address '{}'", sender)));
        }
        for target in [request.operation().collection(), request.operation().nft()]
            .into_iter()
            .flatten()
        {
            if !target.is_well_formed() {
                return Err(bad_request(format!("malformed address '{}'", target)));
            }
        }

        let build_id = Uuid::new_v4().to_string();
        let mut metadata = TransactionMetadata::default();
        match request.operation() {
            Operation::LaunchCollection(params) => {
                let collection = derived_address(&[b"collection", build_id.as_bytes()]);
                let admin = derived_address(&[b"admin", build_id.as_bytes()]);
                metadata.collection_address = Some(collection);
                metadata.admin_contract_address = Some(admin);
                metadata.collection_contract_private_key =
                    Some(hex::encode(sha256_parts(&[b"collection-key", build_id.as_bytes()])));
                metadata.admin_contract_private_key =
                    Some(hex::encode(sha256_parts(&[b"admin-key", build_id.as_bytes()])));
                metadata.collection_name = Some(params.collection_name.clone());
                metadata.nft_name = Some(params.master_nft.name.clone());
                metadata.metadata_root = Some(metadata_root(&params.master_nft)?);
            }
            Operation::Mint { collection, params } => {
                let record = ledger.collections.get(collection).ok_or_else(|| {
                    ServiceError::rejected(422, format!("collection {} is not deployed", collection))
                })?;
                if record.creator != *sender {
                    return Err(ServiceError::rejected(
                        403,
                        "only the collection creator may mint",
                    ));
                }
                metadata.collection_address = Some(collection.clone());
                metadata.collection_name = Some(record.name.clone());
                metadata.nft_address = Some(derived_address(&[b"nft", build_id.as_bytes()]));
                metadata.nft_contract_private_key =
                    Some(hex::encode(sha256_parts(&[b"nft-key", build_id.as_bytes()])));
                metadata.nft_name = Some(params.name.clone());
                metadata.metadata_root = Some(metadata_root(&params.metadata)?);
                let private: Vec<_> = params
                    .metadata
                    .traits
                    .iter()
                    .filter(|t| t.is_private)
                    .collect();
                if !private.is_empty() {
                    metadata.private_metadata = Some(json!({ "traits": private }));
                }
            }
            Operation::Approve { collection, nft, .. }
            | Operation::Sell { collection, nft, .. }
            | Operation::Buy { collection, nft, .. }
            | Operation::Transfer { collection, nft, .. } => {
                ledger.nft(collection, nft)?;
                metadata.collection_address = Some(collection.clone());
                metadata.nft_address = Some(nft.clone());
            }
        }
        metadata.storage = metadata
            .metadata_root
            .as_ref()
            .map(|root| format!("sandbox:{}", &root[..16.min(root.len())]));

        let nonce = request
            .nonce()
            .unwrap_or_else(|| ledger.next_nonce(sender));
        let body = json!({
            "buildId": build_id,
            "txType": request.kind().tx_type(),
            "createdAt": chrono::Utc::now().to_rfc3339(),
            "request": request,
        });
        let signer_payload = SignerPayload {
            sender: sender.clone(),
            nonce,
            fee: DEFAULT_FEE,
            memo: request.memo().unwrap_or_default().to_string(),
            transaction: body.to_string(),
        };

        ledger.builds.insert(
            build_id.clone(),
            PendingBuild {
                request: request.clone(),
                digest: signer_payload.digest(),
                metadata: metadata.clone(),
            },
        );
        debug!(build = %build_id, kind = %request.kind(), nonce, "sandbox build");

        Ok(UnsignedTransaction {
            raw: json!({ "buildId": build_id, "body": body }),
            signer_payload,
            metadata,
        })
    }
}

fn metadata_root(metadata: &impl serde::Serialize) -> Result<String, ServiceError> {
    let bytes = serde_json::to_vec(metadata)?;
    Ok(hex::encode(sha256_parts(&[b"metadata", &bytes])))
}

#[async_trait]
impl TransactionBuilderService for SandboxService {
    async fn build(&self, request: &OperationRequest) -> Result<UnsignedTransaction, ServiceError> {
        let mut ledger = self.ledger.lock();
        self.build_locked(&mut ledger, request)
    }
}

#[async_trait]
impl ProverService for SandboxService {
    async fn submit_for_proof(&self, envelope: SignedEnvelope) -> Result<JobHandle, ServiceError> {
        let faults = self.faults.lock().clone();
        let mut ledger = self.ledger.lock();
        let index = ledger.submissions;
        ledger.submissions += 1;

        if faults.reject_submission_at == Some(index) {
            return Err(ServiceError::rejected(429, "prover is busy"));
        }

        let build_id = envelope.transaction.raw["buildId"]
            .as_str()
            .ok_or_else(|| bad_request("transaction was not built by this service"))?
            .to_string();
        let payload = &envelope.transaction.signer_payload;
        let digest = payload.digest();
        match ledger.builds.get(&build_id) {
            None => {
                return Err(ServiceError::rejected(409, "transaction already submitted"));
            }
            Some(build) if build.digest != digest => {
                return Err(bad_request("signer payload does not match the build"));
            }
            Some(_) => {}
        }

        let public_key = AccountPublicKey::from_address(&payload.sender)
            .map_err(|e| bad_request(e.to_string()))?;
        let signature = AccountSignature::from_hex(envelope.signature.as_str())
            .map_err(|_| bad_request("signature is not hex"))?;
        if !public_key.verify(&payload.signable_bytes(), &signature) {
            return Err(bad_request("invalid signature"));
        }

        let Some(build) = ledger.builds.remove(&build_id) else {
            return Err(ServiceError::rejected(409, "transaction already submitted"));
        };
        let seq = ledger.next_seq;
        ledger.next_seq += 1;
        let hash = SettlementHash::new(
            bs58::encode(sha256_parts(&[digest.as_bytes(), &seq.to_le_bytes()])).into_string(),
        );
        let job = JobHandle::new(Uuid::new_v4().to_string());

        ledger.txs.insert(
            hash.clone(),
            Tx {
                seq,
                request: build.request,
                nonce: payload.nonce,
                metadata: build.metadata,
                progress: Progress::Queued { probes: 0 },
            },
        );
        ledger.queue.insert(seq, hash.clone());
        ledger.jobs.insert(
            job.clone(),
            Job {
                hash: hash.clone(),
                probes: 0,
            },
        );
        debug!(%job, %hash, seq, "sandbox accepted submission");
        Ok(job)
    }

    async fn proof_status(&self, job: &JobHandle) -> Result<ProofPoll, ServiceError> {
        let faults = self.faults.lock().clone();
        let mut ledger = self.ledger.lock();
        let record = ledger
            .jobs
            .get_mut(job)
            .ok_or_else(|| ServiceError::NotFound(format!("job {}", job)))?;

        if let Some(message) = faults.proof_failure {
            return Ok(ProofPoll::Failed(message));
        }
        if faults.proof_never_ready || record.probes < self.proof_delay {
            record.probes += 1;
            return Ok(ProofPoll::Pending);
        }

        let count = faults.proof_hash_count.unwrap_or(1);
        let hashes = (0..count)
            .map(|i| {
                if i == 0 {
                    record.hash.clone()
                } else {
                    SettlementHash::new(format!("{}-{}", record.hash, i))
                }
            })
            .collect();
        Ok(ProofPoll::Ready(hashes))
    }
}

#[async_trait]
impl LedgerService for SandboxService {
    async fn tx_status(&self, hash: &SettlementHash) -> Result<TxStatus, ServiceError> {
        let faults = self.faults.lock().clone();
        let mut ledger = self.ledger.lock();
        let tx = ledger
            .txs
            .get_mut(hash)
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {}", hash)))?;

        let seq = tx.seq;
        let progress = tx.progress.clone();
        let status = match progress {
            Progress::Queued { probes } => {
                if faults.never_included || probes < self.inclusion_delay {
                    tx.progress = Progress::Queued { probes: probes + 1 };
                    return Ok(TxStatus::Pending);
                }
                ledger.apply_through(seq);
                TxStatus::Included
            }
            Progress::Included(outcome) => {
                tx.progress = Progress::Final(outcome.clone());
                faults.final_status.unwrap_or(outcome)
            }
            Progress::Final(outcome) => faults.final_status.unwrap_or(outcome),
        };
        Ok(status)
    }

    async fn nonce(&self, address: &Address) -> Result<u64, ServiceError> {
        Ok(self.ledger.lock().next_nonce(address))
    }

    async fn nft_info(&self, collection: &Address, nft: &Address) -> Result<NftInfo, ServiceError> {
        let ledger = self.ledger.lock();
        let record = ledger.nft(collection, nft)?;
        Ok(NftInfo {
            collection: collection.clone(),
            address: nft.clone(),
            name: record.name.clone(),
            owner: record.owner.clone(),
            approved: record.approved.clone(),
            price: record.price,
            capabilities: record.capabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AccountKeypair;
    use crate::operation::{LaunchCollectionParams, NftMetadata};
    use crate::signer::Signer;

    fn launch(sender: &AccountKeypair) -> OperationRequest {
        OperationRequest::launch_collection(
            sender.address(),
            LaunchCollectionParams {
                collection_name: "Tide".into(),
                symbol: "NFT".into(),
                admin_contract: "standard".into(),
                master_nft: NftMetadata::default(),
            },
        )
    }

    #[tokio::test]
    async fn builds_are_unique_and_use_ledger_nonce() {
        let sandbox = SandboxService::new();
        let kp = AccountKeypair::generate();
        sandbox.seed_nonce(&kp.address(), 4);

        let a = sandbox.build(&launch(&kp)).await.unwrap();
        let b = sandbox.build(&launch(&kp)).await.unwrap();
        assert_ne!(a.signer_payload, b.signer_payload);
        assert_eq!(a.nonce(), 4);
        assert_ne!(a.metadata.collection_address, b.metadata.collection_address);
    }

    #[tokio::test]
    async fn malformed_sender_is_rejected_at_build() {
        let sandbox = SandboxService::new();
        let req = OperationRequest::launch_collection(
            Address::new("not-base58-0OIl"),
            LaunchCollectionParams {
                collection_name: "x".into(),
                symbol: "X".into(),
                admin_contract: "standard".into(),
                master_nft: NftMetadata::default(),
            },
        );
        let err = sandbox.build(&req).await.unwrap_err();
        assert!(matches!(err, ServiceError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let sandbox = SandboxService::new();
        let kp = AccountKeypair::generate();
        let other = AccountKeypair::generate();

        let tx = sandbox.build(&launch(&kp)).await.unwrap();
        let forged = other.sign_bytes(&tx.signer_payload.signable_bytes());
        let envelope = tx.into_signed(crate::operation::TxSignature::new(forged.to_hex()));
        let err = sandbox.submit_for_proof(envelope).await.unwrap_err();
        assert_eq!(err, ServiceError::rejected(400, "invalid signature"));
    }

    #[tokio::test]
    async fn launch_progresses_through_probes() {
        let sandbox = SandboxService::new();
        let kp = AccountKeypair::generate();

        let tx = sandbox.build(&launch(&kp)).await.unwrap();
        let collection = tx.metadata.collection_address.clone().unwrap();
        let sig = Signer::sign(&kp, &tx.signer_payload).unwrap();
        let job = sandbox.submit_for_proof(tx.into_signed(sig)).await.unwrap();

        assert_eq!(sandbox.proof_status(&job).await.unwrap(), ProofPoll::Pending);
        let hash = match sandbox.proof_status(&job).await.unwrap() {
            ProofPoll::Ready(mut hashes) => hashes.remove(0),
            other => panic!("expected ready, got {:?}", other),
        };

        assert_eq!(sandbox.tx_status(&hash).await.unwrap(), TxStatus::Pending);
        assert!(!sandbox.collection_exists(&collection));
        assert_eq!(sandbox.tx_status(&hash).await.unwrap(), TxStatus::Included);
        assert!(sandbox.collection_exists(&collection));
        assert_eq!(sandbox.tx_status(&hash).await.unwrap(), TxStatus::Applied);
        assert_eq!(sandbox.applied_nonces(&kp.address()), vec![0]);
        assert_eq!(sandbox.nonce(&kp.address()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn resubmitting_a_build_is_rejected() {
        let sandbox = SandboxService::with_delays(0, 0);
        let kp = AccountKeypair::generate();
        let tx = sandbox.build(&launch(&kp)).await.unwrap();
        let raw = tx.raw.clone();
        let payload = tx.signer_payload.clone();
        let sig = Signer::sign(&kp, &payload).unwrap();
        sandbox.submit_for_proof(tx.into_signed(sig.clone())).await.unwrap();

        let replay = UnsignedTransaction {
            raw,
            signer_payload: payload,
            metadata: TransactionMetadata::default(),
        };
        let err = sandbox
            .submit_for_proof(replay.into_signed(sig))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn unknown_nft_is_not_found() {
        let sandbox = SandboxService::new();
        let a = derived_address(&[b"a"]);
        let b = derived_address(&[b"b"]);
        assert!(matches!(
            sandbox.nft_info(&a, &b).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
