//! HTTP client for the hosted NFT API.
//!
//! One [`ApiClient`] implements all three collaborator traits. Every call is
//! a JSON `POST` to `{base_url}/{path}` with the API key in `x-api-key`.
//! HTTP failures are mapped onto [`ServiceError`]:
//!
//! - `404` becomes `NotFound`
//! - other `4xx` become `Rejected`
//! - `5xx` and connection failures become `Transport`

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::wire::{self, NftInfoResponse, NonceResponse, ProofsResponse, ProveRequest};
use super::{LedgerService, ProofPoll, ProverService, ServiceError, TransactionBuilderService};
use crate::operation::{
    Address, JobHandle, NftInfo, OperationRequest, SettlementHash, SignedEnvelope, TxStatus,
    UnsignedTransaction,
};

const API_KEY_HEADER: &str = "x-api-key";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Target network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    #[default]
    Devnet,
    Mainnet,
    Zeko,
}

impl Chain {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Devnet => "https://devnet.minatokens.com/api/v1",
            Self::Mainnet => "https://minatokens.com/api/v1",
            Self::Zeko => "https://zekotokens.com/api/v1",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Devnet => "devnet",
            Self::Mainnet => "mainnet",
            Self::Zeko => "zeko",
        };
        f.write_str(s)
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "devnet" => Ok(Self::Devnet),
            "mainnet" => Ok(Self::Mainnet),
            "zeko" => Ok(Self::Zeko),
            other => Err(format!("unknown chain '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    chain: Chain,
    api_key: String,
    timeout: Duration,
}

impl ApiClientBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: None,
            chain: Chain::default(),
            api_key: api_key.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    /// Override the chain's default base URL (mock servers, self-hosting).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ApiClient, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        let base_url = self
            .base_url
            .unwrap_or_else(|| self.chain.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(ApiClient {
            http,
            base_url,
            chain: self.chain,
            api_key: self.api_key,
        })
    }
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    chain: Chain,
    api_key: String,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn builder(api_key: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "POST");

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<R>().await?);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| status.to_string());
        Err(map_status(status, message))
    }
}

fn map_status(status: StatusCode, message: String) -> ServiceError {
    if status == StatusCode::NOT_FOUND {
        ServiceError::NotFound(message)
    } else if status.is_client_error() {
        ServiceError::rejected(status.as_u16(), message)
    } else {
        ServiceError::Transport(format!("{}: {}", status, message))
    }
}

#[async_trait]
impl TransactionBuilderService for ApiClient {
    async fn build(&self, request: &OperationRequest) -> Result<UnsignedTransaction, ServiceError> {
        let body = wire::build_body(request);
        let raw: Value = self.post(wire::build_path(request.kind()), &body).await?;
        wire::decode_build(raw)
    }
}

#[async_trait]
impl ProverService for ApiClient {
    async fn submit_for_proof(&self, envelope: SignedEnvelope) -> Result<JobHandle, ServiceError> {
        let body = ProveRequest::from_envelope(&envelope);
        let response: wire::ProveResponse = self.post(wire::PROVE_PATH, &body).await?;
        Ok(JobHandle::new(response.job_id))
    }

    async fn proof_status(&self, job: &JobHandle) -> Result<ProofPoll, ServiceError> {
        let response: ProofsResponse = self
            .post(wire::PROOFS_PATH, &json!({ "jobId": job }))
            .await?;
        Ok(response.into_poll())
    }
}

#[async_trait]
impl LedgerService for ApiClient {
    async fn tx_status(&self, hash: &SettlementHash) -> Result<TxStatus, ServiceError> {
        let response: wire::StatusResponse = self
            .post(wire::STATUS_PATH, &json!({ "hash": hash }))
            .await?;
        Ok(response.status)
    }

    async fn nonce(&self, address: &Address) -> Result<u64, ServiceError> {
        let response: NonceResponse = self
            .post(wire::NONCE_PATH, &json!({ "address": address }))
            .await?;
        Ok(response.nonce)
    }

    async fn nft_info(&self, collection: &Address, nft: &Address) -> Result<NftInfo, ServiceError> {
        let response: NftInfoResponse = self
            .post(
                wire::NFT_INFO_PATH,
                &json!({ "collectionAddress": collection, "nftAddress": nft }),
            )
            .await?;
        Ok(response.into())
    }
}
