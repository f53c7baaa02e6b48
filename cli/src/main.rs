// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # nftflow
//!
//! Entry point for the `nftflow` binary. Parses CLI arguments, initializes
//! logging and metrics, connects to the hosted API (or the in-memory
//! sandbox), and runs one command.
//!
//! Receipts and reports go to stdout as JSON; logs go to stderr.

mod cli;
mod config;
mod fixtures;
mod logging;
mod metrics;
mod records;
mod scenario;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::signal;
use tokio::sync::watch;

use nftflow_orchestrator::crypto::AccountKeypair;
use nftflow_orchestrator::operation::{Address, OperationRequest, SettlementHash};
use nftflow_orchestrator::service::{ApiClient, SandboxService};
use nftflow_orchestrator::workflow::{BatchEntry, BatchReport, WorkflowReceipt};
use nftflow_orchestrator::{BatchCoordinator, Orchestrator, Signer};

use cli::{Commands, NftflowCli, TxArgs};
use config::Config;
use metrics::WorkflowMetrics;
use records::RecordStore;
use scenario::{ScenarioAccounts, ScenarioRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NftflowCli::parse();
    logging::init_logging("nftflow=info,nftflow_orchestrator=info", cli.log_format);

    let metrics = WorkflowMetrics::new().context("failed to create metrics registry")?;
    let globals = cli_globals(&cli);
    let outcome = run(cli.command, &globals, &metrics).await;

    if cli.print_metrics {
        print!("{}", metrics.encode().context("failed to encode metrics")?);
    }
    outcome
}

/// The global flags, detached from the parsed subcommand.
struct Globals {
    config: Option<std::path::PathBuf>,
    api_key: Option<String>,
    sandbox: bool,
}

fn cli_globals(cli: &NftflowCli) -> Globals {
    Globals {
        config: cli.config.clone(),
        api_key: cli.api_key.clone(),
        sandbox: cli.sandbox,
    }
}

async fn run(command: Commands, globals: &Globals, metrics: &WorkflowMetrics) -> Result<()> {
    match command {
        Commands::Keygen(args) => return keygen(args),
        Commands::Version => {
            print_version();
            return Ok(());
        }
        _ => {}
    }

    let config = match &globals.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let ctx = Session::connect(config, globals, metrics)?;

    match command {
        Commands::Launch(args) => {
            let signer = ctx.signer(&args.tx)?;
            let mut params = fixtures::collection_params(&mut rand::thread_rng());
            if let Some(name) = args.name {
                params.symbol = fixtures::symbol_for(&name);
                params.master_nft.name = name.clone();
                params.collection_name = name;
            }
            if let Some(symbol) = args.symbol {
                params.symbol = symbol;
            }
            params.admin_contract = args.admin_contract;
            let request = OperationRequest::launch_collection(signer.address(), params);
            ctx.single(with_tx_options(request, &args.tx), &signer).await
        }
        Commands::Mint(args) => {
            let signer = ctx.signer(&args.tx)?;
            let owner = args
                .owner
                .map(Address::new)
                .unwrap_or_else(|| signer.address());
            let mut params = fixtures::mint_params(&mut rand::thread_rng(), &owner, args.soulbound);
            if let Some(name) = args.name {
                params.metadata.name = name.clone();
                params.name = name;
            }
            let request =
                OperationRequest::mint(signer.address(), Address::new(args.collection), params);
            ctx.single(with_tx_options(request, &args.tx), &signer).await
        }
        Commands::Approve(args) => {
            let signer = ctx.signer(&args.tx)?;
            let request = OperationRequest::approve(
                signer.address(),
                Address::new(args.collection),
                Address::new(args.nft),
                Address::new(args.to),
            );
            ctx.single(with_tx_options(request, &args.tx), &signer).await
        }
        Commands::Sell(args) => {
            let signer = ctx.signer(&args.tx)?;
            let request = OperationRequest::sell(
                signer.address(),
                Address::new(args.collection),
                Address::new(args.nft),
                args.price,
            );
            ctx.single(with_tx_options(request, &args.tx), &signer).await
        }
        Commands::Buy(args) => {
            let signer = ctx.signer(&args.tx)?;
            let request = OperationRequest::buy(
                signer.address(),
                Address::new(args.collection),
                Address::new(args.nft),
            );
            ctx.single(with_tx_options(request, &args.tx), &signer).await
        }
        Commands::Transfer(args) => {
            let signer = ctx.signer(&args.tx)?;
            let request = OperationRequest::transfer(
                signer.address(),
                Address::new(args.collection),
                Address::new(args.nft),
                Address::new(args.to),
            );
            ctx.single(with_tx_options(request, &args.tx), &signer).await
        }
        Commands::BatchMint(args) => {
            if args.count == 0 {
                bail!("--count must be at least 1");
            }
            let signer = ctx.config.keypair(&args.account)?;
            let owner = args
                .owner
                .map(Address::new)
                .unwrap_or_else(|| signer.address());
            let collection = Address::new(args.collection);
            let mut rng = rand::thread_rng();
            let requests = (0..args.count)
                .map(|_| {
                    let params = fixtures::mint_params(&mut rng, &owner, args.soulbound);
                    OperationRequest::mint(signer.address(), collection.clone(), params)
                })
                .collect();
            ctx.batch(requests, &[&signer as &dyn Signer]).await
        }
        Commands::BatchSell(args) => {
            let mut keys: HashMap<String, AccountKeypair> = HashMap::new();
            for listing in &args.listings {
                if !keys.contains_key(&listing.account) {
                    keys.insert(listing.account.clone(), ctx.config.keypair(&listing.account)?);
                }
            }
            let collection = Address::new(args.collection);
            let mut requests = Vec::with_capacity(args.listings.len());
            for listing in &args.listings {
                let seller = keys
                    .get(&listing.account)
                    .ok_or_else(|| anyhow!("no key for '{}'", listing.account))?;
                requests.push(OperationRequest::sell(
                    seller.address(),
                    collection.clone(),
                    Address::new(listing.nft.clone()),
                    listing.price,
                ));
            }
            let signers: Vec<&dyn Signer> = keys.values().map(|k| k as &dyn Signer).collect();
            ctx.batch(requests, &signers).await
        }
        Commands::Scenario(args) => {
            let accounts = ctx.scenario_accounts()?;
            let mut runner = ScenarioRunner::new(ctx.orchestrator.clone(), &accounts, ctx.metrics)
                .soulbound(args.soulbound)
                .with_records(ctx.records.clone());
            if let Some(seed) = args.seed {
                runner = runner.with_seed(seed);
            }
            let report = runner.run().await.context("scenario failed")?;
            print_json(&report)
        }
        Commands::Nonce(args) => {
            let address = ctx.address_of(&args.account);
            let nonce = ctx.orchestrator.ledger().nonce(&address).await?;
            print_json(&json!({ "address": address, "nonce": nonce }))
        }
        Commands::Status(args) => {
            let hash = SettlementHash::new(args.hash);
            let status = ctx.orchestrator.ledger().tx_status(&hash).await?;
            print_json(&json!({ "hash": hash, "status": status }))
        }
        Commands::Info(args) => {
            let info = ctx
                .orchestrator
                .ledger()
                .nft_info(&Address::new(args.collection), &Address::new(args.nft))
                .await?;
            print_json(&info)
        }
        Commands::Keygen(_) | Commands::Version => Ok(()),
    }
}

fn with_tx_options(mut request: OperationRequest, tx: &TxArgs) -> OperationRequest {
    if let Some(nonce) = tx.nonce {
        request = request.with_nonce(nonce);
    }
    if let Some(memo) = &tx.memo {
        request = request.with_memo(memo.clone());
    }
    request
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session<'m> {
    config: Config,
    orchestrator: Arc<Orchestrator>,
    metrics: &'m WorkflowMetrics,
    records: RecordStore,
    sandbox: bool,
}

impl<'m> Session<'m> {
    fn connect(config: Config, globals: &Globals, metrics: &'m WorkflowMetrics) -> Result<Self> {
        let orchestrator = if globals.sandbox {
            tracing::info!("using in-memory sandbox");
            Orchestrator::from_service(Arc::new(SandboxService::new()), config.orchestrator.clone())
        } else {
            let api_key = globals.api_key.as_deref().ok_or_else(|| {
                anyhow!("an API key is required (--api-key or NFTFLOW_API_KEY); or use --sandbox")
            })?;
            let mut builder = ApiClient::builder(api_key).chain(config.chain);
            if let Some(url) = &config.api_url {
                builder = builder.base_url(url.clone());
            }
            let client = builder.build().context("failed to create API client")?;
            tracing::info!(chain = %client.chain(), url = client.base_url(), "using hosted API");
            Orchestrator::from_service(Arc::new(client), config.orchestrator.clone())
        };

        Ok(Self {
            records: RecordStore::new(config.data_dir.clone()),
            orchestrator: Arc::new(orchestrator.with_shutdown(shutdown_channel())),
            metrics,
            sandbox: globals.sandbox,
            config,
        })
    }

    fn signer(&self, tx: &TxArgs) -> Result<AccountKeypair> {
        self.config.keypair(&tx.account)
    }

    /// A named account or hex key resolves to its address; anything else
    /// is taken as an address.
    fn address_of(&self, account: &str) -> Address {
        self.config
            .keypair(account)
            .map(|k| k.address())
            .unwrap_or_else(|_| Address::new(account))
    }

    /// Scenario roles come from same-named config accounts. The sandbox
    /// generates any that are missing.
    fn scenario_accounts(&self) -> Result<ScenarioAccounts> {
        let mut keys = Vec::with_capacity(ScenarioAccounts::ROLES.len());
        for role in ScenarioAccounts::ROLES {
            let key = if self.config.has_account(role) {
                self.config.keypair(role)?
            } else if self.sandbox {
                AccountKeypair::generate()
            } else {
                bail!("scenario needs an account named '{}' in the config", role);
            };
            keys.push(key);
        }
        let keys: [AccountKeypair; 5] = keys
            .try_into()
            .map_err(|_| anyhow!("wrong number of scenario accounts"))?;
        Ok(ScenarioAccounts::from_keys(keys))
    }

    async fn single(&self, request: OperationRequest, signer: &dyn Signer) -> Result<()> {
        let kind = request.kind();
        let result = self.orchestrator.execute(request, signer).await;
        self.metrics.record(kind, &result);
        let receipt = result.with_context(|| format!("{} failed", kind))?;

        for path in self.records.save(&receipt)? {
            tracing::info!(path = %path.display(), "record written");
        }
        print_json(&ReceiptView::from(&receipt))
    }

    async fn batch(&self, requests: Vec<OperationRequest>, signers: &[&dyn Signer]) -> Result<()> {
        let kinds: Vec<_> = requests.iter().map(OperationRequest::kind).collect();
        let coordinator = BatchCoordinator::new(self.orchestrator.clone());
        let report = coordinator.execute_multi_sender(requests, signers).await?;
        self.metrics.record_batch(&kinds, &report);

        for receipt in report.receipts() {
            for path in self.records.save(receipt)? {
                tracing::info!(path = %path.display(), "record written");
            }
        }
        print_json(&batch_view(&report))?;
        if !report.all_settled() {
            bail!("batch did not settle completely");
        }
        Ok(())
    }
}

/// Cancelled on Ctrl+C. The sender is kept alive otherwise, since dropping
/// it also cancels.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("interrupt received, abandoning pending waits");
                let _ = tx.send(true);
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for Ctrl+C"),
        }
        std::future::pending::<()>().await;
        drop(tx);
    });
    rx
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Printable receipt. Contract keys stay out of stdout; they only go to
/// record files.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptView<'a> {
    operation: String,
    sender: &'a Address,
    nonce: u64,
    hash: &'a SettlementHash,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    collection_address: Option<&'a Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nft_address: Option<&'a Address>,
    duration_ms: i64,
}

impl<'a> From<&'a WorkflowReceipt> for ReceiptView<'a> {
    fn from(r: &'a WorkflowReceipt) -> Self {
        Self {
            operation: r.kind.to_string(),
            sender: &r.sender,
            nonce: r.nonce,
            hash: &r.hash,
            status: r.status.to_string(),
            collection_address: r.collection_address(),
            nft_address: r.nft_address(),
            duration_ms: r.duration().num_milliseconds(),
        }
    }
}

fn batch_view(report: &BatchReport) -> Value {
    let entries: Vec<Value> = report
        .entries
        .iter()
        .map(|entry| match entry {
            BatchEntry::Settled(receipt) => {
                serde_json::to_value(ReceiptView::from(receipt)).unwrap_or(Value::Null)
            }
            BatchEntry::Failed(err) => json!({
                "error": err.to_string(),
                "stage": err.stage(),
                "transient": err.is_transient(),
            }),
            BatchEntry::NotSubmitted => json!({ "status": "notSubmitted" }),
        })
        .collect();
    json!({
        "summary": report.summary(),
        "baseNonces": report.base_nonces,
        "entries": entries,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Keys and version
// ---------------------------------------------------------------------------

fn keygen(args: cli::KeygenArgs) -> Result<()> {
    if args.out.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite",
            args.out.display()
        );
    }
    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let keypair = AccountKeypair::generate();
    let body = format!("{}\n", keypair.secret_key_hex());
    records::write_owner_only(&args.out, body.as_bytes())
        .with_context(|| format!("failed to write key to {}", args.out.display()))?;

    tracing::info!(address = %keypair.address(), path = %args.out.display(), "account key generated");
    print_json(&json!({
        "address": keypair.address(),
        "publicKey": keypair.public_key().to_hex(),
        "keyFile": args.out,
    }))
}

fn print_version() {
    println!("nftflow {}", env!("CARGO_PKG_VERSION"));
    println!("rustc   {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}
