//! # CLI Interface
//!
//! Defines the command-line argument structure for `nftflow` using
//! `clap` derive.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Drive NFT collection workflows against a hosted proving API.
///
/// Every operation is built remotely, signed locally, proved, and then
/// followed until the ledger reports it applied.
#[derive(Parser, Debug)]
#[command(name = "nftflow", version, propagate_version = true)]
pub struct NftflowCli {
    /// Path to the configuration file (TOML).
    #[arg(long, short = 'c', global = true, env = "NFTFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// API key for the hosted service.
    #[arg(long, global = true, env = "NFTFLOW_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Run against an in-memory sandbox instead of the hosted API.
    ///
    /// Sandbox state lives only as long as the process, so it is mostly
    /// useful with `scenario`.
    #[arg(long, global = true)]
    pub sandbox: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Print Prometheus metrics to stdout when the command finishes.
    #[arg(long, global = true)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a new account key and write it to a file.
    Keygen(KeygenArgs),
    /// Launch a new collection.
    Launch(LaunchArgs),
    /// Mint an NFT into a collection.
    Mint(MintArgs),
    /// Approve another address to transfer an NFT.
    Approve(ApproveArgs),
    /// List an NFT for sale.
    Sell(SellArgs),
    /// Buy a listed NFT.
    Buy(BuyArgs),
    /// Transfer an NFT to another address.
    Transfer(TransferArgs),
    /// Mint several NFTs in one pipelined batch.
    BatchMint(BatchMintArgs),
    /// List several NFTs, possibly from several holders, in one batch.
    BatchSell(BatchSellArgs),
    /// Run the full launch-to-batch-sell scenario.
    Scenario(ScenarioArgs),
    /// Print an account's ledger nonce.
    Nonce(NonceArgs),
    /// Print the status of a settlement hash.
    Status(StatusArgs),
    /// Print an NFT's owner, approval, price and capabilities.
    Info(InfoArgs),
    /// Print version information and exit.
    Version,
}

/// Options shared by every single-operation command.
#[derive(Args, Debug, Clone)]
pub struct TxArgs {
    /// Signing account: a name from the config file or a hex secret key.
    #[arg(long, short = 'a')]
    pub account: String,

    /// Use this nonce instead of the ledger's.
    #[arg(long)]
    pub nonce: Option<u64>,

    /// Transaction memo.
    #[arg(long)]
    pub memo: Option<String>,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Where to write the hex secret key.
    #[arg(long, short = 'o')]
    pub out: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub tx: TxArgs,

    /// Collection name; random when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Ticker symbol; derived from the name when omitted.
    #[arg(long)]
    pub symbol: Option<String>,

    /// Admin contract flavour.
    #[arg(long, default_value = "standard")]
    pub admin_contract: String,
}

#[derive(Args, Debug)]
pub struct MintArgs {
    #[command(flatten)]
    pub tx: TxArgs,

    #[arg(long)]
    pub collection: String,

    /// Owner of the new NFT; the signing account when omitted.
    #[arg(long)]
    pub owner: Option<String>,

    /// NFT name; random when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Mint without transfer or approve rights.
    #[arg(long)]
    pub soulbound: bool,
}

#[derive(Args, Debug)]
pub struct ApproveArgs {
    #[command(flatten)]
    pub tx: TxArgs,
    #[arg(long)]
    pub collection: String,
    #[arg(long)]
    pub nft: String,
    /// Address allowed to transfer the NFT.
    #[arg(long)]
    pub to: String,
}

#[derive(Args, Debug)]
pub struct SellArgs {
    #[command(flatten)]
    pub tx: TxArgs,
    #[arg(long)]
    pub collection: String,
    #[arg(long)]
    pub nft: String,
    #[arg(long)]
    pub price: u64,
}

#[derive(Args, Debug)]
pub struct BuyArgs {
    #[command(flatten)]
    pub tx: TxArgs,
    #[arg(long)]
    pub collection: String,
    #[arg(long)]
    pub nft: String,
}

#[derive(Args, Debug)]
pub struct TransferArgs {
    #[command(flatten)]
    pub tx: TxArgs,
    #[arg(long)]
    pub collection: String,
    #[arg(long)]
    pub nft: String,
    #[arg(long)]
    pub to: String,
}

#[derive(Args, Debug)]
pub struct BatchMintArgs {
    /// Signing account; must be the collection creator.
    #[arg(long, short = 'a')]
    pub account: String,

    #[arg(long)]
    pub collection: String,

    #[arg(long, default_value_t = 3)]
    pub count: usize,

    /// Owner of every minted NFT; the signing account when omitted.
    #[arg(long)]
    pub owner: Option<String>,

    #[arg(long)]
    pub soulbound: bool,
}

#[derive(Args, Debug)]
pub struct BatchSellArgs {
    #[arg(long)]
    pub collection: String,

    /// One listing per flag, as `ACCOUNT:NFT:PRICE`.
    #[arg(long = "listing", required = true, value_parser = parse_listing)]
    pub listings: Vec<Listing>,
}

/// One entry of `batch-sell`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub account: String,
    pub nft: String,
    pub price: u64,
}

fn parse_listing(s: &str) -> Result<Listing, String> {
    let mut parts = s.rsplitn(3, ':');
    let (Some(price), Some(nft), Some(account)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected ACCOUNT:NFT:PRICE, got '{}'", s));
    };
    let price = price
        .parse()
        .map_err(|_| format!("invalid price '{}'", price))?;
    if account.is_empty() || nft.is_empty() {
        return Err(format!("expected ACCOUNT:NFT:PRICE, got '{}'", s));
    }
    Ok(Listing {
        account: account.to_string(),
        nft: nft.to_string(),
        price,
    })
}

#[derive(Args, Debug)]
pub struct ScenarioArgs {
    /// Mint soulbound NFTs and expect every trading step to be refused.
    #[arg(long)]
    pub soulbound: bool,

    /// Seed for generated names and prices.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug)]
pub struct NonceArgs {
    /// Account name, hex secret key, or address.
    pub account: String,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Settlement hash.
    pub hash: String,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[arg(long)]
    pub collection: String,
    #[arg(long)]
    pub nft: String,
}
