//! # CLI Configuration
//!
//! TOML file naming the API endpoint, chain, data directory and the
//! accounts the CLI may sign with:
//!
//! ```toml
//! chain = "devnet"
//! data_dir = "./data"
//!
//! [[accounts]]
//! name = "creator"
//! secret_key = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60"
//!
//! [orchestrator]
//! settle_delay_ms = 30000
//! ```
//!
//! The API key is deliberately not a config field; it comes from
//! `--api-key` or `NFTFLOW_API_KEY`.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use nftflow_orchestrator::crypto::AccountKeypair;
use nftflow_orchestrator::service::Chain;
use nftflow_orchestrator::OrchestratorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Overrides the chain's default API base URL.
    pub api_url: Option<String>,
    pub chain: Chain,
    /// Where record files (contract keys, private metadata) are written.
    pub data_dir: PathBuf,
    pub accounts: Vec<AccountEntry>,
    pub orchestrator: OrchestratorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: None,
            chain: Chain::default(),
            data_dir: PathBuf::from("./data"),
            accounts: Vec::new(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub name: String,
    /// Hex-encoded Ed25519 secret key.
    pub secret_key: String,
}

impl std::fmt::Debug for AccountEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountEntry")
            .field("name", &self.name)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.orchestrator.validate()?;
        for (i, account) in self.accounts.iter().enumerate() {
            if self.accounts[..i].iter().any(|a| a.name == account.name) {
                bail!("account '{}' is defined twice", account.name);
            }
        }
        Ok(())
    }

    /// Resolve `name_or_key` to a keypair: a named account first, then a
    /// raw hex secret.
    pub fn keypair(&self, name_or_key: &str) -> Result<AccountKeypair> {
        if let Some(entry) = self.accounts.iter().find(|a| a.name == name_or_key) {
            return AccountKeypair::from_hex(&entry.secret_key)
                .with_context(|| format!("account '{}' has a malformed secret key", entry.name));
        }
        AccountKeypair::from_hex(name_or_key)
            .map_err(|_| anyhow!("no account named '{}' in the config", name_or_key))
    }

    pub fn has_account(&self, name: &str) -> bool {
        self.accounts.iter().any(|a| a.name == name)
    }
}
