//! Record files written after a launch or mint.
//!
//! The builder derives contract keys that are needed later to administer
//! a collection or NFT, and private metadata that is never published.
//! Both are handed back exactly once, so they go straight to disk:
//!
//! - `collection-<collection>-keys.json`
//! - `collection-<collection>-metadata.json` (private metadata, if any)
//! - `nft-<collection>-<nft>-keys.json`
//! - `nft-<collection>-<nft>.json` (private metadata, if any)

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use nftflow_orchestrator::operation::OperationKind;
use nftflow_orchestrator::WorkflowReceipt;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectionKeys<'a> {
    collection_name: Option<&'a str>,
    collection_address: &'a str,
    #[serde(rename = "masterNFT")]
    master_nft: Option<&'a str>,
    admin_contract_address: Option<&'a str>,
    collection_contract_private_key: Option<&'a str>,
    admin_contract_private_key: Option<&'a str>,
    storage: Option<&'a str>,
    metadata_root: Option<&'a str>,
    hash: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NftKeys<'a> {
    nft_name: Option<&'a str>,
    collection_name: Option<&'a str>,
    collection_address: &'a str,
    nft_address: &'a str,
    nft_contract_private_key: Option<&'a str>,
    storage: Option<&'a str>,
    metadata_root: Option<&'a str>,
    hash: &'a str,
}

/// Writes record files into one directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write whatever records `receipt` calls for. Returns the paths
    /// written; operations other than launch and mint write nothing.
    pub fn save(&self, receipt: &WorkflowReceipt) -> Result<Vec<PathBuf>> {
        match receipt.kind {
            OperationKind::LaunchCollection => self.save_collection(receipt),
            OperationKind::Mint => self.save_nft(receipt),
            _ => Ok(Vec::new()),
        }
    }

    fn save_collection(&self, receipt: &WorkflowReceipt) -> Result<Vec<PathBuf>> {
        let meta = &receipt.metadata;
        let Some(collection) = meta.collection_address.as_ref() else {
            return Ok(Vec::new());
        };
        let keys = CollectionKeys {
            collection_name: meta.collection_name.as_deref(),
            collection_address: collection.as_str(),
            master_nft: meta.nft_name.as_deref(),
            admin_contract_address: meta.admin_contract_address.as_ref().map(|a| a.as_str()),
            collection_contract_private_key: meta.collection_contract_private_key.as_deref(),
            admin_contract_private_key: meta.admin_contract_private_key.as_deref(),
            storage: meta.storage.as_deref(),
            metadata_root: meta.metadata_root.as_deref(),
            hash: receipt.hash.as_str(),
        };

        let mut written =
            vec![self.write_json(&format!("collection-{}-keys.json", collection), &keys)?];
        if let Some(private) = &meta.private_metadata {
            let name = format!("collection-{}-metadata.json", collection);
            written.push(self.write_private(&name, private)?);
        }
        Ok(written)
    }

    fn save_nft(&self, receipt: &WorkflowReceipt) -> Result<Vec<PathBuf>> {
        let meta = &receipt.metadata;
        let (Some(collection), Some(nft)) = (&meta.collection_address, &meta.nft_address) else {
            return Ok(Vec::new());
        };
        let keys = NftKeys {
            nft_name: meta.nft_name.as_deref(),
            collection_name: meta.collection_name.as_deref(),
            collection_address: collection.as_str(),
            nft_address: nft.as_str(),
            nft_contract_private_key: meta.nft_contract_private_key.as_deref(),
            storage: meta.storage.as_deref(),
            metadata_root: meta.metadata_root.as_deref(),
            hash: receipt.hash.as_str(),
        };

        let mut written =
            vec![self.write_json(&format!("nft-{}-{}-keys.json", collection, nft), &keys)?];
        if let Some(private) = &meta.private_metadata {
            let name = format!("nft-{}-{}.json", collection, nft);
            written.push(self.write_private(&name, private)?);
        }
        Ok(written)
    }

    fn write_private(&self, name: &str, value: &Value) -> Result<PathBuf> {
        // The API sometimes returns private metadata pre-serialized.
        match value {
            Value::String(text) => self.write_raw(name, text.as_bytes()),
            other => self.write_json(name, other),
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let body = serde_json::to_vec_pretty(value).context("failed to encode record")?;
        self.write_raw(name, &body)
    }

    fn write_raw(&self, name: &str, body: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create data directory {}", self.dir.display()))?;
        let path = self.dir.join(name);
        write_owner_only(&path, body)?;
        tracing::debug!(path = %path.display(), "record written");
        Ok(path)
    }
}

/// Write `body` to a file that is owner-only (0600 on Unix) from the moment
/// it exists. An existing file is truncated and tightened before any bytes
/// land in it.
pub fn write_owner_only(path: &Path, body: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
    }

    file.write_all(body)
        .and_then(|_| file.sync_all())
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nftflow_orchestrator::operation::{
        Address, JobHandle, SettlementHash, TransactionMetadata, TxStatus,
    };
    use serde_json::json;

    fn receipt(kind: OperationKind, metadata: TransactionMetadata) -> WorkflowReceipt {
        WorkflowReceipt {
            id: uuid::Uuid::nil(),
            kind,
            sender: Address::new("B62qSender"),
            nonce: 0,
            job: JobHandle::new("job"),
            hash: SettlementHash::new("5Jhash"),
            status: TxStatus::Applied,
            metadata,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            history: vec![],
        }
    }

    #[test]
    fn launch_writes_collection_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let meta = TransactionMetadata {
            collection_address: Some(Address::new("B62qCol")),
            admin_contract_address: Some(Address::new("B62qAdmin")),
            collection_contract_private_key: Some("EKcol".into()),
            collection_name: Some("Tide".into()),
            ..TransactionMetadata::default()
        };

        let written = store.save(&receipt(OperationKind::LaunchCollection, meta)).unwrap();
        assert_eq!(written, vec![dir.path().join("collection-B62qCol-keys.json")]);

        let body: Value = serde_json::from_slice(&std::fs::read(&written[0]).unwrap()).unwrap();
        assert_eq!(body["collectionName"], "Tide");
        assert_eq!(body["collectionContractPrivateKey"], "EKcol");
        assert_eq!(body["adminContractAddress"], "B62qAdmin");
    }

    #[test]
    fn mint_writes_keys_and_private_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("nested"));
        let meta = TransactionMetadata {
            collection_address: Some(Address::new("B62qCol")),
            nft_address: Some(Address::new("B62qNft")),
            nft_contract_private_key: Some("EKnft".into()),
            private_metadata: Some(json!({ "traits": [{ "key": "secret" }] })),
            ..TransactionMetadata::default()
        };

        let written = store.save(&receipt(OperationKind::Mint, meta)).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[0].ends_with("nft-B62qCol-B62qNft-keys.json"));
        assert!(written[1].ends_with("nft-B62qCol-B62qNft.json"));

        let private: Value = serde_json::from_slice(&std::fs::read(&written[1]).unwrap()).unwrap();
        assert_eq!(private["traits"][0]["key"], "secret");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&written[0]).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn overwriting_a_world_readable_file_tightens_it() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.hex");
        std::fs::write(&path, "old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_owner_only(&path, b"new").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn new_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.json");

        write_owner_only(&path, b"{}").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn other_operations_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let written = store
            .save(&receipt(OperationKind::Transfer, TransactionMetadata::default()))
            .unwrap();
        assert!(written.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
