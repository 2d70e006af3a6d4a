//! Human-readable JSON checkpoint ledger shared by every network.
//!
//! Layout: one pretty-printed object keyed by network name. Operators may
//! edit it between runs to force a re-scan from an earlier block.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chain_watch_domain::model::{format_utc, Checkpoint, UTC_DISPLAY_FORMAT};
use chain_watch_domain::storage::{CheckpointStore, StorageError, StorageResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerEntry {
    network_name: String,
    chain_id: u64,
    last_processed_block: u64,
    last_updated: String,
}

type Ledger = BTreeMap<String, LedgerEntry>;

/// File-backed [`CheckpointStore`]. Commits go through a single writer lock
/// and replace the file atomically (temp file + rename), so concurrent
/// scanners never lose each other's entries and readers always see a whole
/// ledger.
#[derive(Debug)]
pub struct JsonLedgerStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoints.json".to_string());
        self.path.with_file_name(format!(".{file_name}.tmp"))
    }

    async fn read_ledger(&self) -> StorageResult<Ledger> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Ledger::new()),
            Err(err) => return Err(StorageError::io(err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Ledger::new());
        }
        serde_json::from_slice(&bytes).map_err(|err| StorageError::Corrupt {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        })
    }

    async fn write_ledger(&self, ledger: &Ledger) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(StorageError::io)?;
        }

        let data = serde_json::to_vec_pretty(ledger).map_err(StorageError::io)?;
        let tmp_path = self.temp_path();
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(StorageError::io)?;
        file.write_all(&data).await.map_err(StorageError::io)?;
        file.sync_all().await.map_err(StorageError::io)?;
        drop(file);

        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(StorageError::io)?;
        Ok(())
    }
}

fn parse_updated_at(network: &str, raw: &str) -> DateTime<Utc> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, UTC_DISPLAY_FORMAT) {
        return naive.and_utc();
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    warn!(network, last_updated = raw, "unrecognized ledger timestamp");
    DateTime::<Utc>::default()
}

fn to_checkpoint(network_name: &str, entry: &LedgerEntry) -> Checkpoint {
    Checkpoint {
        network_name: network_name.to_string(),
        chain_id: entry.chain_id,
        last_processed_block: entry.last_processed_block,
        updated_at: parse_updated_at(network_name, &entry.last_updated),
    }
}

#[async_trait]
impl CheckpointStore for JsonLedgerStore {
    async fn load(&self, network_name: &str) -> StorageResult<Option<Checkpoint>> {
        let ledger = self.read_ledger().await?;
        Ok(ledger
            .get(network_name)
            .map(|entry| to_checkpoint(network_name, entry)))
    }

    async fn commit(&self, network_name: &str, chain_id: u64, block: u64) -> StorageResult<()> {
        let _writer = self.writer.lock().await;
        let mut ledger = self.read_ledger().await?;

        if let Some(existing) = ledger.get(network_name) {
            if existing.last_processed_block > block {
                debug!(
                    network = network_name,
                    stored = existing.last_processed_block,
                    requested = block,
                    "ignoring checkpoint below stored block"
                );
                return Ok(());
            }
        }

        ledger.insert(
            network_name.to_string(),
            LedgerEntry {
                network_name: network_name.to_string(),
                chain_id,
                last_processed_block: block,
                last_updated: format_utc(&Utc::now()),
            },
        );
        self.write_ledger(&ledger).await
    }

    async fn load_all(&self) -> StorageResult<BTreeMap<String, Checkpoint>> {
        let ledger = self.read_ledger().await?;
        Ok(ledger
            .iter()
            .map(|(name, entry)| (name.clone(), to_checkpoint(name, entry)))
            .collect())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
