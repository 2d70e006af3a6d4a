use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Checkpoint;

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("ledger io error: {0}")]
    Io(String),
    #[error("ledger `{path}` is unreadable: {reason}")]
    Corrupt { path: String, reason: String },
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io(err.to_string())
    }
}

/// Durable per-network "last processed block" ledger.
///
/// Every network shares one ledger, so implementations serialize `commit`
/// internally. `load` reads a consistent snapshot without taking the writer
/// lock.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, network_name: &str) -> StorageResult<Option<Checkpoint>>;

    /// Upserts the network's entry. A block lower than the stored one leaves
    /// the entry unchanged.
    async fn commit(&self, network_name: &str, chain_id: u64, block: u64) -> StorageResult<()>;

    async fn load_all(&self) -> StorageResult<BTreeMap<String, Checkpoint>>;

    /// Where the ledger lives, for operator-facing logs.
    fn location(&self) -> String;
}
