use std::{path::PathBuf, sync::Arc};

use chain_watch_domain::storage::{CheckpointStore, StorageError, StorageResult};

use crate::{JsonLedgerStore, SeaOrmStorage};

/// Picks the checkpoint backend: a database when a URL is given, the JSON
/// ledger file otherwise.
#[derive(Default)]
pub struct StorageBuilder {
    database_url: Option<String>,
    state_file: Option<PathBuf>,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_url(mut self, url: Option<impl Into<String>>) -> Self {
        self.database_url = url.map(Into::into);
        self
    }

    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    pub async fn build(self) -> StorageResult<Arc<dyn CheckpointStore>> {
        if let Some(url) = self.database_url {
            let storage = SeaOrmStorage::connect(&url).await?;
            return Ok(Arc::new(storage));
        }

        let path = self
            .state_file
            .ok_or_else(|| StorageError::Database("no checkpoint backend configured".into()))?;
        Ok(Arc::new(JsonLedgerStore::new(path)))
    }
}
