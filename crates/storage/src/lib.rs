//! Checkpoint store backends that satisfy the domain `CheckpointStore` trait:
//! a hand-editable JSON ledger (default) and a SeaORM table (SQLite by
//! default, PostgreSQL via feature flag).

mod builder;
mod checkpoint_store;
mod entity;
mod ledger;
mod migration;

use std::sync::Arc;

use chain_watch_domain::storage::{StorageError, StorageResult};
use migration::run_migrations;
use sea_orm::{Database, DatabaseConnection};
use tokio::sync::Mutex;

pub use builder::StorageBuilder;
pub use ledger::JsonLedgerStore;

/// Database-backed checkpoint storage handle.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: Arc<DatabaseConnection>,
    writer: Arc<Mutex<()>>,
}

impl SeaOrmStorage {
    /// Connects to the provided database URL and ensures the schema is present.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let db = Database::connect(database_url)
            .await
            .map_err(StorageError::from_source)?;
        run_migrations(&db).await?;
        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    pub(crate) fn writer(&self) -> &Mutex<()> {
        self.writer.as_ref()
    }
}
