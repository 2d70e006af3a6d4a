use sea_orm::sea_query::{ColumnDef, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::checkpoints;
use chain_watch_domain::storage::{StorageError, StorageResult};

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let checkpoints_table = Table::create()
        .if_not_exists()
        .table(checkpoints::Entity)
        .col(
            ColumnDef::new(checkpoints::Column::NetworkName)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(checkpoints::Column::ChainId)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(checkpoints::Column::LastProcessedBlock)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(checkpoints::Column::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, checkpoints_table).await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}
