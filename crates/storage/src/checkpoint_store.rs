use std::collections::BTreeMap;

use chain_watch_domain::model::Checkpoint;
use chain_watch_domain::storage::{CheckpointStore, StorageError, StorageResult};
use chrono::Utc;
use sea_orm::{sea_query::OnConflict, EntityTrait, QueryOrder, Set};
use tracing::debug;

use crate::entity::checkpoints;
use crate::SeaOrmStorage;

fn to_db_int(field: &'static str, value: u64) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::Database(format!("{field} {value} exceeds the column range")))
}

fn model_to_checkpoint(model: checkpoints::Model) -> Checkpoint {
    Checkpoint {
        network_name: model.network_name,
        chain_id: model.chain_id.max(0) as u64,
        last_processed_block: model.last_processed_block.max(0) as u64,
        updated_at: model.updated_at,
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SeaOrmStorage {
    async fn load(&self, network_name: &str) -> StorageResult<Option<Checkpoint>> {
        let maybe = checkpoints::Entity::find_by_id(network_name.to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(model_to_checkpoint))
    }

    async fn commit(&self, network_name: &str, chain_id: u64, block: u64) -> StorageResult<()> {
        let _writer = self.writer().lock().await;

        let existing = checkpoints::Entity::find_by_id(network_name.to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        if let Some(existing) = existing {
            if existing.last_processed_block > to_db_int("block", block)? {
                debug!(
                    network = network_name,
                    stored = existing.last_processed_block,
                    requested = block,
                    "ignoring checkpoint below stored block"
                );
                return Ok(());
            }
        }

        let active = checkpoints::ActiveModel {
            network_name: Set(network_name.to_string()),
            chain_id: Set(to_db_int("chain id", chain_id)?),
            last_processed_block: Set(to_db_int("block", block)?),
            updated_at: Set(Utc::now()),
        };
        checkpoints::Entity::insert(active)
            .on_conflict(
                OnConflict::column(checkpoints::Column::NetworkName)
                    .update_columns([
                        checkpoints::Column::ChainId,
                        checkpoints::Column::LastProcessedBlock,
                        checkpoints::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }

    async fn load_all(&self) -> StorageResult<BTreeMap<String, Checkpoint>> {
        let models = checkpoints::Entity::find()
            .order_by_asc(checkpoints::Column::NetworkName)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(models
            .into_iter()
            .map(|model| (model.network_name.clone(), model_to_checkpoint(model)))
            .collect())
    }

    fn location(&self) -> String {
        "database table `checkpoints`".to_string()
    }
}
