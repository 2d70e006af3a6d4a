//! Process wiring for the `chain-watch` binary.

use std::sync::Arc;

use chain_watch_domain::config::{ConfigError, WatchConfig};
use chain_watch_domain::model::format_utc;
use chain_watch_domain::services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
use chain_watch_domain::services::{ChainRegistry, ContractBook, RegistryError};
use chain_watch_domain::storage::{CheckpointStore, StorageError};
use chain_watch_storage::StorageBuilder;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::decoder::{EventDecoder, RootSubmittedDecoder};
use crate::notifier::{LogNotifier, Notifier, NotifyError, SlackNotifier};
use crate::orchestrator::{OrchestratorError, ScannerOrchestrator};
use crate::rpc::JsonRpcChainClient;
use crate::scanner::{NetworkScanner, ScannerDeps};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("chain registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("notifier error: {0}")]
    Notify(#[from] NotifyError),
    #[error("no network could be started")]
    NoScanners,
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Loads configuration, wires every collaborator and runs the scanners until
/// SIGINT/SIGTERM.
pub async fn run() -> Result<(), MonitorError> {
    let config = WatchConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("WATCH");
    init_telemetry(&telemetry_config)?;

    let registry = Arc::new(ChainRegistry::from_path(config.chains_file())?);
    let contracts = ContractBook::from_path(config.contracts_file())?;
    let networks = config.networks_from_env(&registry, &contracts)?;
    info!(count = networks.len(), "networks configured");
    for network in &networks {
        info!(
            network = network.name(),
            chain_id = network.chain_id(),
            emoji = registry.emoji(network.chain_id()),
            contract = %network.contract_address(),
            batch_size = network.batch_size(),
            poll_interval = ?network.poll_interval(),
            start_block = ?network.configured_start_block(),
            "network target"
        );
    }

    let store = StorageBuilder::new()
        .database_url(config.database_url())
        .state_file(config.state_file())
        .build()
        .await?;
    report_saved_state(store.as_ref()).await?;

    let notifier: Arc<dyn Notifier> = match config.slack() {
        Some(slack) => Arc::new(SlackNotifier::new(slack.clone(), Arc::clone(&registry))?),
        None => {
            warn!("SLACK_TOKEN/SLACK_CHANNEL not set, alerts will only be logged");
            Arc::new(LogNotifier::new(Arc::clone(&registry)))
        }
    };
    let decoder: Arc<dyn EventDecoder> = Arc::new(RootSubmittedDecoder::new());

    let mut scanners = Vec::with_capacity(networks.len());
    for network in networks {
        let client = match JsonRpcChainClient::new(network.rpc_endpoint()) {
            Ok(client) => client,
            Err(err) => {
                error!(network = network.name(), error = %err, "failed to build rpc client, skipping");
                continue;
            }
        };
        scanners.push(NetworkScanner::new(
            network,
            ScannerDeps {
                client: Arc::new(client),
                decoder: Arc::clone(&decoder),
                notifier: Arc::clone(&notifier),
                store: Arc::clone(&store),
            },
        ));
    }
    if scanners.is_empty() {
        return Err(MonitorError::NoScanners);
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    ScannerOrchestrator::new(scanners).run(shutdown).await?;
    info!("chain-watch stopped");
    Ok(())
}

/// Logs every saved checkpoint. An unreadable ledger aborts startup.
pub async fn report_saved_state(store: &dyn CheckpointStore) -> Result<usize, StorageError> {
    let checkpoints = store.load_all().await?;
    info!(location = %store.location(), "checkpoint ledger");
    if checkpoints.is_empty() {
        info!("no saved checkpoints, networks start from their configured block or chain head");
        return Ok(0);
    }
    for checkpoint in checkpoints.values() {
        info!(
            network = %checkpoint.network_name,
            chain_id = checkpoint.chain_id,
            last_processed_block = checkpoint.last_processed_block,
            updated_at = %format_utc(&checkpoint.updated_at),
            "saved checkpoint"
        );
    }
    Ok(checkpoints.len())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(err) = result {
                            error!(error = %err, "failed to listen for ctrl-c");
                        }
                    }
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::tests::MemoryStore;

    #[tokio::test]
    async fn reports_saved_checkpoints() {
        let store = MemoryStore::default();
        assert_eq!(report_saved_state(&store).await.unwrap(), 0);

        store.entries.lock().unwrap().insert("eth".into(), 900);
        store.entries.lock().unwrap().insert("bsc".into(), 12);
        assert_eq!(report_saved_state(&store).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unreadable_ledger_aborts_report() {
        let store = MemoryStore::default();
        store.entries.lock().unwrap().insert("eth".into(), 900);
        store
            .fail_loads
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(report_saved_state(&store).await.is_err());
    }
}
