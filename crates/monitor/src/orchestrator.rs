//! Runs one scanner task per network and coordinates their shutdown.

use std::time::Duration;

use thiserror::Error;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::scanner::{NetworkScanner, ScannerError, ScannerReport};

pub const DEFAULT_STARTUP_STAGGER: Duration = Duration::from_millis(100);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no network scanners to run")]
    NoScanners,
    #[error(transparent)]
    Scanner(#[from] ScannerError),
    #[error("scanner task for `{network}` panicked: {message}")]
    Panicked { network: String, message: String },
    #[error("{pending} scanner(s) did not stop within {grace:?}")]
    ShutdownTimedOut { pending: usize, grace: Duration },
}

type ScannerExit = (String, Result<Result<ScannerReport, ScannerError>, JoinError>);

pub struct ScannerOrchestrator {
    scanners: Vec<NetworkScanner>,
    stagger: Duration,
    shutdown_grace: Duration,
}

impl ScannerOrchestrator {
    pub fn new(scanners: Vec<NetworkScanner>) -> Self {
        Self {
            scanners,
            stagger: DEFAULT_STARTUP_STAGGER,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Starts every scanner and supervises them until `shutdown` fires or
    /// all of them have exited. Succeeds only if every scanner stopped
    /// because it was cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
        if self.scanners.is_empty() {
            return Err(OrchestratorError::NoScanners);
        }

        let scanners_token = shutdown.child_token();
        let mut tasks: JoinSet<ScannerExit> = JoinSet::new();
        let mut scanner_handles: Vec<AbortHandle> = Vec::with_capacity(self.scanners.len());
        let total = self.scanners.len();

        for (index, scanner) in self.scanners.into_iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = sleep(self.stagger) => {}
                }
            }
            let network = scanner.network().name().to_string();
            info!(network = %network, index = index + 1, total, "starting scanner");
            let handle = tokio::spawn(scanner.run(scanners_token.clone()));
            scanner_handles.push(handle.abort_handle());
            tasks.spawn(async move { (network, handle.await) });
        }

        let mut first_error: Option<OrchestratorError> = None;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                joined = tasks.join_next() => match joined {
                    Some(joined) => record_exit(joined, &mut first_error),
                    None => {
                        warn!("every scanner exited before shutdown was requested");
                        return first_error.map_or(Ok(()), Err);
                    }
                },
            }
        }

        info!(running = tasks.len(), "stopping scanners");
        scanners_token.cancel();
        let grace = self.shutdown_grace;
        let drained = timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                record_exit(joined, &mut first_error);
            }
        })
        .await;

        if drained.is_err() {
            let pending = tasks.len();
            error!(pending, ?grace, "scanners did not stop in time, aborting");
            for handle in &scanner_handles {
                handle.abort();
            }
            tasks.abort_all();
            first_error.get_or_insert(OrchestratorError::ShutdownTimedOut { pending, grace });
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("all scanners stopped");
                Ok(())
            }
        }
    }
}

fn record_exit(
    joined: Result<ScannerExit, JoinError>,
    first_error: &mut Option<OrchestratorError>,
) {
    let (network, outcome) = match joined {
        Ok(exit) => exit,
        // The supervising wrapper itself was aborted.
        Err(_) => return,
    };
    match outcome {
        Ok(Ok(report)) => {
            info!(
                network = %network,
                last_completed = ?report.last_completed_block,
                "scanner stopped cleanly"
            );
        }
        Ok(Err(err)) => {
            error!(network = %network, error = %err, "scanner failed");
            first_error.get_or_insert(OrchestratorError::Scanner(err));
        }
        Err(join_err) if join_err.is_cancelled() => {
            warn!(network = %network, "scanner task aborted");
        }
        Err(join_err) => {
            error!(network = %network, error = %join_err, "scanner task panicked");
            first_error.get_or_insert(OrchestratorError::Panicked {
                network,
                message: join_err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::tests::{deps, target, MemoryStore, MockChain, RecordingNotifier};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[tokio::test]
    async fn empty_orchestrator_is_an_error() {
        let result = ScannerOrchestrator::new(Vec::new())
            .run(CancellationToken::new())
            .await;
        assert!(matches!(result, Err(OrchestratorError::NoScanners)));
    }

    #[tokio::test]
    async fn scanners_share_the_ledger_and_stop_cleanly() {
        let store = Arc::new(MemoryStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let eth_chain = MockChain::with_head(10);
        let bsc_chain = MockChain::with_head(5);
        let scanners = vec![
            NetworkScanner::new(target("eth", Some(1), 100), deps(&eth_chain, &store, &notifier)),
            NetworkScanner::new(target("bsc", Some(1), 100), deps(&bsc_chain, &store, &notifier)),
        ];

        let shutdown = CancellationToken::new();
        let orchestrator = ScannerOrchestrator::new(scanners)
            .with_stagger(Duration::from_millis(1))
            .with_shutdown_grace(Duration::from_secs(5));
        let handle = tokio::spawn(orchestrator.run(shutdown.clone()));

        for _ in 0..500 {
            if store.block("eth") == Some(10) && store.block("bsc") == Some(5) {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();

        handle.await.unwrap().expect("clean shutdown");
        assert_eq!(store.block("eth"), Some(10));
        assert_eq!(store.block("bsc"), Some(5));
    }

    #[tokio::test]
    async fn failing_scanner_does_not_stop_siblings_and_is_reported() {
        let healthy_store = Arc::new(MemoryStore::default());
        let broken_store = Arc::new(MemoryStore::default());
        broken_store.fail_loads.store(true, Ordering::SeqCst);
        let notifier = Arc::new(RecordingNotifier::default());
        let chain = MockChain::with_head(20);
        let scanners = vec![
            NetworkScanner::new(
                target("broken", Some(1), 100),
                deps(&chain, &broken_store, &notifier),
            ),
            NetworkScanner::new(
                target("eth", Some(1), 100),
                deps(&chain, &healthy_store, &notifier),
            ),
        ];

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            ScannerOrchestrator::new(scanners)
                .with_stagger(Duration::from_millis(1))
                .run(shutdown.clone()),
        );

        for _ in 0..500 {
            if healthy_store.block("eth") == Some(20) {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(healthy_store.block("eth"), Some(20));
        shutdown.cancel();

        match handle.await.unwrap() {
            Err(OrchestratorError::Scanner(err)) => assert_eq!(err.network(), "broken"),
            other => panic!("expected scanner error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn returns_when_every_scanner_exits_early() {
        let store = Arc::new(MemoryStore::default());
        store.fail_loads.store(true, Ordering::SeqCst);
        let notifier = Arc::new(RecordingNotifier::default());
        let chain = MockChain::with_head(20);
        let scanners = vec![NetworkScanner::new(
            target("eth", Some(1), 100),
            deps(&chain, &store, &notifier),
        )];

        let result = timeout(
            Duration::from_secs(5),
            ScannerOrchestrator::new(scanners).run(CancellationToken::new()),
        )
        .await
        .expect("returns without a shutdown signal");
        assert!(matches!(result, Err(OrchestratorError::Scanner(_))));
    }
}
