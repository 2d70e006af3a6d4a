//! Per-network scanning loop: resume from the checkpoint, then on every poll
//! tick fetch the head, plan a window, query logs, alert and commit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chain_watch_domain::model::{AlertOutcome, NetworkTarget, ScanWindow};
use chain_watch_domain::services::BlockTimestampCache;
use chain_watch_domain::storage::{CheckpointStore, StorageError};
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::decoder::EventDecoder;
use crate::notifier::Notifier;
use crate::pipeline::{process_log, LogContext};
use crate::planner::{next_after, plan_window, resolve_start};
use crate::rpc::{ChainClient, LogBatch, LogFilter, RpcError};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HEAD_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_LOGS_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ScannerState {
    Connecting,
    ResolvingStart,
    Idle,
    FetchHead,
    Plan,
    QueryLogs,
    DecodeAndNotify,
    Commit,
    ShuttingDown,
    Stopped,
}

/// Upper bounds for each network call a scanner makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerTimeouts {
    pub connect: Duration,
    pub head: Duration,
    pub logs: Duration,
    pub block_timestamp: Duration,
    /// Per alert; an expired delivery counts as a notification failure.
    pub notify: Duration,
}

impl Default for ScannerTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            head: DEFAULT_HEAD_TIMEOUT,
            logs: DEFAULT_LOGS_TIMEOUT,
            block_timestamp: DEFAULT_HEAD_TIMEOUT,
            notify: DEFAULT_NOTIFY_TIMEOUT,
        }
    }
}

/// Collaborators a scanner is wired with. The store is shared by every
/// scanner; the rest may be.
#[derive(Clone)]
pub struct ScannerDeps {
    pub client: Arc<dyn ChainClient>,
    pub decoder: Arc<dyn EventDecoder>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn CheckpointStore>,
}

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("failed to load checkpoint for `{network}`: {source}")]
    LoadCheckpoint {
        network: String,
        #[source]
        source: StorageError,
    },
}

impl ScannerError {
    pub fn network(&self) -> &str {
        match self {
            Self::LoadCheckpoint { network, .. } => network,
        }
    }
}

/// Summary of one processed window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowReport {
    pub window: ScanWindow,
    pub logs: usize,
    pub notified: usize,
    pub decode_failed: usize,
    pub notify_failed: usize,
    /// Whether the checkpoint write for `window.to_block` succeeded.
    pub committed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    HeadUnavailable,
    NoNewBlocks,
    LogQueryFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle(IdleReason),
    Completed(WindowReport),
    Cancelled,
}

impl TickOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            Self::Idle(IdleReason::HeadUnavailable) => "head_failed",
            Self::Idle(IdleReason::NoNewBlocks) => "no_work",
            Self::Idle(IdleReason::LogQueryFailed) => "logs_failed",
            Self::Completed(_) => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Final state handed back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerReport {
    pub network: String,
    pub last_completed_block: Option<u64>,
    pub last_persisted_block: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// No checkpoint and no configured start: begin at the first head seen.
    AwaitingHead,
    Next(u64),
}

pub struct NetworkScanner {
    network: Arc<NetworkTarget>,
    deps: ScannerDeps,
    timeouts: ScannerTimeouts,
    timestamps: BlockTimestampCache,
    state: ScannerState,
    cursor: Cursor,
    last_completed: Option<u64>,
    last_persisted: Option<u64>,
}

impl NetworkScanner {
    pub fn new(network: impl Into<Arc<NetworkTarget>>, deps: ScannerDeps) -> Self {
        Self {
            network: network.into(),
            deps,
            timeouts: ScannerTimeouts::default(),
            timestamps: BlockTimestampCache::default(),
            state: ScannerState::Connecting,
            cursor: Cursor::AwaitingHead,
            last_completed: None,
            last_persisted: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: ScannerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn network(&self) -> &NetworkTarget {
        &self.network
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// Block the next window starts at, once known.
    pub fn next_block(&self) -> Option<u64> {
        match self.cursor {
            Cursor::AwaitingHead => None,
            Cursor::Next(block) => Some(block),
        }
    }

    pub fn last_completed_block(&self) -> Option<u64> {
        self.last_completed
    }

    /// Runs until `cancel` fires. Only a checkpoint load failure at startup
    /// ends the scanner with an error.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ScannerReport, ScannerError> {
        if let Err(err) = self.prepare(&cancel).await {
            self.enter(ScannerState::Stopped);
            return Err(err);
        }

        let mut ticker = interval(self.network.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            self.enter(ScannerState::Idle);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.tick(&cancel).await == TickOutcome::Cancelled {
                break;
            }
        }

        Ok(self.shutdown().await)
    }

    /// `CONNECTING` then `RESOLVING_START`.
    pub async fn prepare(&mut self, cancel: &CancellationToken) -> Result<(), ScannerError> {
        self.enter(ScannerState::Connecting);
        self.connect(cancel).await;

        self.enter(ScannerState::ResolvingStart);
        let network = self.network.name();
        let checkpoint = self
            .deps
            .store
            .load(network)
            .await
            .map_err(|source| ScannerError::LoadCheckpoint {
                network: network.to_string(),
                source,
            })?
            .map(|checkpoint| checkpoint.last_processed_block);
        self.last_persisted = checkpoint;

        match resolve_start(checkpoint, self.network.configured_start_block(), None) {
            Some(start) => {
                info!(
                    network,
                    next_block = start.next_block,
                    source = %start.source,
                    "resolved start block"
                );
                self.cursor = Cursor::Next(start.next_block);
            }
            None => {
                info!(network, "no checkpoint or start block, will begin at chain head");
                self.cursor = Cursor::AwaitingHead;
            }
        }
        Ok(())
    }

    async fn connect(&self, cancel: &CancellationToken) {
        let network = self.network.name();
        info!(network, endpoint = self.network.rpc_endpoint(), "connecting");
        let reported = bounded_call(
            network,
            "eth_chainId",
            self.timeouts.connect,
            cancel,
            self.deps.client.chain_id(),
        )
        .await;
        match reported {
            None => {}
            Some(Ok(chain_id)) if chain_id == self.network.chain_id() => {
                info!(network, chain_id, "connected");
            }
            Some(Ok(chain_id)) => {
                warn!(
                    network,
                    expected = self.network.chain_id(),
                    reported = chain_id,
                    "chain id mismatch, scanning anyway"
                );
            }
            Some(Err(err)) => {
                warn!(network, error = %err, "could not verify chain id, scanning anyway");
            }
        }
    }

    /// One pass through `FETCH_HEAD → PLAN → QUERY_LOGS → DECODE_AND_NOTIFY → COMMIT`.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> TickOutcome {
        let outcome = self.tick_inner(cancel).await;
        counter!(
            "watch_ticks_total",
            "network" => self.network.name().to_string(),
            "result" => outcome.metric_label()
        )
        .increment(1);
        outcome
    }

    async fn tick_inner(&mut self, cancel: &CancellationToken) -> TickOutcome {
        if cancel.is_cancelled() {
            return TickOutcome::Cancelled;
        }
        let network = Arc::clone(&self.network);
        let name = network.name();

        self.enter(ScannerState::FetchHead);
        let head = match bounded_call(
            name,
            "eth_blockNumber",
            self.timeouts.head,
            cancel,
            self.deps.client.latest_block_number(),
        )
        .await
        {
            None => return TickOutcome::Cancelled,
            Some(Ok(head)) => head,
            Some(Err(err)) => {
                warn!(network = name, error = %err, "failed to fetch chain head");
                return TickOutcome::Idle(IdleReason::HeadUnavailable);
            }
        };

        self.enter(ScannerState::Plan);
        let next_block = match self.cursor {
            Cursor::Next(block) => block,
            Cursor::AwaitingHead => {
                info!(network = name, head, "starting from current chain head");
                self.cursor = Cursor::Next(head);
                head
            }
        };
        let Some(window) = plan_window(name, next_block, head, network.batch_size()) else {
            debug!(network = name, head, next_block, "no new blocks");
            return TickOutcome::Idle(IdleReason::NoNewBlocks);
        };

        self.enter(ScannerState::QueryLogs);
        info!(
            network = name,
            from = window.from_block,
            to = window.to_block,
            "checking blocks"
        );
        let filter = LogFilter {
            from_block: window.from_block,
            to_block: window.to_block,
            address: network.contract_address(),
            topic0: self.deps.decoder.topic(),
        };
        let batch = match bounded_call(
            name,
            "eth_getLogs",
            self.timeouts.logs,
            cancel,
            self.deps.client.filter_logs(&filter),
        )
        .await
        {
            None => return TickOutcome::Cancelled,
            Some(Ok(batch)) => batch,
            Some(Err(err)) => {
                warn!(
                    network = name,
                    from = window.from_block,
                    to = window.to_block,
                    error = %err,
                    "failed to query logs, window will be retried"
                );
                return TickOutcome::Idle(IdleReason::LogQueryFailed);
            }
        };
        histogram!("watch_window_logs", "network" => name.to_string())
            .record((batch.logs.len() + batch.malformed) as f64);
        if batch.malformed > 0 {
            warn!(
                network = name,
                from = window.from_block,
                to = window.to_block,
                malformed = batch.malformed,
                "node returned malformed log entries, skipping them"
            );
            counter!(
                "watch_alerts_total",
                "network" => name.to_string(),
                "result" => AlertOutcome::DecodeFailed.as_str()
            )
            .increment(batch.malformed as u64);
        }

        self.enter(ScannerState::DecodeAndNotify);
        let mut report = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(
                    network = name,
                    from = window.from_block,
                    to = window.to_block,
                    "window abandoned on shutdown"
                );
                return TickOutcome::Cancelled;
            }
            report = self.dispatch(&window, &batch) => report,
        };

        self.enter(ScannerState::Commit);
        report.committed = self.persist(window.to_block).await;
        self.last_completed = Some(window.to_block);
        self.cursor = Cursor::Next(next_after(window.to_block));

        TickOutcome::Completed(report)
    }

    async fn dispatch(&self, window: &ScanWindow, batch: &LogBatch) -> WindowReport {
        let ctx = LogContext {
            network: &self.network,
            client: self.deps.client.as_ref(),
            decoder: self.deps.decoder.as_ref(),
            notifier: self.deps.notifier.as_ref(),
            timestamps: &self.timestamps,
            timestamp_timeout: self.timeouts.block_timestamp,
            notify_timeout: self.timeouts.notify,
        };
        let mut report = WindowReport {
            window: window.clone(),
            logs: batch.logs.len() + batch.malformed,
            notified: 0,
            decode_failed: batch.malformed,
            notify_failed: 0,
            committed: false,
        };
        for log in &batch.logs {
            match process_log(&ctx, log).await {
                AlertOutcome::Notified => report.notified += 1,
                AlertOutcome::DecodeFailed => report.decode_failed += 1,
                AlertOutcome::NotifyFailed => report.notify_failed += 1,
            }
        }
        report
    }

    async fn persist(&mut self, block: u64) -> bool {
        let network = self.network.name();
        match self
            .deps
            .store
            .commit(network, self.network.chain_id(), block)
            .await
        {
            Ok(()) => {
                self.last_persisted = Some(block);
                counter!("watch_checkpoint_commits_total", "result" => "ok").increment(1);
                gauge!("watch_last_committed_block", "network" => network.to_string())
                    .set(block as f64);
                debug!(network, block, "checkpoint committed");
                true
            }
            Err(err) => {
                counter!("watch_checkpoint_commits_total", "result" => "error").increment(1);
                error!(
                    network,
                    block,
                    error = %err,
                    "failed to persist checkpoint, progress kept in memory"
                );
                false
            }
        }
    }

    fn unpersisted_block(&self) -> Option<u64> {
        match (self.last_completed, self.last_persisted) {
            (Some(completed), Some(persisted)) if completed > persisted => Some(completed),
            (Some(completed), None) => Some(completed),
            _ => None,
        }
    }

    async fn shutdown(mut self) -> ScannerReport {
        self.enter(ScannerState::ShuttingDown);
        if let Some(block) = self.unpersisted_block() {
            info!(network = self.network.name(), block, "flushing last completed window");
            self.persist(block).await;
        }
        self.enter(ScannerState::Stopped);
        info!(
            network = self.network.name(),
            last_completed = ?self.last_completed,
            last_persisted = ?self.last_persisted,
            "scanner stopped"
        );
        ScannerReport {
            network: self.network.name().to_string(),
            last_completed_block: self.last_completed,
            last_persisted_block: self.last_persisted,
        }
    }

    fn enter(&mut self, state: ScannerState) {
        if self.state != state {
            debug!(network = self.network.name(), from = %self.state, to = %state, "state");
        }
        self.state = state;
    }
}

/// Races an RPC call against cancellation and a timeout. `None` means the
/// scanner was cancelled; an elapsed timeout is reported as an error.
async fn bounded_call<T, F>(
    network: &str,
    call: &'static str,
    limit: Duration,
    cancel: &CancellationToken,
    request: F,
) -> Option<Result<T, RpcError>>
where
    F: Future<Output = Result<T, RpcError>>,
{
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        result = timeout(limit, request) => {
            result.unwrap_or_else(|_| Err(RpcError::Timeout { call, after: limit }))
        }
    };
    let label = if result.is_ok() { "ok" } else { "error" };
    counter!(
        "watch_rpc_calls_total",
        "network" => network.to_string(),
        "call" => call,
        "result" => label
    )
    .increment(1);
    Some(result)
}
