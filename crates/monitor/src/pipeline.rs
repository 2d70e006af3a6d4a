use std::sync::Arc;
use std::time::Duration;

use chain_watch_domain::model::{AlertOutcome, EventRecord, NetworkTarget, RawLog, TimestampSource};
use chain_watch_domain::services::BlockTimestampCache;
use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::decoder::EventDecoder;
use crate::notifier::{Notifier, NotifyError};
use crate::rpc::{ChainClient, RpcError};

/// Collaborators needed to turn one raw log into a delivered alert.
pub struct LogContext<'a> {
    pub network: &'a Arc<NetworkTarget>,
    pub client: &'a dyn ChainClient,
    pub decoder: &'a dyn EventDecoder,
    pub notifier: &'a dyn Notifier,
    pub timestamps: &'a BlockTimestampCache,
    pub timestamp_timeout: Duration,
    pub notify_timeout: Duration,
}

/// Decodes and delivers a single log. Failures are logged and counted but
/// never abort the window: the caller moves on to the next log either way.
pub async fn process_log(ctx: &LogContext<'_>, log: &RawLog) -> AlertOutcome {
    let network = ctx.network.name();
    let event = match ctx.decoder.decode(log) {
        Ok(event) => event,
        Err(err) => {
            warn!(
                network,
                block = log.block_number,
                tx = %log.transaction_hash,
                log_index = log.log_index,
                error = %err,
                "failed to decode log, skipping"
            );
            counter!(
                "watch_alerts_total",
                "network" => network.to_string(),
                "result" => AlertOutcome::DecodeFailed.as_str()
            )
            .increment(1);
            return AlertOutcome::DecodeFailed;
        }
    };

    let (block_timestamp, timestamp_source) = resolve_block_timestamp(ctx, log.block_number).await;
    let record = EventRecord {
        network: Arc::clone(ctx.network),
        event,
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
        block_timestamp,
        timestamp_source,
    };
    info!(
        network,
        event = record.event.name,
        block = record.block_number,
        tx = %record.transaction_hash,
        "event detected"
    );

    let delivered = timeout(ctx.notify_timeout, ctx.notifier.notify(&record))
        .await
        .unwrap_or_else(|_| Err(NotifyError::Timeout(ctx.notify_timeout)));
    let outcome = match delivered {
        Ok(()) => AlertOutcome::Notified,
        Err(err) => {
            let fields = record
                .fields()
                .map(|field| format!("{}={}", field.name, field.value))
                .collect::<Vec<_>>()
                .join(", ");
            error!(
                network,
                event = record.event.name,
                block = record.block_number,
                tx = %record.transaction_hash,
                log_index = record.log_index,
                %fields,
                error = %err,
                "alert delivery failed; event will not be retried"
            );
            AlertOutcome::NotifyFailed
        }
    };
    counter!(
        "watch_alerts_total",
        "network" => network.to_string(),
        "result" => outcome.as_str()
    )
    .increment(1);
    outcome
}

async fn resolve_block_timestamp(
    ctx: &LogContext<'_>,
    block_number: u64,
) -> (DateTime<Utc>, TimestampSource) {
    if let Some(at) = ctx.timestamps.get(block_number) {
        return (at, TimestampSource::Block);
    }

    let fetched = timeout(ctx.timestamp_timeout, ctx.client.block_timestamp(block_number))
        .await
        .unwrap_or_else(|_| {
            Err(RpcError::Timeout {
                call: "eth_getBlockByNumber",
                after: ctx.timestamp_timeout,
            })
        });
    match fetched {
        Ok(at) => {
            ctx.timestamps.insert(block_number, at);
            (at, TimestampSource::Block)
        }
        Err(err) => {
            warn!(
                network = ctx.network.name(),
                block = block_number,
                error = %err,
                "block timestamp unavailable, using local clock"
            );
            (Utc::now(), TimestampSource::WallClock)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::tests::root_submitted_log;
    use crate::decoder::RootSubmittedDecoder;
    use crate::rpc::{LogBatch, LogFilter};
    use async_trait::async_trait;
    use chain_watch_domain::model::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubClient {
        timestamp_calls: AtomicUsize,
        fail_timestamps: bool,
    }

    #[async_trait]
    impl ChainClient for StubClient {
        async fn chain_id(&self) -> Result<u64, RpcError> {
            Ok(1)
        }

        async fn latest_block_number(&self) -> Result<u64, RpcError> {
            Ok(0)
        }

        async fn filter_logs(&self, _filter: &LogFilter) -> Result<LogBatch, RpcError> {
            Ok(LogBatch::default())
        }

        async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, RpcError> {
            self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_timestamps {
                return Err(RpcError::BlockNotFound(block_number));
            }
            Ok(DateTime::from_timestamp(1_600_000_000 + block_number as i64, 0).unwrap())
        }
    }

    struct StalledNotifier;

    #[async_trait]
    impl Notifier for StalledNotifier {
        async fn notify(&self, _record: &EventRecord) -> Result<(), NotifyError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        records: Mutex<Vec<EventRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, record: &EventRecord) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Status(500));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn network() -> Arc<NetworkTarget> {
        Arc::new(
            NetworkTarget::new(
                "ethereum",
                1,
                "http://localhost:8545",
                Address::from_bytes([0xaa; 20]),
                100,
                Duration::from_secs(30),
            )
            .unwrap(),
        )
    }

    fn stub_client(fail_timestamps: bool) -> StubClient {
        StubClient {
            timestamp_calls: AtomicUsize::new(0),
            fail_timestamps,
        }
    }

    #[tokio::test]
    async fn notifies_with_block_timestamp_and_caches_it() {
        let network = network();
        let client = stub_client(false);
        let decoder = RootSubmittedDecoder::new();
        let notifier = RecordingNotifier::default();
        let timestamps = BlockTimestampCache::default();
        let ctx = LogContext {
            network: &network,
            client: &client,
            decoder: &decoder,
            notifier: &notifier,
            timestamps: &timestamps,
            timestamp_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(1),
        };

        assert_eq!(
            process_log(&ctx, &root_submitted_log(7, 0, 10)).await,
            AlertOutcome::Notified
        );
        assert_eq!(
            process_log(&ctx, &root_submitted_log(7, 1, 10)).await,
            AlertOutcome::Notified
        );

        assert_eq!(client.timestamp_calls.load(Ordering::SeqCst), 1);
        let records = notifier.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp_source, TimestampSource::Block);
        assert_eq!(records[0].block_timestamp.timestamp(), 1_600_000_007);
    }

    #[tokio::test]
    async fn missing_block_falls_back_to_wall_clock() {
        let network = network();
        let client = stub_client(true);
        let decoder = RootSubmittedDecoder::new();
        let notifier = RecordingNotifier::default();
        let timestamps = BlockTimestampCache::default();
        let ctx = LogContext {
            network: &network,
            client: &client,
            decoder: &decoder,
            notifier: &notifier,
            timestamps: &timestamps,
            timestamp_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(1),
        };

        assert_eq!(
            process_log(&ctx, &root_submitted_log(7, 0, 10)).await,
            AlertOutcome::Notified
        );
        let records = notifier.records.lock().unwrap();
        assert!(records[0].timestamp_is_fallback());
    }

    #[tokio::test]
    async fn sentinel_timestamp_is_still_notified() {
        let network = network();
        let client = stub_client(false);
        let decoder = RootSubmittedDecoder::new();
        let notifier = RecordingNotifier::default();
        let timestamps = BlockTimestampCache::default();
        let ctx = LogContext {
            network: &network,
            client: &client,
            decoder: &decoder,
            notifier: &notifier,
            timestamps: &timestamps,
            timestamp_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(1),
        };

        let mut log = root_submitted_log(7, 0, 0);
        log.data[32..].fill(0xff);
        assert_eq!(process_log(&ctx, &log).await, AlertOutcome::Notified);
        let records = notifier.records.lock().unwrap();
        assert_eq!(
            records[0].event.payload[1].value.to_string(),
            format!("0x{}", "ff".repeat(32))
        );
    }

    #[tokio::test]
    async fn undecodable_log_is_skipped_without_notification() {
        let network = network();
        let client = stub_client(false);
        let decoder = RootSubmittedDecoder::new();
        let notifier = RecordingNotifier::default();
        let timestamps = BlockTimestampCache::default();
        let ctx = LogContext {
            network: &network,
            client: &client,
            decoder: &decoder,
            notifier: &notifier,
            timestamps: &timestamps,
            timestamp_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(1),
        };

        let mut log = root_submitted_log(7, 0, 10);
        log.data.truncate(10);
        assert_eq!(process_log(&ctx, &log).await, AlertOutcome::DecodeFailed);
        assert!(notifier.records.lock().unwrap().is_empty());
        assert_eq!(client.timestamp_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delivery_failure_is_reported_not_raised() {
        let network = network();
        let client = stub_client(false);
        let decoder = RootSubmittedDecoder::new();
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let timestamps = BlockTimestampCache::default();
        let ctx = LogContext {
            network: &network,
            client: &client,
            decoder: &decoder,
            notifier: &notifier,
            timestamps: &timestamps,
            timestamp_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(1),
        };

        assert_eq!(
            process_log(&ctx, &root_submitted_log(7, 0, 10)).await,
            AlertOutcome::NotifyFailed
        );
    }

    #[tokio::test]
    async fn stalled_delivery_times_out_as_failure() {
        let network = network();
        let client = stub_client(false);
        let decoder = RootSubmittedDecoder::new();
        let timestamps = BlockTimestampCache::default();
        let ctx = LogContext {
            network: &network,
            client: &client,
            decoder: &decoder,
            notifier: &StalledNotifier,
            timestamps: &timestamps,
            timestamp_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_millis(20),
        };

        let outcome = timeout(
            Duration::from_secs(5),
            process_log(&ctx, &root_submitted_log(7, 0, 10)),
        )
        .await
        .expect("delivery is bounded");
        assert_eq!(outcome, AlertOutcome::NotifyFailed);
    }
}
