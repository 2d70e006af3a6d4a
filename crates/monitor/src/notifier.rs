//! Alert delivery for decoded events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chain_watch_domain::config::SlackConfig;
use chain_watch_domain::model::{format_utc, EventRecord, FieldValue};
use chain_watch_domain::services::ChainRegistry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
pub const SLACK_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const ALERT_FOOTER: &str = "Distributor Monitor";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("slack responded with HTTP {0}")]
    Status(u16),
    #[error("slack rejected the message: {0}")]
    Rejected(String),
    #[error("delivery did not finish within {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Delivers one alert per decoded event. Implementations must be safe to
/// share across every network scanner.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, record: &EventRecord) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

/// Channel-agnostic rendering of an [`EventRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertMessage {
    pub color: &'static str,
    pub title: String,
    pub text: String,
    pub fields: Vec<AlertField>,
    pub footer: &'static str,
}

impl AlertMessage {
    pub fn from_record(record: &EventRecord, emoji: &str) -> Self {
        let mut fields: Vec<AlertField> = record
            .fields()
            .map(|field| AlertField {
                title: field.label.to_string(),
                value: match &field.value {
                    FieldValue::Bytes32(_) | FieldValue::Address(_) | FieldValue::Uint256(_) => {
                        format!("`{}`", field.value)
                    }
                    _ => field.value.to_string(),
                },
                short: true,
            })
            .collect();
        fields.push(AlertField {
            title: "Block Number".into(),
            value: record.block_number.to_string(),
            short: true,
        });
        fields.push(AlertField {
            title: "Transaction Hash".into(),
            value: format!("`{}`", record.transaction_hash),
            short: false,
        });
        let block_time = format_utc(&record.block_timestamp);
        fields.push(AlertField {
            title: "Block Timestamp".into(),
            value: if record.timestamp_is_fallback() {
                format!("{block_time} (wall clock)")
            } else {
                block_time
            },
            short: true,
        });

        Self {
            color: "good",
            title: format!("{emoji} {}", humanize(record.event.name)),
            text: format!(
                "{} on {} network",
                record.event.summary,
                record.network.name()
            ),
            fields,
            footer: ALERT_FOOTER,
        }
    }
}

/// `RootSubmitted` -> `Root Submitted`.
fn humanize(event_name: &str) -> String {
    let mut out = String::with_capacity(event_name.len() + 4);
    for (idx, ch) in event_name.chars().enumerate() {
        if idx > 0 && ch.is_ascii_uppercase() {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    attachments: [&'a AlertMessage; 1],
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts alerts to a Slack channel through `chat.postMessage`.
pub struct SlackNotifier {
    http: reqwest::Client,
    api_url: String,
    config: SlackConfig,
    registry: Arc<ChainRegistry>,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig, registry: Arc<ChainRegistry>) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(SLACK_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_url: SLACK_POST_MESSAGE_URL.to_string(),
            config,
            registry,
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn payload<'a>(&'a self, message: &'a AlertMessage) -> PostMessage<'a> {
        PostMessage {
            channel: self.config.channel(),
            attachments: [message],
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, record: &EventRecord) -> Result<(), NotifyError> {
        let emoji = self.registry.emoji(record.network.chain_id());
        let message = AlertMessage::from_record(record, emoji);

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.config.token())
            .json(&self.payload(&message))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        let body: PostMessageResponse = response.json().await?;
        if !body.ok {
            return Err(NotifyError::Rejected(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        info!(
            network = record.network.name(),
            block = record.block_number,
            tx = %record.transaction_hash,
            "slack notification sent"
        );
        Ok(())
    }
}

/// Fallback when no Slack credentials are configured: alerts only reach the
/// structured log.
pub struct LogNotifier {
    registry: Arc<ChainRegistry>,
}

impl LogNotifier {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, record: &EventRecord) -> Result<(), NotifyError> {
        let emoji = self.registry.emoji(record.network.chain_id());
        let message = AlertMessage::from_record(record, emoji);
        let fields = message
            .fields
            .iter()
            .map(|field| format!("{}={}", field.title, field.value))
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            network = record.network.name(),
            block = record.block_number,
            alert = %message.title,
            text = %message.text,
            %fields,
            "alert (slack not configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chain_watch_domain::model::{
        Address, DecodedEvent, EventField, Hash32, NetworkTarget, TimestampSource,
    };
    use chain_watch_domain::services::ChainInfo;
    use chrono::DateTime;
    use std::time::Duration;

    pub(crate) fn sample_record(source: TimestampSource) -> EventRecord {
        let network = NetworkTarget::new(
            "ethereum",
            1,
            "http://localhost:8545",
            Address::from_bytes([0xaa; 20]),
            100,
            Duration::from_secs(30),
        )
        .unwrap();
        EventRecord {
            network: Arc::new(network),
            event: DecodedEvent {
                name: "RootSubmitted",
                summary: "A new root has been submitted",
                indexed: vec![EventField::new(
                    "campaign_id",
                    "Campaign ID",
                    FieldValue::Bytes32(Hash32::from_bytes([0x11; 32])),
                )],
                payload: vec![EventField::new(
                    "effective_timestamp",
                    "Effective Timestamp",
                    FieldValue::Timestamp(DateTime::from_timestamp(1_700_000_000, 0).unwrap()),
                )],
            },
            block_number: 120,
            transaction_hash: Hash32::from_bytes([0x55; 32]),
            log_index: 0,
            block_timestamp: DateTime::from_timestamp(1_699_999_988, 0).unwrap(),
            timestamp_source: source,
        }
    }

    fn registry() -> Arc<ChainRegistry> {
        Arc::new(
            ChainRegistry::from_chains(vec![ChainInfo {
                name: "ethereum".into(),
                chain_id: 1,
                emoji: "🔷".into(),
                env_prefix: "ETH".into(),
                default_batch_size: 100,
                block_time: Some("12s".into()),
                category: Some("mainnet".into()),
            }])
            .unwrap(),
        )
    }

    #[test]
    fn renders_alert_with_emoji_and_fields() {
        let message = AlertMessage::from_record(&sample_record(TimestampSource::Block), "🔷");
        assert_eq!(message.title, "🔷 Root Submitted");
        assert_eq!(message.footer, "Distributor Monitor");
        assert_eq!(
            message.text,
            "A new root has been submitted on ethereum network"
        );

        let titles: Vec<_> = message.fields.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(
            titles,
            [
                "Campaign ID",
                "Effective Timestamp",
                "Block Number",
                "Transaction Hash",
                "Block Timestamp"
            ]
        );
        assert_eq!(message.fields[0].value, format!("`0x{}`", "11".repeat(32)));
        assert_eq!(message.fields[1].value, "2023-11-14 22:13:20 UTC");
        assert!(!message.fields[3].short);
    }

    #[test]
    fn out_of_range_timestamp_shows_raw_word() {
        let mut record = sample_record(TimestampSource::Block);
        record.event.payload[0].value = FieldValue::Uint256([0xff; 32]);
        let message = AlertMessage::from_record(&record, "🔷");
        assert_eq!(message.fields[1].title, "Effective Timestamp");
        assert_eq!(message.fields[1].value, format!("`0x{}`", "ff".repeat(32)));
    }

    #[test]
    fn fallback_timestamp_is_flagged() {
        let message = AlertMessage::from_record(&sample_record(TimestampSource::WallClock), "⚡");
        let block_time = message.fields.last().unwrap();
        assert!(block_time.value.ends_with("(wall clock)"));
    }

    #[test]
    fn slack_payload_targets_configured_channel() {
        let notifier =
            SlackNotifier::new(SlackConfig::new("xoxb-test", "#alerts"), registry()).unwrap();
        let message = AlertMessage::from_record(&sample_record(TimestampSource::Block), "🔷");
        let payload = serde_json::to_value(notifier.payload(&message)).unwrap();
        assert_eq!(payload["channel"], "#alerts");
        assert_eq!(payload["attachments"][0]["title"], "🔷 Root Submitted");
        assert_eq!(payload["attachments"][0]["fields"][2]["value"], "120");
    }

    #[test]
    fn slack_rejection_body_parses() {
        let body: PostMessageResponse =
            serde_json::from_str(r#"{"ok":false,"error":"channel_not_found"}"#).unwrap();
        assert!(!body.ok);
        assert_eq!(body.error.as_deref(), Some("channel_not_found"));
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let notifier = LogNotifier::new(registry());
        notifier
            .notify(&sample_record(TimestampSource::Block))
            .await
            .expect("logging never fails");
    }
}
