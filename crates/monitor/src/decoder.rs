//! Event signature hashing and ABI decoding for watched contract events.

use chain_watch_domain::model::{DecodedEvent, EventField, FieldValue, Hash32, RawLog, HASH_LENGTH};
use chrono::DateTime;
use sha3::{Digest, Keccak256};
use thiserror::Error;

pub const ROOT_SUBMITTED_SIGNATURE: &str = "RootSubmitted(bytes32,bytes32,uint256)";

/// Keccak-256 of a canonical event signature, i.e. the log's `topics[0]`.
pub fn event_topic(signature: &str) -> Hash32 {
    let digest = Keccak256::digest(signature.as_bytes());
    let mut bytes = [0u8; HASH_LENGTH];
    bytes.copy_from_slice(&digest);
    Hash32::from_bytes(bytes)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no topic at index {index}")]
    MissingTopic { index: usize },
    #[error("log topic {actual} does not match expected {expected}")]
    UnexpectedTopic { expected: Hash32, actual: Hash32 },
    #[error("log data is {actual} bytes, expected {expected}")]
    DataLength { expected: usize, actual: usize },
}

/// Turns a raw log of one event type into named fields.
pub trait EventDecoder: Send + Sync {
    /// `topics[0]` used to filter logs for this event.
    fn topic(&self) -> Hash32;
    fn decode(&self, log: &RawLog) -> Result<DecodedEvent, DecodeError>;
}

/// `RootSubmitted(bytes32 indexed campaignId, bytes32 pendingRoot, uint256 effectiveTimestamp)`.
#[derive(Debug, Clone)]
pub struct RootSubmittedDecoder {
    topic: Hash32,
}

impl RootSubmittedDecoder {
    pub const EVENT_NAME: &'static str = "RootSubmitted";
    const DATA_LENGTH: usize = 2 * HASH_LENGTH;

    pub fn new() -> Self {
        Self {
            topic: event_topic(ROOT_SUBMITTED_SIGNATURE),
        }
    }
}

impl Default for RootSubmittedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder for RootSubmittedDecoder {
    fn topic(&self) -> Hash32 {
        self.topic
    }

    fn decode(&self, log: &RawLog) -> Result<DecodedEvent, DecodeError> {
        let signature = *log
            .topics
            .first()
            .ok_or(DecodeError::MissingTopic { index: 0 })?;
        if signature != self.topic {
            return Err(DecodeError::UnexpectedTopic {
                expected: self.topic,
                actual: signature,
            });
        }
        let campaign_id = *log
            .topics
            .get(1)
            .ok_or(DecodeError::MissingTopic { index: 1 })?;

        if log.data.len() != Self::DATA_LENGTH {
            return Err(DecodeError::DataLength {
                expected: Self::DATA_LENGTH,
                actual: log.data.len(),
            });
        }
        let (root_word, timestamp_word) = log.data.split_at(HASH_LENGTH);
        let mut pending_root = [0u8; HASH_LENGTH];
        pending_root.copy_from_slice(root_word);
        let effective_at = timestamp_value(timestamp_word);

        Ok(DecodedEvent {
            name: Self::EVENT_NAME,
            summary: "A new root has been submitted",
            indexed: vec![EventField::new(
                "campaign_id",
                "Campaign ID",
                FieldValue::Bytes32(campaign_id),
            )],
            payload: vec![
                EventField::new(
                    "pending_root",
                    "Pending Root",
                    FieldValue::Bytes32(Hash32::from_bytes(pending_root)),
                ),
                EventField::new(
                    "effective_timestamp",
                    "Effective Timestamp",
                    effective_at,
                ),
            ],
        })
    }
}

/// Reads a big-endian `uint256` word as unix seconds. Words outside the
/// timestamp range (e.g. a `type(uint256).max` sentinel) keep their raw value.
fn timestamp_value(word: &[u8]) -> FieldValue {
    let mut raw = [0u8; HASH_LENGTH];
    raw.copy_from_slice(word);
    let (high, low) = raw.split_at(HASH_LENGTH - 8);
    if high.iter().all(|byte| *byte == 0) {
        let mut seconds = [0u8; 8];
        seconds.copy_from_slice(low);
        let at = i64::try_from(u64::from_be_bytes(seconds))
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        if let Some(at) = at {
            return FieldValue::Timestamp(at);
        }
    }
    FieldValue::Uint256(raw)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chain_watch_domain::model::Address;

    pub(crate) fn root_submitted_log(block: u64, log_index: u64, effective_at: u64) -> RawLog {
        let mut data = vec![0x22; HASH_LENGTH];
        let mut word = [0u8; HASH_LENGTH];
        word[HASH_LENGTH - 8..].copy_from_slice(&effective_at.to_be_bytes());
        data.extend_from_slice(&word);
        RawLog {
            address: Address::from_bytes([0xaa; 20]),
            topics: vec![
                event_topic(ROOT_SUBMITTED_SIGNATURE),
                Hash32::from_bytes([0x11; 32]),
            ],
            data,
            block_number: block,
            transaction_hash: Hash32::from_bytes([block as u8; 32]),
            log_index,
        }
    }

    #[test]
    fn topic_matches_known_keccak_vector() {
        assert_eq!(
            event_topic("Transfer(address,address,uint256)").to_hex(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn decodes_root_submitted() {
        let decoder = RootSubmittedDecoder::new();
        let event = decoder
            .decode(&root_submitted_log(120, 0, 1_700_000_000))
            .expect("decodes");

        assert_eq!(event.name, "RootSubmitted");
        assert_eq!(
            event.indexed[0].value,
            FieldValue::Bytes32(Hash32::from_bytes([0x11; 32]))
        );
        assert_eq!(event.payload[0].label, "Pending Root");
        assert_eq!(
            event.payload[0].value,
            FieldValue::Bytes32(Hash32::from_bytes([0x22; 32]))
        );
        assert_eq!(
            event.payload[1].value,
            FieldValue::Timestamp(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
        );
        assert_eq!(
            event.payload[1].value.to_string(),
            "2023-11-14 22:13:20 UTC"
        );
    }

    #[test]
    fn rejects_short_data() {
        let mut log = root_submitted_log(1, 0, 5);
        log.data.truncate(40);
        assert_eq!(
            RootSubmittedDecoder::new().decode(&log),
            Err(DecodeError::DataLength {
                expected: 64,
                actual: 40
            })
        );
    }

    #[test]
    fn rejects_missing_indexed_topic() {
        let mut log = root_submitted_log(1, 0, 5);
        log.topics.truncate(1);
        assert_eq!(
            RootSubmittedDecoder::new().decode(&log),
            Err(DecodeError::MissingTopic { index: 1 })
        );
    }

    #[test]
    fn rejects_foreign_event() {
        let mut log = root_submitted_log(1, 0, 5);
        log.topics[0] = event_topic("Transfer(address,address,uint256)");
        assert!(matches!(
            RootSubmittedDecoder::new().decode(&log),
            Err(DecodeError::UnexpectedTopic { .. })
        ));
    }

    #[test]
    fn keeps_raw_word_for_timestamps_beyond_range() {
        let decoder = RootSubmittedDecoder::new();

        let mut log = root_submitted_log(1, 0, 0);
        log.data[HASH_LENGTH..].fill(0xff);
        let event = decoder.decode(&log).expect("sentinel still decodes");
        assert_eq!(event.payload[1].name, "effective_timestamp");
        assert_eq!(event.payload[1].value, FieldValue::Uint256([0xff; HASH_LENGTH]));

        let event = decoder
            .decode(&root_submitted_log(1, 0, u64::MAX))
            .expect("u64::MAX still decodes");
        let mut expected = [0u8; HASH_LENGTH];
        expected[HASH_LENGTH - 8..].fill(0xff);
        assert_eq!(event.payload[1].value, FieldValue::Uint256(expected));
    }
}
