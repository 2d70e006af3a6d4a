//! Data structures shared by the storage backends and the network scanners.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hex::encode as hex_encode;
use thiserror::Error;

/// Length in bytes of block/transaction hashes and 32-byte ABI words.
pub const HASH_LENGTH: usize = 32;

/// Length in bytes of an EVM account address.
pub const ADDRESS_LENGTH: usize = 20;

/// Errors emitted when hex-encoded hashes or addresses fail validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HexFormatError {
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("value contains non-hex characters")]
    NonHex,
}

/// Decodes an optionally `0x`-prefixed hex string.
pub fn decode_hex(value: &str) -> Result<Vec<u8>, HexFormatError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|_| HexFormatError::NonHex)
}

fn fixed_bytes<const N: usize>(value: &str) -> Result<[u8; N], HexFormatError> {
    let bytes = decode_hex(value)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| HexFormatError::WrongLength {
        expected: N,
        actual: bytes.len(),
    })
}

/// A 32-byte word: block hashes, transaction hashes, topics, `bytes32` values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; HASH_LENGTH]);

impl Hash32 {
    pub const fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn parse(value: &str) -> Result<Self, HexFormatError> {
        fixed_bytes(value).map(Self)
    }

    /// Copies a word out of an ABI-encoded slice, which must be exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, HexFormatError> {
        <[u8; HASH_LENGTH]>::try_from(slice)
            .map(Self)
            .map_err(|_| HexFormatError::WrongLength {
                expected: HASH_LENGTH,
                actual: slice.len(),
            })
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex_encode(self.0))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub const ZERO: Self = Self([0; ADDRESS_LENGTH]);

    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn parse(value: &str) -> Result<Self, HexFormatError> {
        fixed_bytes(value).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex_encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("network name must not be empty")]
    EmptyName,
    #[error("batch size for `{network}` must be greater than zero")]
    ZeroBatchSize { network: String },
    #[error("poll interval for `{network}` must be greater than zero")]
    ZeroPollInterval { network: String },
}

/// Immutable per-run description of one watched network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTarget {
    name: String,
    chain_id: u64,
    rpc_endpoint: String,
    contract_address: Address,
    configured_start_block: Option<u64>,
    batch_size: u64,
    poll_interval: Duration,
}

impl NetworkTarget {
    pub fn new(
        name: impl Into<String>,
        chain_id: u64,
        rpc_endpoint: impl Into<String>,
        contract_address: Address,
        batch_size: u64,
        poll_interval: Duration,
    ) -> Result<Self, TargetError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TargetError::EmptyName);
        }
        if batch_size == 0 {
            return Err(TargetError::ZeroBatchSize { network: name });
        }
        if poll_interval.is_zero() {
            return Err(TargetError::ZeroPollInterval { network: name });
        }

        Ok(Self {
            name,
            chain_id,
            rpc_endpoint: rpc_endpoint.into(),
            contract_address,
            configured_start_block: None,
            batch_size,
            poll_interval,
        })
    }

    /// Sets the configured start block. Zero means "not configured".
    pub fn with_start_block(mut self, block: Option<u64>) -> Self {
        self.configured_start_block = block.filter(|block| *block > 0);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn rpc_endpoint(&self) -> &str {
        &self.rpc_endpoint
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub fn configured_start_block(&self) -> Option<u64> {
        self.configured_start_block
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Last fully processed block for a network, as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub network_name: String,
    pub chain_id: u64,
    pub last_processed_block: u64,
    pub updated_at: DateTime<Utc>,
}

/// Inclusive block range queried in one scanner tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanWindow {
    pub network_name: String,
    pub from_block: u64,
    pub to_block: u64,
}

impl ScanWindow {
    pub fn block_count(&self) -> u64 {
        self.to_block - self.from_block + 1
    }
}

/// Log entry as returned by the RPC collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<Hash32>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub transaction_hash: Hash32,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bytes32(Hash32),
    Address(Address),
    Uint(u128),
    /// Big-endian `uint256` word shown as hex when it has no narrower reading.
    Uint256([u8; HASH_LENGTH]),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes32(word) => write!(f, "{word}"),
            Self::Address(address) => write!(f, "{address}"),
            Self::Uint(value) => write!(f, "{value}"),
            Self::Uint256(word) => write!(f, "0x{}", hex_encode(word)),
            Self::Timestamp(at) => f.write_str(&format_utc(at)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventField {
    /// ABI parameter name.
    pub name: &'static str,
    /// Operator-facing title used in alerts.
    pub label: &'static str,
    pub value: FieldValue,
}

impl EventField {
    pub fn new(name: &'static str, label: &'static str, value: FieldValue) -> Self {
        Self { name, label, value }
    }
}

/// Decoder output before the scanner attaches block context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub name: &'static str,
    /// One-line description used as the alert text, e.g. "A new root has been submitted".
    pub summary: &'static str,
    pub indexed: Vec<EventField>,
    pub payload: Vec<EventField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    /// Taken from the header of the block that emitted the log.
    Block,
    /// The block could not be fetched; local time at decode.
    WallClock,
}

/// One matched on-chain event, ready for the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub network: Arc<NetworkTarget>,
    pub event: DecodedEvent,
    pub block_number: u64,
    pub transaction_hash: Hash32,
    pub log_index: u64,
    pub block_timestamp: DateTime<Utc>,
    pub timestamp_source: TimestampSource,
}

impl EventRecord {
    pub fn fields(&self) -> impl Iterator<Item = &EventField> {
        self.event.indexed.iter().chain(self.event.payload.iter())
    }

    pub fn timestamp_is_fallback(&self) -> bool {
        self.timestamp_source == TimestampSource::WallClock
    }
}

/// Result of pushing one log through decode and notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Notified,
    DecodeFailed,
    NotifyFailed,
}

impl AlertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notified => "notified",
            Self::DecodeFailed => "decode_failed",
            Self::NotifyFailed => "notify_failed",
        }
    }
}

/// Human-readable UTC timestamp used in the ledger and in alerts.
pub const UTC_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn format_utc(at: &DateTime<Utc>) -> String {
    at.format(UTC_DISPLAY_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_uint_renders_as_full_hex_word() {
        let value = FieldValue::Uint256([0xff; HASH_LENGTH]);
        assert_eq!(value.to_string(), format!("0x{}", "ff".repeat(32)));
    }

    #[test]
    fn hash_parse_accepts_prefixed_and_bare_hex() {
        let prefixed = Hash32::parse(&format!("0x{}", "ab".repeat(32))).expect("parses");
        let bare = Hash32::parse(&"AB".repeat(32)).expect("parses");
        assert_eq!(prefixed, bare);
        assert_eq!(prefixed.to_hex(), format!("0x{}", "ab".repeat(32)));
    }

    #[test]
    fn address_parse_rejects_bad_input() {
        assert_eq!(
            Address::parse("0x1234"),
            Err(HexFormatError::WrongLength {
                expected: ADDRESS_LENGTH,
                actual: 2
            })
        );
        assert_eq!(
            Address::parse(&format!("0x{}", "zz".repeat(20))),
            Err(HexFormatError::NonHex)
        );
        assert!(Address::parse(&format!("0x{}", "00".repeat(20)))
            .unwrap()
            .is_zero());
    }

    #[test]
    fn target_rejects_zero_batch_and_interval() {
        let err = NetworkTarget::new(
            "eth",
            1,
            "http://localhost:8545",
            Address::ZERO,
            0,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert_eq!(
            err,
            TargetError::ZeroBatchSize {
                network: "eth".into()
            }
        );

        let err = NetworkTarget::new(
            "eth",
            1,
            "http://localhost:8545",
            Address::ZERO,
            10,
            Duration::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, TargetError::ZeroPollInterval { .. }));
    }

    #[test]
    fn zero_start_block_means_unset() {
        let target = NetworkTarget::new(
            "eth",
            1,
            "http://localhost:8545",
            Address::ZERO,
            10,
            Duration::from_secs(1),
        )
        .unwrap()
        .with_start_block(Some(0));
        assert_eq!(target.configured_start_block(), None);
    }

    #[test]
    fn window_counts_inclusive_blocks() {
        let window = ScanWindow {
            network_name: "eth".into(),
            from_block: 101,
            to_block: 150,
        };
        assert_eq!(window.block_count(), 50);
    }
}
