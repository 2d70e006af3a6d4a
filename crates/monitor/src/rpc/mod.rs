use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chain_watch_domain::model::{Address, Hash32, RawLog};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

mod types;

pub use types::{format_quantity, parse_quantity, BlockHeader, RpcLogEntry};
use types::{log_filter_params, JsonRpcRequest, JsonRpcResponse};

/// Inclusive block range query for one contract and one event signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    pub address: Address,
    pub topic0: Hash32,
}

/// Logs returned by one `eth_getLogs` query. Entries that could not be
/// converted are counted in `malformed` and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBatch {
    pub logs: Vec<RawLog>,
    pub malformed: usize,
}

impl LogBatch {
    pub fn from_entries(entries: Vec<RpcLogEntry>) -> Self {
        let mut batch = Self::default();
        for entry in entries {
            let position = (entry.block_number.clone(), entry.log_index.clone());
            match entry.into_raw() {
                Ok(log) => batch.logs.push(log),
                Err(err) => {
                    warn!(
                        block = ?position.0,
                        log_index = ?position.1,
                        error = %err,
                        "skipping malformed log entry"
                    );
                    batch.malformed += 1;
                }
            }
        }
        batch
    }
}

impl From<Vec<RawLog>> for LogBatch {
    fn from(logs: Vec<RawLog>) -> Self {
        Self { logs, malformed: 0 }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("node returned error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("`{0}` returned an empty result")]
    EmptyResult(&'static str),
    #[error("block {0} not found")]
    BlockNotFound(u64),
    #[error("`{call}` timed out after {after:?}")]
    Timeout { call: &'static str, after: Duration },
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Read-only view of a chain, narrowed to what a scanner needs.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;
    async fn latest_block_number(&self) -> Result<u64, RpcError>;
    async fn filter_logs(&self, filter: &LogFilter) -> Result<LogBatch, RpcError>;
    async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, RpcError>;
}

/// HTTP JSON-RPC client for a single node endpoint.
#[derive(Debug)]
pub struct JsonRpcChainClient {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcChainClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("chain-watch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(endpoint, http))
    }

    pub fn with_client(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<R>(&self, method: &'static str, params: Value) -> Result<Option<R>, RpcError>
    where
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let response: JsonRpcResponse<R> = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }

    async fn call_quantity(&self, method: &'static str) -> Result<u64, RpcError> {
        let raw: String = self
            .call(method, json!([]))
            .await?
            .ok_or(RpcError::EmptyResult(method))?;
        parse_quantity(&raw)
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.call_quantity("eth_chainId").await
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        self.call_quantity("eth_blockNumber").await
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<LogBatch, RpcError> {
        let entries: Vec<RpcLogEntry> = self
            .call("eth_getLogs", log_filter_params(filter))
            .await?
            .ok_or(RpcError::EmptyResult("eth_getLogs"))?;
        Ok(LogBatch::from_entries(entries))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, RpcError> {
        let header: BlockHeader = self
            .call(
                "eth_getBlockByNumber",
                json!([format_quantity(block_number), false]),
            )
            .await?
            .ok_or(RpcError::BlockNotFound(block_number))?;
        let seconds = parse_quantity(&header.timestamp)?;
        i64::try_from(seconds)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| {
                RpcError::InvalidResponse(format!("block timestamp {seconds} out of range"))
            })
    }
}
