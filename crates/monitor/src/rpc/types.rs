//! Wire shapes for the Ethereum JSON-RPC subset the scanner speaks.

use chain_watch_domain::model::{Address, Hash32, HexFormatError, RawLog};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::RpcError;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// Log object as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLogEntry {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
}

impl RpcLogEntry {
    /// Pending logs (no block number yet) are rejected; the scanner only
    /// queries mined ranges.
    pub fn into_raw(self) -> Result<RawLog, RpcError> {
        let malformed = |field: &'static str, err: HexFormatError| {
            RpcError::InvalidResponse(format!("log field `{field}`: {err}"))
        };

        let address = Address::parse(&self.address).map_err(|err| malformed("address", err))?;
        let topics = self
            .topics
            .iter()
            .map(|topic| Hash32::parse(topic).map_err(|err| malformed("topics", err)))
            .collect::<Result<Vec<_>, _>>()?;
        let data = if self.data.is_empty() {
            Vec::new()
        } else {
            chain_watch_domain::model::decode_hex(&self.data)
                .map_err(|err| malformed("data", err))?
        };
        let block_number = self
            .block_number
            .as_deref()
            .ok_or_else(|| RpcError::InvalidResponse("log without block number".into()))
            .and_then(parse_quantity)?;
        let transaction_hash = self
            .transaction_hash
            .as_deref()
            .ok_or_else(|| RpcError::InvalidResponse("log without transaction hash".into()))
            .and_then(|hash| {
                Hash32::parse(hash).map_err(|err| malformed("transactionHash", err))
            })?;
        let log_index = self
            .log_index
            .as_deref()
            .map(parse_quantity)
            .transpose()?
            .unwrap_or_default();

        Ok(RawLog {
            address,
            topics,
            data,
            block_number,
            transaction_hash,
            log_index,
        })
    }
}

/// Subset of the block object needed for timestamps.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub number: Option<String>,
    pub timestamp: String,
}

/// Parses a JSON-RPC hex quantity such as `0x1b4`.
pub fn parse_quantity(raw: &str) -> Result<u64, RpcError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| RpcError::InvalidResponse(format!("quantity `{raw}` lacks 0x prefix")))?;
    if digits.is_empty() {
        return Err(RpcError::InvalidResponse(format!("empty quantity `{raw}`")));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|err| RpcError::InvalidResponse(format!("quantity `{raw}`: {err}")))
}

pub fn format_quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// `eth_getLogs` params for one contract, one event topic and an inclusive
/// block range.
pub fn log_filter_params(filter: &super::LogFilter) -> Value {
    json!([{
        "fromBlock": format_quantity(filter.from_block),
        "toBlock": format_quantity(filter.to_block),
        "address": filter.address.to_hex(),
        "topics": [filter.topic0.to_hex()],
    }])
}
