//! Decoding of raw `eth_getLogs` / `eth_getBlockByNumber` payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vaultindex_core::error::IndexerError;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, IndexerError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u32(&self) -> Result<u32, IndexerError> {
        let index = parse_hex_u64(&self.log_index)?;
        u32::try_from(index).map_err(|_| IndexerError::Rpc(format!("log index {index} out of range")))
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// The event signature topic, if any.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }
}

/// Header fields needed to stamp rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Parse a hex quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| IndexerError::Rpc(format!("bad hex quantity '{s}': {e}")))
}

/// Encode a quantity the way nodes expect it (`0x`-prefixed, no padding).
pub fn to_hex(n: u64) -> String {
    format!("{n:#x}")
}

/// Convert an `eth_getBlockByNumber` result to a header. `None` for a null block.
pub fn block_from_json(v: &Value) -> Result<Option<BlockHeader>, IndexerError> {
    if v.is_null() {
        return Ok(None);
    }
    let field = |name: &str| {
        v[name]
            .as_str()
            .ok_or_else(|| IndexerError::Rpc(format!("block is missing '{name}'")))
    };
    let timestamp = parse_hex_u64(field("timestamp")?)?;
    Ok(Some(BlockHeader {
        number: parse_hex_u64(field("number")?)?,
        hash: field("hash")?.to_string(),
        timestamp: i64::try_from(timestamp)
            .map_err(|_| IndexerError::Rpc(format!("timestamp {timestamp} out of range")))?,
    }))
}
