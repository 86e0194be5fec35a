//! The decoding seam: turns a block range into candidate rows.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::try_join_all;
use serde_json::json;
use tracing::debug;

use vaultindex_core::checkpoint::BlockRange;
use vaultindex_core::error::IndexerError;
use vaultindex_core::types::{normalize_address, DomainBatch, EventRow};

use crate::fetcher::RawLog;
use crate::runtime::ChainRuntime;

/// Produces the rows for one block range of one chain.
///
/// Implementations must be deterministic for a given range so that replaying
/// a range after a crash writes the same rows.
#[async_trait]
pub trait DomainSource: Send + Sync {
    async fn fetch(&self, runtime: &ChainRuntime, range: BlockRange) -> Result<DomainBatch, IndexerError>;
}

/// Mirrors raw logs of the chain's watched contracts as [`EventRow`]s.
///
/// Each event is named by its signature topic and carries `{topics, data}`
/// as args. Vault, position and price rows need ABI decoding and are left to
/// richer sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSource;

/// Name for logs without topics (`LOG0`).
pub const ANONYMOUS_EVENT: &str = "anonymous";

#[async_trait]
impl DomainSource for LogEventSource {
    async fn fetch(&self, runtime: &ChainRuntime, range: BlockRange) -> Result<DomainBatch, IndexerError> {
        let logs: Vec<RawLog> = runtime
            .get_logs(range, &runtime.chain.contracts)
            .await?
            .into_iter()
            .filter(|log| !log.is_removed())
            .collect();
        if logs.is_empty() {
            return Ok(DomainBatch::default());
        }

        let blocks = logs
            .iter()
            .map(RawLog::block_number_u64)
            .collect::<Result<BTreeSet<_>, _>>()?;
        let timestamps = block_timestamps(runtime, &blocks).await?;

        let chain_id = runtime.chain_id();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let block_number = log.block_number_u64()?;
            let log_index = log.log_index_u32()?;
            let ts = timestamps
                .get(&block_number)
                .copied()
                .ok_or_else(|| IndexerError::Source(format!("block {block_number} not found")))?;
            events.push(EventRow {
                id: EventRow::make_id(chain_id, &log.tx_hash, log_index),
                chain_id,
                contract: normalize_address(&log.address),
                name: log.topic0().unwrap_or(ANONYMOUS_EVENT).to_string(),
                block_number,
                tx_hash: log.tx_hash.to_ascii_lowercase(),
                log_index,
                block_hash: log.block_hash.to_ascii_lowercase(),
                ts,
                args: json!({ "topics": log.topics, "data": log.data }),
            });
        }

        debug!(chain_id, from = range.from, to = range.to, events = events.len(), blocks = blocks.len(), "decoded logs");
        Ok(DomainBatch {
            events,
            ..DomainBatch::default()
        })
    }
}

async fn block_timestamps(
    runtime: &ChainRuntime,
    blocks: &BTreeSet<u64>,
) -> Result<HashMap<u64, DateTime<Utc>>, IndexerError> {
    let headers = try_join_all(blocks.iter().map(|n| runtime.get_block(*n))).await?;
    let mut out = HashMap::with_capacity(headers.len());
    for header in headers.into_iter().flatten() {
        let ts = Utc
            .timestamp_opt(header.timestamp, 0)
            .single()
            .ok_or_else(|| IndexerError::Source(format!("block {} has invalid timestamp", header.number)))?;
        out.insert(header.number, ts);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{JsonRpcRequest, JsonRpcResponse, RpcTransport, TransportError};
    use serde_json::Value;
    use std::sync::Arc;
    use vaultindex_core::types::ChainMeta;

    struct Node;

    #[async_trait]
    impl RpcTransport for Node {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            let result = match req.method.as_str() {
                "eth_getLogs" => json!([
                    {
                        "address": "0xVAULT", "topics": ["0xDEAD", "0x01"], "data": "0x2a",
                        "blockNumber": "0x5", "blockHash": "0xB5", "transactionHash": "0xT1", "logIndex": "0x0"
                    },
                    {
                        "address": "0xvault", "topics": [], "data": "0x",
                        "blockNumber": "0x6", "blockHash": "0xb6", "transactionHash": "0xt2", "logIndex": "0x3"
                    },
                    {
                        "address": "0xvault", "topics": ["0xbeef"], "data": "0x",
                        "blockNumber": "0x6", "blockHash": "0xold", "transactionHash": "0xt3", "logIndex": "0x1",
                        "removed": true
                    }
                ]),
                "eth_getBlockByNumber" => {
                    let number = req.params[0].as_str().unwrap_or("0x0").to_string();
                    json!({ "number": number, "hash": "0xh", "timestamp": "0x6553f100" })
                }
                _ => Value::Null,
            };
            Ok(JsonRpcResponse::ok(1, result))
        }

        fn url(&self) -> &str {
            "mock://node"
        }
    }

    #[tokio::test]
    async fn mirrors_live_logs_as_events() {
        let rt = ChainRuntime::with_transport(ChainMeta::new(10, "optimism").contract("0xVault"), Arc::new(Node), 1);
        let batch = LogEventSource.fetch(&rt, BlockRange { from: 5, to: 6 }).await.unwrap();

        assert_eq!(batch.events.len(), 2);
        assert!(batch.vaults.is_empty() && batch.positions.is_empty() && batch.prices.is_empty());

        let first = &batch.events[0];
        assert_eq!(first.id, "10:0xt1:0");
        assert_eq!(first.contract, "0xvault");
        assert_eq!(first.name, "0xDEAD");
        assert_eq!(first.block_hash, "0xb5");
        assert_eq!(first.ts.timestamp(), 1_700_000_000);
        assert_eq!(first.args["topics"][1], "0x01");
        assert_eq!(first.args["data"], "0x2a");

        assert_eq!(batch.events[1].name, ANONYMOUS_EVENT);
        assert_eq!(batch.events[1].log_index, 3);
    }
}
