//! Per-chain runtime: chain metadata, an RPC transport and a start block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use vaultindex_core::checkpoint::BlockRange;
use vaultindex_core::config::SyncOptions;
use vaultindex_core::error::IndexerError;
use vaultindex_core::types::ChainMeta;

use crate::fetcher::{block_from_json, parse_hex_u64, to_hex, BlockHeader, RawLog};
use crate::rpc::{call_rpc, FallbackTransport, HttpTransport, RpcTransport};

pub struct ChainRuntime {
    pub chain: ChainMeta,
    pub start_block: u64,
    rpc: Arc<dyn RpcTransport>,
    log_batch_size: u64,
    next_id: AtomicU64,
}

impl ChainRuntime {
    /// Build from RPC URLs: one URL gets a plain HTTP transport, several get
    /// an ordered fallback.
    pub fn from_urls(
        chain: ChainMeta,
        urls: &[String],
        start_block: u64,
        sync: &SyncOptions,
    ) -> Result<Self, IndexerError> {
        let timeout = Duration::from_secs(sync.request_timeout_secs);
        let mut endpoints: Vec<Arc<dyn RpcTransport>> = Vec::with_capacity(urls.len());
        for url in urls {
            endpoints.push(Arc::new(HttpTransport::new(url.as_str(), timeout)?));
        }
        let rpc: Arc<dyn RpcTransport> = match endpoints.len() {
            0 => return Err(IndexerError::MissingRpcUrl { chain_id: chain.id }),
            1 => endpoints.remove(0),
            _ => Arc::new(FallbackTransport::new(endpoints)),
        };
        Ok(Self::with_transport(chain, rpc, start_block).log_batch_size(sync.log_batch_size))
    }

    pub fn with_transport(chain: ChainMeta, rpc: Arc<dyn RpcTransport>, start_block: u64) -> Self {
        Self {
            chain,
            start_block,
            rpc,
            log_batch_size: SyncOptions::default().log_batch_size,
            next_id: AtomicU64::new(1),
        }
    }

    /// Max blocks per `eth_getLogs` call (at least 1).
    pub fn log_batch_size(mut self, size: u64) -> Self {
        self.log_batch_size = size.max(1);
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.id
    }

    pub fn transport(&self) -> &dyn RpcTransport {
        self.rpc.as_ref()
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(call_rpc(self.rpc.as_ref(), id, method, params).await?)
    }

    /// Current head via `eth_blockNumber`.
    pub async fn get_latest_block_number(&self) -> Result<u64, IndexerError> {
        let hex: String = self.request("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex)
    }

    /// Header of block `number`; `None` if the node doesn't have it.
    pub async fn get_block(&self, number: u64) -> Result<Option<BlockHeader>, IndexerError> {
        let raw: Value = self
            .request("eth_getBlockByNumber", vec![json!(to_hex(number)), json!(false)])
            .await?;
        block_from_json(&raw)
    }

    /// Logs in `range` emitted by `addresses` (all logs when empty), fetched
    /// in `log_batch_size` chunks.
    pub async fn get_logs(&self, range: BlockRange, addresses: &[String]) -> Result<Vec<RawLog>, IndexerError> {
        let mut logs = Vec::new();
        for chunk in range.chunks(self.log_batch_size) {
            let mut filter = json!({
                "fromBlock": to_hex(chunk.from),
                "toBlock": to_hex(chunk.to),
            });
            if !addresses.is_empty() {
                filter["address"] = json!(addresses);
            }
            let batch: Vec<RawLog> = self.request("eth_getLogs", vec![filter]).await?;
            debug!(chain_id = self.chain.id, from = chunk.from, to = chunk.to, logs = batch.len(), "fetched logs");
            logs.extend(batch);
        }
        Ok(logs)
    }

    /// Read-only contract call at `latest`. Returns the hex-encoded return data.
    pub async fn call(&self, to: &str, data: &str) -> Result<String, IndexerError> {
        self.request("eth_call", vec![json!({ "to": to, "data": data }), json!("latest")])
            .await
    }
}

impl std::fmt::Debug for ChainRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRuntime")
            .field("chain", &self.chain)
            .field("start_block", &self.start_block)
            .field("rpc", &self.rpc.url())
            .field("log_batch_size", &self.log_batch_size)
            .finish()
    }
}
