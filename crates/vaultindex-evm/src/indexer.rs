//! The sync orchestrator.
//!
//! One pass per chain: read the checkpoint, plan `[from, head]`, fetch a
//! [`DomainBatch`] from the [`DomainSource`], then `commit_range`. Passes
//! for different chains run concurrently; a second pass for a chain that is
//! already syncing is rejected as [`ChainSyncOutcome::Busy`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use tracing::{debug, info, warn};

use vaultindex_core::checkpoint::{plan_range, CheckpointUpdate, GLOBAL_SCAN_SUBJECT};
use vaultindex_core::error::IndexerError;
use vaultindex_core::indexer::{ChainSyncOutcome, ChainSyncState, SyncReport};
use vaultindex_core::storage::Storage;

use crate::runtime::ChainRuntime;
use crate::source::DomainSource;

type StateMap = Mutex<HashMap<u64, ChainSyncState>>;

pub struct Indexer {
    runtimes: BTreeMap<u64, Arc<ChainRuntime>>,
    storage: Arc<dyn Storage>,
    source: Arc<dyn DomainSource>,
    states: StateMap,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("runtimes", &self.runtimes)
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

impl Indexer {
    pub fn new(runtimes: Vec<ChainRuntime>, storage: Arc<dyn Storage>, source: Arc<dyn DomainSource>) -> Self {
        let runtimes = runtimes
            .into_iter()
            .map(|rt| (rt.chain_id(), Arc::new(rt)))
            .collect();
        Self {
            runtimes,
            storage,
            source,
            states: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Configured chain ids, ascending.
    pub fn chain_ids(&self) -> Vec<u64> {
        self.runtimes.keys().copied().collect()
    }

    pub fn runtime(&self, chain_id: u64) -> Option<&ChainRuntime> {
        self.runtimes.get(&chain_id).map(Arc::as_ref)
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn state(&self, chain_id: u64) -> ChainSyncState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chain_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Run one pass for every chain concurrently. Never fails: per-chain
    /// errors are logged and recorded in the report.
    pub async fn sync_all(&self) -> SyncReport {
        if self.is_shut_down() {
            warn!("sync_all called after shutdown; nothing to do");
            return SyncReport::default();
        }

        let runtimes: Vec<Arc<ChainRuntime>> = self.runtimes.values().cloned().collect();
        let passes = runtimes.iter().map(|rt| async move {
            let chain_id = rt.chain_id();
            (chain_id, self.sync_runtime(rt).await)
        });
        let chains = join_all(passes).await;

        for (chain_id, result) in &chains {
            if let Err(e) = result {
                warn!(chain_id, error = %e, "chain sync failed");
            }
        }
        let report = SyncReport { chains };
        debug!(
            chains = report.chains.len(),
            advanced = report.advanced().len(),
            failed = report.failed().len(),
            "sync_all finished"
        );
        report
    }

    /// Run one pass for a single chain.
    pub async fn sync_chain(&self, chain_id: u64) -> Result<ChainSyncOutcome, IndexerError> {
        if self.is_shut_down() {
            return Err(IndexerError::Other("indexer has been shut down".into()));
        }
        let runtime = self
            .runtimes
            .get(&chain_id)
            .ok_or_else(|| IndexerError::Other(format!("chain {chain_id} is not configured")))?;
        self.sync_runtime(runtime).await
    }

    async fn sync_runtime(&self, runtime: &ChainRuntime) -> Result<ChainSyncOutcome, IndexerError> {
        let chain_id = runtime.chain_id();
        let Some(_token) = SyncToken::acquire(&self.states, chain_id) else {
            debug!(chain_id, "pass already running");
            return Ok(ChainSyncOutcome::Busy);
        };
        self.run_pass(runtime)
            .await
            .map_err(|e| e.into_chain_sync(chain_id))
    }

    async fn run_pass(&self, runtime: &ChainRuntime) -> Result<ChainSyncOutcome, IndexerError> {
        let chain_id = runtime.chain_id();
        let checkpoint = self.storage.get_checkpoint(chain_id, GLOBAL_SCAN_SUBJECT).await?;
        let head = runtime.get_latest_block_number().await?;

        let Some(range) = plan_range(checkpoint.as_ref(), runtime.start_block, head) else {
            let from = checkpoint
                .map(|cp| cp.last_processed_block.saturating_add(1))
                .unwrap_or(runtime.start_block);
            debug!(chain_id, from, head, "nothing to sync");
            return Ok(ChainSyncOutcome::Skipped { from, head });
        };

        let batch = self.source.fetch(runtime, range).await?;
        let rows = batch.len();
        let update = CheckpointUpdate::new(chain_id, GLOBAL_SCAN_SUBJECT, range.to);
        self.storage.commit_range(&batch, &update).await?;

        info!(chain_id, from = range.from, to = range.to, rows, "chain synced");
        Ok(ChainSyncOutcome::Synced { range, rows })
    }

    /// Close storage. Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("shutdown already done");
            return;
        }
        self.storage.close().await;
        info!(chains = self.runtimes.len(), "indexer shut down");
    }
}

/// Holds a chain in `Syncing` until dropped, including on error paths.
struct SyncToken<'a> {
    states: &'a StateMap,
    chain_id: u64,
}

impl<'a> SyncToken<'a> {
    fn acquire(states: &'a StateMap, chain_id: u64) -> Option<Self> {
        let mut map = states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = map.entry(chain_id).or_default();
        if *state == ChainSyncState::Syncing {
            return None;
        }
        *state = ChainSyncState::Syncing;
        Some(Self { states, chain_id })
    }
}

impl Drop for SyncToken<'_> {
    fn drop(&mut self) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.chain_id, ChainSyncState::Idle);
    }
}
