//! Per-chain sync state and pass outcomes.

use serde::{Deserialize, Serialize};

use crate::checkpoint::BlockRange;
use crate::error::IndexerError;

/// Scheduling token held by the orchestrator for each chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainSyncState {
    #[default]
    Idle,
    Syncing,
}

impl std::fmt::Display for ChainSyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
        }
    }
}

/// What one successful pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainSyncOutcome {
    /// Rows for `range` were persisted and the checkpoint moved to `range.to`.
    Synced { range: BlockRange, rows: usize },
    /// Nothing new: `from` is past the chain head.
    Skipped { from: u64, head: u64 },
    /// Another pass for this chain was already running.
    Busy,
}

/// Result of one `sync_all` invocation, one entry per chain.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub chains: Vec<(u64, Result<ChainSyncOutcome, IndexerError>)>,
}

impl SyncReport {
    pub fn outcome(&self, chain_id: u64) -> Option<&Result<ChainSyncOutcome, IndexerError>> {
        self.chains.iter().find(|(id, _)| *id == chain_id).map(|(_, r)| r)
    }

    /// Chain ids whose pass failed.
    pub fn failed(&self) -> Vec<u64> {
        self.chains
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Chain ids whose checkpoint advanced.
    pub fn advanced(&self) -> Vec<u64> {
        self.chains
            .iter()
            .filter(|(_, r)| matches!(r, Ok(ChainSyncOutcome::Synced { .. })))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
