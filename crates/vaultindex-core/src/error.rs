//! Error types for the vaultindex pipeline.

use thiserror::Error;

/// Errors that can occur while building or running the indexer.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("invalid configuration: {}", .0.join("; "))]
    ConfigValidation(Vec<String>),

    #[error("no RPC URL configured for chain {chain_id}")]
    MissingRpcUrl { chain_id: u64 },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("sync of chain {chain_id} failed: {reason}")]
    ChainSync { chain_id: u64, reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Shorthand for a single-violation configuration error.
    pub fn config(violation: impl Into<String>) -> Self {
        Self::ConfigValidation(vec![violation.into()])
    }

    /// Returns `true` for errors that abort indexer construction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigValidation(_) | Self::MissingRpcUrl { .. })
    }

    /// Wrap a failure raised inside one chain's pass.
    pub fn into_chain_sync(self, chain_id: u64) -> Self {
        match self {
            e @ Self::ChainSync { .. } => e,
            other => Self::ChainSync {
                chain_id,
                reason: other.to_string(),
            },
        }
    }
}
