//! The `Storage` trait: the only path through which mirrored state changes.
//!
//! Every write is an idempotent upsert keyed by the entity's natural identity
//! (see [`crate::record`]), so any range can be replayed safely. Backends do
//! not retry; failures surface as [`IndexerError::Storage`].

use async_trait::async_trait;

use crate::checkpoint::{Checkpoint, CheckpointUpdate};
use crate::error::IndexerError;
use crate::types::{DomainBatch, EventRow, PositionRow, PriceRow, VaultRow};

/// Default row cap for position read paths.
pub const DEFAULT_POSITION_LIMIT: u32 = 50;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Load the checkpoint for `(chain_id, address)`; the address is lower-cased.
    async fn get_checkpoint(
        &self,
        chain_id: u64,
        address: &str,
    ) -> Result<Option<Checkpoint>, IndexerError>;

    /// Upsert a checkpoint. Overwrites unconditionally: monotonicity is the
    /// caller's job.
    async fn set_checkpoint(
        &self,
        chain_id: u64,
        address: &str,
        last_processed_block: u64,
    ) -> Result<(), IndexerError>;

    /// Insert events, ignoring ids already stored. Returns the number of new rows.
    async fn insert_events(&self, rows: &[EventRow]) -> Result<u64, IndexerError>;

    async fn upsert_vaults(&self, rows: &[VaultRow]) -> Result<(), IndexerError>;

    async fn upsert_positions(&self, rows: &[PositionRow]) -> Result<(), IndexerError>;

    async fn upsert_prices(&self, rows: &[PriceRow]) -> Result<(), IndexerError>;

    /// Persist a pass's rows, then advance its checkpoint.
    ///
    /// The default runs the writes in sequence with the checkpoint last, so a
    /// failure anywhere leaves the old checkpoint in place. Transactional
    /// backends override this to commit everything atomically.
    async fn commit_range(
        &self,
        batch: &DomainBatch,
        checkpoint: &CheckpointUpdate,
    ) -> Result<(), IndexerError> {
        self.upsert_vaults(&batch.vaults).await?;
        self.insert_events(&batch.events).await?;
        self.upsert_positions(&batch.positions).await?;
        self.upsert_prices(&batch.prices).await?;
        self.set_checkpoint(
            checkpoint.chain_id,
            &checkpoint.address,
            checkpoint.last_processed_block,
        )
        .await
    }

    /// A user's positions on one chain, newest first.
    async fn get_user_positions(
        &self,
        chain_id: u64,
        user: &str,
        limit: u32,
    ) -> Result<Vec<PositionRow>, IndexerError>;

    /// A user's positions in one vault, newest first.
    async fn get_vault_user_positions(
        &self,
        chain_id: u64,
        vault: &str,
        user: &str,
        limit: u32,
    ) -> Result<Vec<PositionRow>, IndexerError>;

    /// Most recent price per `(asset, source)`. An empty filter means every asset.
    async fn get_latest_prices(&self, assets: &[String]) -> Result<Vec<PriceRow>, IndexerError>;

    /// Release underlying connections. Safe to call more than once.
    async fn close(&self) {}
}
