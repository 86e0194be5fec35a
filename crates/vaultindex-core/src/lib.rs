//! vaultindex-core: foundation for the multi-chain vault/position mirror.
//!
//! # Architecture
//!
//! ```text
//! IndexerFactory → Indexer
//!                    ├── ChainRuntime × N   (RPC + start block, one per chain)
//!                    ├── plan_range         (checkpoint → next block range)
//!                    ├── DomainSource       (block range → DomainBatch)
//!                    └── Storage            (idempotent upserts + checkpoints)
//! ```
//!
//! This crate holds everything chain- and backend-agnostic: the row types and
//! their upsert policies, the [`Storage`] trait, configuration, and the pure
//! helpers (start-block resolution, range planning, connection strings).

pub mod checkpoint;
pub mod config;
pub mod connection;
pub mod error;
pub mod indexer;
pub mod record;
pub mod start_block;
pub mod storage;
pub mod types;

pub use checkpoint::{plan_range, BlockRange, Checkpoint, CheckpointUpdate, GLOBAL_SCAN_SUBJECT};
pub use config::{DbConfig, FactoryConfig, RpcEndpoints, SyncOptions};
pub use connection::{build_connection_string, redacted_connection_string};
pub use error::IndexerError;
pub use indexer::{ChainSyncOutcome, ChainSyncState, SyncReport};
pub use record::{ConflictAction, Record};
pub use start_block::{resolve_start_block, ConfiguredStartBlock, DEFAULT_START_BLOCK};
pub use storage::{Storage, DEFAULT_POSITION_LIMIT};
pub use types::{
    normalize_address, ChainMeta, DomainBatch, EventRow, PositionRow, PositionStatus, PriceRow,
    VaultRow,
};
