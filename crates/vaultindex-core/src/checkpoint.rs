//! Checkpoints and block-range planning.
//!
//! A checkpoint stores the last block whose rows are durably persisted for a
//! `(chain, scan subject)` pair. On restart the indexer resumes from
//! `last_processed_block + 1`; a missing checkpoint means "start from the
//! configured start block".

use serde::{Deserialize, Serialize};

use crate::types::normalize_address;

/// Scan subject used when a pass covers the whole chain rather than one contract.
pub const GLOBAL_SCAN_SUBJECT: &str = "0x0000000000000000000000000000000000000000";

/// A persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub chain_id: u64,
    /// Lower-cased contract address or [`GLOBAL_SCAN_SUBJECT`].
    pub address: String,
    /// Last block whose rows are persisted.
    pub last_processed_block: u64,
    /// Unix timestamp of the last write.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn new(chain_id: u64, address: &str, last_processed_block: u64) -> Self {
        Self {
            chain_id,
            address: normalize_address(address),
            last_processed_block,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// The checkpoint a pass commits once its rows are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointUpdate {
    pub chain_id: u64,
    pub address: String,
    pub last_processed_block: u64,
}

impl CheckpointUpdate {
    pub fn new(chain_id: u64, address: &str, last_processed_block: u64) -> Self {
        Self {
            chain_id,
            address: normalize_address(address),
            last_processed_block,
        }
    }
}

/// An inclusive block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// Number of blocks covered.
    pub fn block_count(&self) -> u64 {
        self.to - self.from + 1
    }

    /// Split into consecutive sub-ranges of at most `size` blocks.
    pub fn chunks(&self, size: u64) -> impl Iterator<Item = BlockRange> {
        let size = size.max(1);
        let to = self.to;
        let mut next = Some(self.from);
        std::iter::from_fn(move || {
            let start = next?;
            let end = start.saturating_add(size - 1).min(to);
            next = if end >= to { None } else { Some(end + 1) };
            Some(BlockRange { from: start, to: end })
        })
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Compute the range for the next pass.
///
/// Returns `None` when there is nothing new: the checkpoint already sits at
/// the head, or the start block is ahead of the head.
pub fn plan_range(checkpoint: Option<&Checkpoint>, start_block: u64, head: u64) -> Option<BlockRange> {
    let from = match checkpoint {
        Some(cp) => cp.last_processed_block.checked_add(1)?,
        None => start_block,
    };
    (from <= head).then_some(BlockRange { from, to: head })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumes_after_checkpoint() {
        let cp = Checkpoint::new(1, GLOBAL_SCAN_SUBJECT, 100);
        assert_eq!(plan_range(Some(&cp), 5, 150), Some(BlockRange { from: 101, to: 150 }));
    }

    #[test]
    fn starts_at_start_block_without_checkpoint() {
        assert_eq!(plan_range(None, 0, 10), Some(BlockRange { from: 0, to: 10 }));
    }

    #[test]
    fn skip_when_caught_up() {
        let cp = Checkpoint::new(1, GLOBAL_SCAN_SUBJECT, 150);
        assert_eq!(plan_range(Some(&cp), 0, 150), None);
        // start block ahead of the head
        assert_eq!(plan_range(None, 200, 150), None);
    }

    #[test]
    fn single_block_range() {
        let cp = Checkpoint::new(1, GLOBAL_SCAN_SUBJECT, 149);
        let range = plan_range(Some(&cp), 0, 150).unwrap();
        assert_eq!(range.block_count(), 1);
    }

    #[test]
    fn checkpoint_address_is_normalized() {
        let cp = Checkpoint::new(1, "0xABCDEF", 1);
        assert_eq!(cp.address, "0xabcdef");
    }

    #[test]
    fn chunks_cover_range_exactly() {
        let range = BlockRange { from: 10, to: 34 };
        let chunks: Vec<_> = range.chunks(10).collect();
        assert_eq!(
            chunks,
            vec![
                BlockRange { from: 10, to: 19 },
                BlockRange { from: 20, to: 29 },
                BlockRange { from: 30, to: 34 },
            ]
        );
        assert_eq!(BlockRange { from: 7, to: 7 }.chunks(100).count(), 1);
    }
}
