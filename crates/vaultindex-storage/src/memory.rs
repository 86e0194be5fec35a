//! In-memory storage backend.
//!
//! Applies the same conflict policies as the Postgres backend to plain maps.
//! Useful for tests and short-lived indexers that don't need persistence.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vaultindex_core::checkpoint::{Checkpoint, CheckpointUpdate};
use vaultindex_core::error::IndexerError;
use vaultindex_core::record::apply_upsert;
use vaultindex_core::storage::Storage;
use vaultindex_core::types::{
    normalize_address, DomainBatch, EventRow, PositionRow, PriceRow, VaultRow,
};

#[derive(Default)]
struct Tables {
    checkpoints: BTreeMap<(u64, String), Checkpoint>,
    vaults: BTreeMap<String, VaultRow>,
    events: BTreeMap<String, EventRow>,
    positions: BTreeMap<String, PositionRow>,
    prices: BTreeMap<(String, String, DateTime<Utc>), PriceRow>,
}

impl Tables {
    fn set_checkpoint(&mut self, chain_id: u64, address: &str, block: u64) {
        apply_upsert(&mut self.checkpoints, Checkpoint::new(chain_id, address, block));
    }

    fn insert_events(&mut self, rows: &[EventRow]) -> u64 {
        rows.iter()
            .filter(|row| apply_upsert(&mut self.events, (*row).clone()))
            .count() as u64
    }

    fn apply_batch(&mut self, batch: &DomainBatch) {
        for row in &batch.vaults {
            apply_upsert(&mut self.vaults, row.clone());
        }
        self.insert_events(&batch.events);
        for row in &batch.positions {
            apply_upsert(&mut self.positions, row.clone());
        }
        for row in &batch.prices {
            apply_upsert(&mut self.prices, row.clone());
        }
    }
}

/// Every mirrored row except checkpoints, in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnapshot {
    pub vaults: Vec<VaultRow>,
    pub events: Vec<EventRow>,
    pub positions: Vec<PositionRow>,
    pub prices: Vec<PriceRow>,
}

/// In-memory indexer storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
    writes: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of write calls received (including no-op ones).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Total number of stored events.
    pub fn event_count(&self) -> usize {
        self.tables().events.len()
    }

    /// Last processed block for `(chain_id, address)`, if any.
    pub fn checkpoint_block(&self, chain_id: u64, address: &str) -> Option<u64> {
        self.tables()
            .checkpoints
            .get(&(chain_id, normalize_address(address)))
            .map(|cp| cp.last_processed_block)
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        let t = self.tables();
        MemorySnapshot {
            vaults: t.vaults.values().cloned().collect(),
            events: t.events.values().cloned().collect(),
            positions: t.positions.values().cloned().collect(),
            prices: t.prices.values().cloned().collect(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn positions_where(
        &self,
        limit: u32,
        keep: impl Fn(&PositionRow) -> bool,
    ) -> Vec<PositionRow> {
        let mut rows: Vec<PositionRow> = self
            .tables()
            .positions
            .values()
            .filter(|p| keep(p))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        rows.truncate(limit as usize);
        rows
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_checkpoint(
        &self,
        chain_id: u64,
        address: &str,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self
            .tables()
            .checkpoints
            .get(&(chain_id, normalize_address(address)))
            .cloned())
    }

    async fn set_checkpoint(
        &self,
        chain_id: u64,
        address: &str,
        last_processed_block: u64,
    ) -> Result<(), IndexerError> {
        self.count_write();
        self.tables().set_checkpoint(chain_id, address, last_processed_block);
        Ok(())
    }

    async fn insert_events(&self, rows: &[EventRow]) -> Result<u64, IndexerError> {
        self.count_write();
        Ok(self.tables().insert_events(rows))
    }

    async fn upsert_vaults(&self, rows: &[VaultRow]) -> Result<(), IndexerError> {
        self.count_write();
        let mut t = self.tables();
        for row in rows {
            apply_upsert(&mut t.vaults, row.clone());
        }
        Ok(())
    }

    async fn upsert_positions(&self, rows: &[PositionRow]) -> Result<(), IndexerError> {
        self.count_write();
        let mut t = self.tables();
        for row in rows {
            apply_upsert(&mut t.positions, row.clone());
        }
        Ok(())
    }

    async fn upsert_prices(&self, rows: &[PriceRow]) -> Result<(), IndexerError> {
        self.count_write();
        let mut t = self.tables();
        for row in rows {
            apply_upsert(&mut t.prices, row.clone());
        }
        Ok(())
    }

    /// Applies the batch and the checkpoint under one lock.
    async fn commit_range(
        &self,
        batch: &DomainBatch,
        checkpoint: &CheckpointUpdate,
    ) -> Result<(), IndexerError> {
        self.count_write();
        let mut t = self.tables();
        t.apply_batch(batch);
        t.set_checkpoint(
            checkpoint.chain_id,
            &checkpoint.address,
            checkpoint.last_processed_block,
        );
        Ok(())
    }

    async fn get_user_positions(
        &self,
        chain_id: u64,
        user: &str,
        limit: u32,
    ) -> Result<Vec<PositionRow>, IndexerError> {
        let user = normalize_address(user);
        Ok(self.positions_where(limit, |p| p.chain_id == chain_id && p.user == user))
    }

    async fn get_vault_user_positions(
        &self,
        chain_id: u64,
        vault: &str,
        user: &str,
        limit: u32,
    ) -> Result<Vec<PositionRow>, IndexerError> {
        let vault = normalize_address(vault);
        let user = normalize_address(user);
        Ok(self.positions_where(limit, |p| {
            p.chain_id == chain_id && p.vault == vault && p.user == user
        }))
    }

    async fn get_latest_prices(&self, assets: &[String]) -> Result<Vec<PriceRow>, IndexerError> {
        let wanted: Vec<String> = assets.iter().map(|a| normalize_address(a)).collect();
        let mut latest: BTreeMap<(String, String), PriceRow> = BTreeMap::new();
        // keys iterate in (asset, source, ts_minute) order, so the last write per pair wins
        for row in self.tables().prices.values() {
            if wanted.is_empty() || wanted.contains(&row.asset) {
                latest.insert((row.asset.clone(), row.source.clone()), row.clone());
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use vaultindex_core::types::PositionStatus;
    use vaultindex_core::GLOBAL_SCAN_SUBJECT;

    fn event(tx: &str, log_index: u32) -> EventRow {
        EventRow {
            id: EventRow::make_id(1, tx, log_index),
            chain_id: 1,
            contract: "0xC0FFEE".into(),
            name: "Deposit".into(),
            block_number: 100,
            tx_hash: tx.into(),
            log_index,
            block_hash: "0xb".into(),
            ts: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            args: serde_json::json!({ "amount": "5" }),
        }
    }

    fn position(user: &str, strategy: &str, opened: i64) -> PositionRow {
        PositionRow {
            id: PositionRow::make_id(1, "0xvault", user, strategy),
            chain_id: 1,
            vault: "0xVault".into(),
            user: user.into(),
            strategy_id: strategy.into(),
            asset: "0xasset".into(),
            asset_decimals: 6,
            status: PositionStatus::Open,
            opened_at: Utc.timestamp_opt(opened, 0).unwrap(),
            closed_at: None,
            amount_in_raw: Some("100".into()),
            amount_out_raw: None,
            close_tx: None,
            close_price_usd: None,
            pnl_usd: None,
        }
    }

    #[tokio::test]
    async fn checkpoint_roundtrip_is_case_insensitive() {
        let store = InMemoryStorage::new();
        assert!(store.get_checkpoint(1, "0xABC").await.unwrap().is_none());

        store.set_checkpoint(1, "0xABC", 1000).await.unwrap();
        let cp = store.get_checkpoint(1, "0xabc").await.unwrap().unwrap();
        assert_eq!(cp.last_processed_block, 1000);
        assert_eq!(cp.address, "0xabc");

        // unconditional overwrite, even backwards
        store.set_checkpoint(1, "0xabc", 900).await.unwrap();
        assert_eq!(store.checkpoint_block(1, "0xABC"), Some(900));
    }

    #[tokio::test]
    async fn duplicate_events_are_dropped() {
        let store = InMemoryStorage::new();
        assert_eq!(store.insert_events(&[]).await.unwrap(), 0);
        assert_eq!(store.insert_events(&[event("0x1", 0), event("0x1", 1)]).await.unwrap(), 2);
        assert_eq!(store.insert_events(&[event("0x1", 1), event("0x2", 0)]).await.unwrap(), 1);
        assert_eq!(store.event_count(), 3);
    }

    #[tokio::test]
    async fn user_positions_newest_first_with_limit() {
        let store = InMemoryStorage::new();
        store
            .upsert_positions(&[
                position("0xUSER", "1", 100),
                position("0xuser", "2", 300),
                position("0xuser", "3", 200),
                position("0xother", "1", 400),
            ])
            .await
            .unwrap();

        let rows = store.get_user_positions(1, "0xUser", 2).await.unwrap();
        let strategies: Vec<_> = rows.iter().map(|p| p.strategy_id.as_str()).collect();
        assert_eq!(strategies, vec!["2", "3"]);

        let in_vault = store
            .get_vault_user_positions(1, "0xVAULT", "0xuser", 50)
            .await
            .unwrap();
        assert_eq!(in_vault.len(), 3);
        assert!(store.get_user_positions(2, "0xuser", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_price_per_asset_and_source() {
        let store = InMemoryStorage::new();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        store
            .upsert_prices(&[
                PriceRow::new("0xA", "chainlink", t0, "1.00"),
                PriceRow::new("0xA", "chainlink", t0 + Duration::minutes(5), "1.05"),
                PriceRow::new("0xA", "pyth", t0, "0.99"),
                PriceRow::new("0xB", "chainlink", t0, "2500"),
            ])
            .await
            .unwrap();

        let all = store.get_latest_prices(&[]).await.unwrap();
        assert_eq!(all.len(), 3);

        let a = store.get_latest_prices(&["0xa".to_string()]).await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].source, "chainlink");
        assert_eq!(a[0].price_usd, "1.05");
    }

    #[tokio::test]
    async fn commit_range_is_atomic_and_counted_once() {
        let store = InMemoryStorage::new();
        let batch = DomainBatch {
            events: vec![event("0x9", 0)],
            ..Default::default()
        };
        let update = CheckpointUpdate::new(1, GLOBAL_SCAN_SUBJECT, 120);
        store.commit_range(&batch, &update).await.unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.checkpoint_block(1, GLOBAL_SCAN_SUBJECT), Some(120));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = InMemoryStorage::new();
        store.close().await;
        store.close().await;
        assert!(store.is_closed());
    }
}
