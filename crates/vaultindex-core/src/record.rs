//! Upsert policies, one per persisted entity.
//!
//! Each row type declares its table, its natural key, and what happens when an
//! incoming row collides with a stored one. Storage backends read these
//! policies instead of deciding conflict behavior at the call site:
//! [`conflict_clause`] renders them as SQL, [`apply_upsert`] applies them to
//! an in-memory map.

use std::collections::BTreeMap;

use crate::checkpoint::Checkpoint;
use crate::types::{
    normalize_address, truncate_to_minute, EventRow, PositionRow, PositionStatus, PriceRow, VaultRow,
};

/// What an insert does when the key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Keep the stored row untouched.
    Ignore,
    /// Overwrite every column except the key and the preserved columns.
    Update,
}

/// A row with a natural key and a conflict policy.
pub trait Record: Clone + Send + Sync + 'static {
    type Key: Ord + Clone + Send + Sync;

    const TABLE: &'static str;
    /// Column names in bind order.
    const COLUMNS: &'static [&'static str];
    const CONFLICT_TARGET: &'static [&'static str];
    const ON_CONFLICT: ConflictAction = ConflictAction::Update;
    /// First-seen columns kept from the stored row on conflict.
    const PRESERVED_COLUMNS: &'static [&'static str] = &[];
    /// `(column, value)`: a stored row holding this value is never updated again.
    const FROZEN_WHEN: Option<(&'static str, &'static str)> = None;

    fn key(&self) -> Self::Key;

    /// Lower-case every address field.
    fn normalized(self) -> Self;

    /// Combine a stored row with an incoming one under [`ConflictAction::Update`].
    fn merge(_existing: &Self, incoming: Self) -> Self {
        incoming
    }

    /// In-memory counterpart of [`Record::FROZEN_WHEN`].
    fn is_frozen(&self) -> bool {
        false
    }
}

/// Columns overwritten from the incoming row on conflict.
pub fn overwritten_columns<R: Record>() -> Vec<&'static str> {
    R::COLUMNS
        .iter()
        .copied()
        .filter(|c| !R::CONFLICT_TARGET.contains(c) && !R::PRESERVED_COLUMNS.contains(c))
        .collect()
}

/// Render the `ON CONFLICT …` tail of an insert statement.
pub fn conflict_clause<R: Record>() -> String {
    let target = R::CONFLICT_TARGET.join(", ");
    match R::ON_CONFLICT {
        ConflictAction::Ignore => format!("ON CONFLICT ({target}) DO NOTHING"),
        ConflictAction::Update => {
            let assignments = overwritten_columns::<R>()
                .iter()
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect::<Vec<_>>()
                .join(", ");
            let mut clause = format!("ON CONFLICT ({target}) DO UPDATE SET {assignments}");
            if let Some((column, value)) = R::FROZEN_WHEN {
                clause.push_str(&format!(" WHERE {}.{column} <> '{value}'", R::TABLE));
            }
            clause
        }
    }
}

/// Apply one upsert to `rows`. Returns `true` when the map changed.
pub fn apply_upsert<R: Record>(rows: &mut BTreeMap<R::Key, R>, incoming: R) -> bool {
    let incoming = incoming.normalized();
    let key = incoming.key();
    match rows.get(&key) {
        None => {
            rows.insert(key, incoming);
            true
        }
        Some(_) if R::ON_CONFLICT == ConflictAction::Ignore => false,
        Some(existing) if existing.is_frozen() => false,
        Some(existing) => {
            let merged = R::merge(existing, incoming);
            rows.insert(key, merged);
            true
        }
    }
}

/// Collapse rows sharing a key, applying the conflict policy in order.
///
/// A multi-row `INSERT … ON CONFLICT DO UPDATE` may not touch the same key
/// twice, so batches go through this before hitting the database.
pub fn dedupe<R: Record>(rows: &[R]) -> Vec<R> {
    let mut by_key = BTreeMap::new();
    for row in rows {
        apply_upsert(&mut by_key, row.clone());
    }
    by_key.into_values().collect()
}

// ─── Impls ────────────────────────────────────────────────────────────────────

impl Record for Checkpoint {
    type Key = (u64, String);

    const TABLE: &'static str = "checkpoints";
    const COLUMNS: &'static [&'static str] = &["chain_id", "address", "last_processed_block", "updated_at"];
    const CONFLICT_TARGET: &'static [&'static str] = &["chain_id", "address"];

    fn key(&self) -> Self::Key {
        (self.chain_id, self.address.clone())
    }

    fn normalized(mut self) -> Self {
        self.address = normalize_address(&self.address);
        self
    }
}

impl Record for VaultRow {
    type Key = String;

    const TABLE: &'static str = "vaults";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "chain_id",
        "vault",
        "asset",
        "symbol",
        "decimals",
        "discovered_at",
        "updated_at",
    ];
    const CONFLICT_TARGET: &'static [&'static str] = &["id"];
    const PRESERVED_COLUMNS: &'static [&'static str] = &["discovered_at"];

    fn key(&self) -> Self::Key {
        self.id.clone()
    }

    fn normalized(mut self) -> Self {
        self.vault = normalize_address(&self.vault);
        self.asset = normalize_address(&self.asset);
        self.id = VaultRow::make_id(self.chain_id, &self.vault);
        self
    }

    fn merge(existing: &Self, incoming: Self) -> Self {
        Self {
            discovered_at: existing.discovered_at,
            ..incoming
        }
    }
}

impl Record for EventRow {
    type Key = String;

    const TABLE: &'static str = "events";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "chain_id",
        "contract",
        "name",
        "block_number",
        "tx_hash",
        "log_index",
        "block_hash",
        "ts",
        "args",
    ];
    const CONFLICT_TARGET: &'static [&'static str] = &["id"];
    const ON_CONFLICT: ConflictAction = ConflictAction::Ignore;

    fn key(&self) -> Self::Key {
        self.id.clone()
    }

    fn normalized(mut self) -> Self {
        self.contract = normalize_address(&self.contract);
        self
    }
}

impl Record for PositionRow {
    type Key = String;

    const TABLE: &'static str = "positions";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "chain_id",
        "vault",
        "\"user\"",
        "strategy_id",
        "asset",
        "asset_decimals",
        "status",
        "opened_at",
        "closed_at",
        "amount_in_raw",
        "amount_out_raw",
        "close_tx",
        "close_price_usd",
        "pnl_usd",
    ];
    const CONFLICT_TARGET: &'static [&'static str] = &["id"];
    const PRESERVED_COLUMNS: &'static [&'static str] = &["opened_at"];
    const FROZEN_WHEN: Option<(&'static str, &'static str)> = Some(("status", "closed"));

    fn key(&self) -> Self::Key {
        self.id.clone()
    }

    fn normalized(mut self) -> Self {
        self.vault = normalize_address(&self.vault);
        self.user = normalize_address(&self.user);
        self.asset = normalize_address(&self.asset);
        self.id = PositionRow::make_id(self.chain_id, &self.vault, &self.user, &self.strategy_id);
        self
    }

    fn merge(existing: &Self, incoming: Self) -> Self {
        Self {
            opened_at: existing.opened_at,
            ..incoming
        }
    }

    fn is_frozen(&self) -> bool {
        self.status == PositionStatus::Closed
    }
}

impl Record for PriceRow {
    type Key = (String, String, chrono::DateTime<chrono::Utc>);

    const TABLE: &'static str = "prices";
    const COLUMNS: &'static [&'static str] = &["asset", "source", "ts_minute", "price_usd"];
    const CONFLICT_TARGET: &'static [&'static str] = &["asset", "source", "ts_minute"];

    fn key(&self) -> Self::Key {
        (self.asset.clone(), self.source.clone(), self.ts_minute)
    }

    fn normalized(mut self) -> Self {
        self.asset = normalize_address(&self.asset);
        self.ts_minute = truncate_to_minute(self.ts_minute);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn vault(symbol: &str, seen: i64) -> VaultRow {
        let ts = Utc.timestamp_opt(seen, 0).unwrap();
        VaultRow {
            id: VaultRow::make_id(1, "0xVAULT"),
            chain_id: 1,
            vault: "0xVAULT".into(),
            asset: "0xASSET".into(),
            symbol: symbol.into(),
            decimals: 6,
            discovered_at: ts,
            updated_at: ts,
        }
    }

    fn position(status: PositionStatus, opened: i64) -> PositionRow {
        PositionRow {
            id: PositionRow::make_id(1, "0xv", "0xu", "0"),
            chain_id: 1,
            vault: "0xV".into(),
            user: "0xU".into(),
            strategy_id: "0".into(),
            asset: "0xa".into(),
            asset_decimals: 18,
            status,
            opened_at: Utc.timestamp_opt(opened, 0).unwrap(),
            closed_at: None,
            amount_in_raw: Some("1000".into()),
            amount_out_raw: None,
            close_tx: None,
            close_price_usd: None,
            pnl_usd: None,
        }
    }

    #[test]
    fn vault_clause_preserves_discovered_at() {
        assert_eq!(
            conflict_clause::<VaultRow>(),
            "ON CONFLICT (id) DO UPDATE SET chain_id = EXCLUDED.chain_id, vault = EXCLUDED.vault, \
             asset = EXCLUDED.asset, symbol = EXCLUDED.symbol, decimals = EXCLUDED.decimals, \
             updated_at = EXCLUDED.updated_at"
        );
    }

    #[test]
    fn event_clause_ignores() {
        assert_eq!(conflict_clause::<EventRow>(), "ON CONFLICT (id) DO NOTHING");
    }

    #[test]
    fn price_clause_overwrites_price_only() {
        assert_eq!(
            conflict_clause::<PriceRow>(),
            "ON CONFLICT (asset, source, ts_minute) DO UPDATE SET price_usd = EXCLUDED.price_usd"
        );
    }

    #[test]
    fn position_clause_is_guarded() {
        let clause = conflict_clause::<PositionRow>();
        assert!(clause.ends_with("WHERE positions.status <> 'closed'"));
        assert!(!clause.contains("opened_at = EXCLUDED"));
        assert!(clause.contains("\"user\" = EXCLUDED.\"user\""));
    }

    #[test]
    fn vault_upsert_keeps_first_seen() {
        let mut rows = BTreeMap::new();
        assert!(apply_upsert(&mut rows, vault("USDC", 100)));
        assert!(apply_upsert(&mut rows, vault("USDC.e", 200)));

        let stored = rows.values().next().unwrap();
        assert_eq!(stored.symbol, "USDC.e");
        assert_eq!(stored.discovered_at.timestamp(), 100);
        assert_eq!(stored.updated_at.timestamp(), 200);
        assert_eq!(stored.vault, "0xvault");
    }

    #[test]
    fn closed_position_is_never_reopened() {
        let mut rows = BTreeMap::new();
        apply_upsert(&mut rows, position(PositionStatus::Open, 10));

        let mut closed = position(PositionStatus::Closed, 99);
        closed.closed_at = Some(Utc.timestamp_opt(50, 0).unwrap());
        closed.pnl_usd = Some("12.5".into());
        assert!(apply_upsert(&mut rows, closed));

        let stored = rows.values().next().unwrap().clone();
        assert!(stored.is_closed());
        assert_eq!(stored.opened_at.timestamp(), 10);

        // replaying the open event must not undo the close
        assert!(!apply_upsert(&mut rows, position(PositionStatus::Open, 10)));
        assert_eq!(rows.values().next().unwrap(), &stored);
    }

    #[test]
    fn events_are_insert_only() {
        let ts = Utc::now();
        let ev = |name: &str| EventRow {
            id: EventRow::make_id(1, "0xtx", 0),
            chain_id: 1,
            contract: "0xC".into(),
            name: name.into(),
            block_number: 5,
            tx_hash: "0xtx".into(),
            log_index: 0,
            block_hash: "0xb".into(),
            ts,
            args: serde_json::json!({}),
        };
        let mut rows = BTreeMap::new();
        assert!(apply_upsert(&mut rows, ev("Deposit")));
        assert!(!apply_upsert(&mut rows, ev("Withdraw")));
        assert_eq!(rows.values().next().unwrap().name, "Deposit");
    }

    #[test]
    fn dedupe_folds_same_minute_prices() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
        let rows = vec![
            PriceRow::new("0xA", "oracle", t, "1.00"),
            PriceRow::new("0xa", "oracle", t + Duration::seconds(30), "1.01"),
            PriceRow::new("0xa", "oracle", t + Duration::minutes(1), "1.02"),
        ];
        let deduped = dedupe(&rows);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].price_usd, "1.01");
    }

    #[test]
    fn unaligned_price_timestamps_share_a_minute() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
        let price = |ts, usd: &str| PriceRow {
            asset: "0xA".into(),
            source: "oracle".into(),
            ts_minute: ts,
            price_usd: usd.into(),
        };

        let mut rows = BTreeMap::new();
        assert!(apply_upsert(&mut rows, price(t, "1.00")));
        assert!(apply_upsert(&mut rows, price(t + Duration::seconds(35), "1.01")));

        assert_eq!(rows.len(), 1);
        let row = rows.values().next().unwrap();
        assert_eq!(row.ts_minute, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(row.price_usd, "1.01");
        assert_eq!(dedupe(&[price(t, "1.00"), price(t + Duration::seconds(35), "1.01")]).len(), 1);
    }

    #[test]
    fn position_id_is_rebuilt_from_lowercased_parts() {
        let mut upper = position(PositionStatus::Open, 100);
        upper.id = "1:0xV:0xU:0".into();
        let mut lower = position(PositionStatus::Open, 200);
        lower.id = "1:0xv:0xu:0".into();
        lower.amount_in_raw = Some("2000".into());

        let mut rows = BTreeMap::new();
        assert!(apply_upsert(&mut rows, upper));
        assert!(apply_upsert(&mut rows, lower));

        assert_eq!(rows.len(), 1);
        let row = rows.get("1:0xv:0xu:0").unwrap();
        assert_eq!(row.opened_at, Utc.timestamp_opt(100, 0).unwrap());
        assert_eq!(row.amount_in_raw.as_deref(), Some("2000"));
    }
}
