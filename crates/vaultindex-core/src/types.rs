//! Domain rows mirrored from the chain.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Lower-case an address so equality is case-insensitive by construction.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

// ─── ChainMeta ────────────────────────────────────────────────────────────────

/// Static identity of a configured chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMeta {
    /// EIP-155 chain id.
    pub id: u64,
    /// Human-readable name (e.g. `"base"`).
    pub name: String,
    /// Contracts whose logs are mirrored. Empty = every log in range.
    #[serde(default)]
    pub contracts: Vec<String>,
}

impl ChainMeta {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            contracts: Vec::new(),
        }
    }

    /// Watch a contract address.
    pub fn contract(mut self, address: impl AsRef<str>) -> Self {
        self.contracts.push(normalize_address(address.as_ref()));
        self
    }
}

// ─── Vault ────────────────────────────────────────────────────────────────────

/// A discovered lending vault contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRow {
    /// `"{chain_id}:{vault}"`.
    pub id: String,
    pub chain_id: u64,
    pub vault: String,
    pub asset: String,
    pub symbol: String,
    pub decimals: u8,
    /// Set on first insert only.
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaultRow {
    pub fn make_id(chain_id: u64, vault: &str) -> String {
        format!("{chain_id}:{}", normalize_address(vault))
    }
}

// ─── Event ────────────────────────────────────────────────────────────────────

/// An immutable decoded on-chain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    /// `"{chain_id}:{tx_hash}:{log_index}"`.
    pub id: String,
    pub chain_id: u64,
    pub contract: String,
    pub name: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_hash: String,
    pub ts: DateTime<Utc>,
    pub args: serde_json::Value,
}

impl EventRow {
    pub fn make_id(chain_id: u64, tx_hash: &str, log_index: u32) -> String {
        format!("{chain_id}:{}:{log_index}", tx_hash.to_ascii_lowercase())
    }
}

// ─── Position ─────────────────────────────────────────────────────────────────

/// Lifecycle of a position. Transitions only go `Open → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(IndexerError::Storage(format!("unknown position status '{other}'"))),
        }
    }
}

/// A lending/borrowing position.
///
/// Raw token amounts and USD values are decimal strings; they are stored as
/// `NUMERIC` and never pass through floating point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRow {
    /// `"{chain_id}:{vault}:{user}:{strategy_id}"`.
    pub id: String,
    pub chain_id: u64,
    pub vault: String,
    pub user: String,
    pub strategy_id: String,
    pub asset: String,
    pub asset_decimals: u8,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub amount_in_raw: Option<String>,
    pub amount_out_raw: Option<String>,
    pub close_tx: Option<String>,
    pub close_price_usd: Option<String>,
    pub pnl_usd: Option<String>,
}

impl PositionRow {
    pub fn make_id(chain_id: u64, vault: &str, user: &str, strategy_id: &str) -> String {
        format!(
            "{chain_id}:{}:{}:{strategy_id}",
            normalize_address(vault),
            normalize_address(user)
        )
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }
}

// ─── Price ────────────────────────────────────────────────────────────────────

/// A USD price observation bucketed to the minute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRow {
    pub asset: String,
    pub source: String,
    pub ts_minute: DateTime<Utc>,
    pub price_usd: String,
}

impl PriceRow {
    /// Build a price row, truncating `observed_at` to its minute.
    pub fn new(
        asset: &str,
        source: impl Into<String>,
        observed_at: DateTime<Utc>,
        price_usd: impl Into<String>,
    ) -> Self {
        Self {
            asset: normalize_address(asset),
            source: source.into(),
            ts_minute: truncate_to_minute(observed_at),
            price_usd: price_usd.into(),
        }
    }
}

/// Drop seconds and sub-second precision.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(chrono::Duration::minutes(1)).unwrap_or(ts)
}

// ─── DomainBatch ──────────────────────────────────────────────────────────────

/// Every candidate row produced for one block range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainBatch {
    pub vaults: Vec<VaultRow>,
    pub events: Vec<EventRow>,
    pub positions: Vec<PositionRow>,
    pub prices: Vec<PriceRow>,
}

impl DomainBatch {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total row count across all entities.
    pub fn len(&self) -> usize {
        self.vaults.len() + self.events.len() + self.positions.len() + self.prices.len()
    }
}
