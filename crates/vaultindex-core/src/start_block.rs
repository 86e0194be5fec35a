//! Start-block resolution for chains without a checkpoint.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Block scanned from when a chain has neither a checkpoint nor a valid
/// configured start block. Genesis carries no contract logs.
pub const DEFAULT_START_BLOCK: u64 = 1;

/// A start block as written in configuration.
///
/// Configuration is loosely typed: an exact unsigned integer is trusted as-is,
/// other numbers go through validation, and anything else is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfiguredStartBlock {
    /// An exact unsigned integer. Returned unchanged.
    Height(u64),
    /// Any other number (negative, fractional, out of range).
    Number(f64),
    /// Not a number at all.
    Invalid(serde_json::Value),
}

impl From<serde_json::Value> for ConfiguredStartBlock {
    fn from(value: serde_json::Value) -> Self {
        if let Some(height) = value.as_u64() {
            return Self::Height(height);
        }
        match value.as_f64() {
            Some(n) => Self::Number(n),
            None => Self::Invalid(value),
        }
    }
}

impl From<u64> for ConfiguredStartBlock {
    fn from(height: u64) -> Self {
        Self::Height(height)
    }
}

impl<'de> Deserialize<'de> for ConfiguredStartBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

impl Serialize for ConfiguredStartBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Height(h) => serializer.serialize_u64(*h),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Invalid(v) => v.serialize(serializer),
        }
    }
}

/// Resolve the block a chain starts scanning from. Never fails: invalid
/// entries degrade to [`DEFAULT_START_BLOCK`].
pub fn resolve_start_block(
    chain_id: u64,
    configured: Option<&HashMap<u64, ConfiguredStartBlock>>,
) -> u64 {
    let Some(value) = configured.and_then(|m| m.get(&chain_id)) else {
        return DEFAULT_START_BLOCK;
    };
    match value {
        ConfiguredStartBlock::Height(height) => *height,
        ConfiguredStartBlock::Number(n) => match whole_block_number(*n) {
            Some(block) => block,
            None => {
                tracing::warn!(chain_id, value = *n, "invalid start block, using default");
                DEFAULT_START_BLOCK
            }
        },
        ConfiguredStartBlock::Invalid(v) => {
            tracing::warn!(chain_id, value = %v, "non-numeric start block, using default");
            DEFAULT_START_BLOCK
        }
    }
}

fn whole_block_number(n: f64) -> Option<u64> {
    // 2^64 as f64; anything at or above it cannot be a u64
    const LIMIT: f64 = 18_446_744_073_709_551_616.0;
    (n.is_finite() && n.fract() == 0.0 && n >= 0.0 && n < LIMIT).then_some(n as u64)
}
