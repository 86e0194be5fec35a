//! Indexer configuration and validation.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::start_block::ConfiguredStartBlock;
use crate::types::ChainMeta;

/// Everything the factory needs to wire an indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub chains: Vec<ChainMeta>,
    /// RPC endpoints per chain id.
    #[serde(default)]
    pub rpc_urls: HashMap<u64, RpcEndpoints>,
    /// Optional start blocks per chain id.
    #[serde(default)]
    pub start_blocks: Option<HashMap<u64, ConfiguredStartBlock>>,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncOptions,
}

/// One RPC URL or an ordered list of fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcEndpoints {
    One(String),
    Many(Vec<String>),
}

impl RpcEndpoints {
    /// Non-blank URLs in priority order.
    pub fn urls(&self) -> Vec<String> {
        let urls: Vec<&String> = match self {
            Self::One(url) => vec![url],
            Self::Many(urls) => urls.iter().collect(),
        };
        urls.into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect()
    }
}

impl From<&str> for RpcEndpoints {
    fn from(url: &str) -> Self {
        Self::One(url.to_string())
    }
}

/// Postgres connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Pool size (default: 10).
    pub max_connections: Option<u32>,
    pub ssl: Option<bool>,
}

impl DbConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

    /// Check the connection fields, reporting every problem at once.
    pub fn validate(&self) -> Result<(), IndexerError> {
        into_result(self.violations())
    }

    fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (field, value) in [
            ("user", &self.user),
            ("password", &self.password),
            ("host", &self.host),
            ("database", &self.database),
        ] {
            if value.trim().is_empty() {
                out.push(format!("db.{field} is required"));
            }
        }
        if self.port == 0 {
            out.push("db.port must be between 1 and 65535".into());
        }
        if self.max_connections == Some(0) {
            out.push("db.max_connections must be positive".into());
        }
        out
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections.unwrap_or(Self::DEFAULT_MAX_CONNECTIONS)
    }
}

/// Tuning knobs for sync passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Max blocks per `eth_getLogs` call.
    pub log_batch_size: u64,
    /// Per-request RPC timeout.
    pub request_timeout_secs: u64,
    /// Pause between scheduled passes (used by the CLI scheduler).
    pub poll_interval_secs: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            log_batch_size: 2000,
            request_timeout_secs: 30,
            poll_interval_secs: 15,
        }
    }
}

impl FactoryConfig {
    /// Parse a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, IndexerError> {
        serde_json::from_str(json).map_err(|e| IndexerError::config(format!("malformed config: {e}")))
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Validate the whole shape. Missing RPC URLs for a configured chain are
    /// reported later, per chain, as [`IndexerError::MissingRpcUrl`].
    pub fn validate(&self) -> Result<(), IndexerError> {
        let mut violations = self.chain_violations();
        violations.extend(self.db.violations());
        into_result(violations)
    }

    /// Like [`validate`](Self::validate) but ignores `db`, for callers that
    /// bring their own storage.
    pub fn validate_chains(&self) -> Result<(), IndexerError> {
        into_result(self.chain_violations())
    }

    fn chain_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.chains.is_empty() {
            violations.push("chains must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if chain.id == 0 {
                violations.push(format!("chain '{}' has id 0", chain.name));
            }
            if !seen.insert(chain.id) {
                violations.push(format!("chain id {} is configured twice", chain.id));
            }
            if chain.name.trim().is_empty() {
                violations.push(format!("chain {} has an empty name", chain.id));
            }
        }

        for (chain_id, endpoints) in &self.rpc_urls {
            let raw: Vec<&String> = match endpoints {
                RpcEndpoints::One(url) => vec![url],
                RpcEndpoints::Many(urls) => urls.iter().collect(),
            };
            for url in raw {
                let url = url.trim();
                if url.is_empty() {
                    violations.push(format!("rpc_urls.{chain_id} contains an empty URL"));
                } else if !is_rpc_scheme(url) {
                    violations.push(format!("rpc_urls.{chain_id}: '{url}' is not an http(s) URL"));
                }
            }
        }

        if self.sync.log_batch_size == 0 {
            violations.push("sync.log_batch_size must be positive".into());
        }
        if self.sync.request_timeout_secs == 0 {
            violations.push("sync.request_timeout_secs must be positive".into());
        }
        violations
    }

    /// RPC URLs for `chain_id`, or an empty list.
    pub fn rpc_urls_for(&self, chain_id: u64) -> Vec<String> {
        self.rpc_urls.get(&chain_id).map(RpcEndpoints::urls).unwrap_or_default()
    }
}

fn into_result(violations: Vec<String>) -> Result<(), IndexerError> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(IndexerError::ConfigValidation(violations))
    }
}

fn is_rpc_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "chains": [
            { "id": 1, "name": "ethereum" },
            { "id": 8453, "name": "base", "contracts": ["0xABC"] }
        ],
        "rpc_urls": {
            "1": "https://eth.example",
            "8453": ["https://base-a.example", "https://base-b.example"]
        },
        "start_blocks": { "1": 19000000, "8453": -1 },
        "db": { "user": "indexer", "password": "pw", "host": "localhost", "port": 5432, "database": "vaults" }
    }"#;

    #[test]
    fn parses_and_validates_sample() {
        let cfg = FactoryConfig::from_json_str(SAMPLE).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.chains.len(), 2);
        assert_eq!(cfg.rpc_urls_for(8453).len(), 2);
        assert_eq!(cfg.rpc_urls_for(1), vec!["https://eth.example".to_string()]);
        assert!(cfg.rpc_urls_for(10).is_empty());
        assert_eq!(cfg.sync.log_batch_size, 2000);
        assert_eq!(cfg.db.max_connections(), 10);
    }

    #[test]
    fn reports_all_violations() {
        let cfg = FactoryConfig::from_json_str(
            r#"{ "chains": [], "rpc_urls": { "1": ["", "ftp://x"] }, "db": { "port": 0 } }"#,
        )
        .unwrap();
        match cfg.validate() {
            Err(IndexerError::ConfigValidation(v)) => {
                assert!(v.iter().any(|m| m.contains("chains must not be empty")));
                assert!(v.iter().any(|m| m.contains("empty URL")));
                assert!(v.iter().any(|m| m.contains("not an http(s) URL")));
                assert!(v.iter().any(|m| m == "db.user is required"));
                assert!(v.iter().any(|m| m == "db.password is required"));
                assert!(v.iter().any(|m| m.contains("db.port")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicate_chain_ids_rejected() {
        let mut cfg = FactoryConfig::from_json_str(SAMPLE).unwrap();
        cfg.chains.push(ChainMeta::new(1, "mainnet-again"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_chains_ignores_db() {
        let mut cfg = FactoryConfig::from_json_str(SAMPLE).unwrap();
        cfg.db = DbConfig::default();
        assert!(cfg.validate().is_err());
        cfg.validate_chains().unwrap();
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = FactoryConfig::from_json_str("{ not json").unwrap_err();
        assert!(err.is_fatal());
    }
}
