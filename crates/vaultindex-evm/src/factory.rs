//! Builds an [`Indexer`] from a [`FactoryConfig`].

use std::sync::Arc;

use tracing::info;

use vaultindex_core::config::FactoryConfig;
use vaultindex_core::error::IndexerError;
use vaultindex_core::start_block::resolve_start_block;
use vaultindex_core::storage::Storage;
use vaultindex_storage::PostgresStorage;

use crate::indexer::Indexer;
use crate::runtime::ChainRuntime;
use crate::source::{DomainSource, LogEventSource};

/// Validates config, wires storage and one [`ChainRuntime`] per chain.
///
/// No pass runs at construction.
#[derive(Clone)]
pub struct IndexerFactory {
    source: Arc<dyn DomainSource>,
}

impl Default for IndexerFactory {
    fn default() -> Self {
        Self {
            source: Arc::new(LogEventSource),
        }
    }
}

impl IndexerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default [`LogEventSource`].
    pub fn with_source(mut self, source: Arc<dyn DomainSource>) -> Self {
        self.source = source;
        self
    }

    /// Validate, build runtimes, connect Postgres and initialize its schema.
    ///
    /// Every validation problem is reported in a single
    /// [`IndexerError::ConfigValidation`] before any connection is attempted.
    pub async fn create_indexer(&self, config: &FactoryConfig) -> Result<Indexer, IndexerError> {
        config.validate()?;
        let runtimes = build_runtimes(config)?;
        let storage = PostgresStorage::connect_with_config(&config.db).await?;
        Ok(self.assemble(runtimes, Arc::new(storage)))
    }

    /// Same as [`create_indexer`](Self::create_indexer) with caller-supplied storage.
    /// The `db` section is not validated.
    pub fn create_with_storage(
        &self,
        config: &FactoryConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Indexer, IndexerError> {
        config.validate_chains()?;
        let runtimes = build_runtimes(config)?;
        Ok(self.assemble(runtimes, storage))
    }

    fn assemble(&self, runtimes: Vec<ChainRuntime>, storage: Arc<dyn Storage>) -> Indexer {
        let indexer = Indexer::new(runtimes, storage, self.source.clone());
        info!(chains = ?indexer.chain_ids(), "indexer created");
        indexer
    }
}

fn build_runtimes(config: &FactoryConfig) -> Result<Vec<ChainRuntime>, IndexerError> {
    config
        .chains
        .iter()
        .map(|chain| {
            let urls = config.rpc_urls_for(chain.id);
            let start_block = resolve_start_block(chain.id, config.start_blocks.as_ref());
            let runtime = ChainRuntime::from_urls(chain.clone(), &urls, start_block, &config.sync)?;
            info!(chain_id = chain.id, name = %chain.name, start_block, endpoints = urls.len(), "chain runtime ready");
            Ok(runtime)
        })
        .collect()
}
