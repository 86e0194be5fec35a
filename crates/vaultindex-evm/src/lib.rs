//! vaultindex-evm: EVM chain runtimes and the sync orchestrator.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vaultindex_core::FactoryConfig;
//! use vaultindex_evm::IndexerFactory;
//!
//! # async fn example() -> Result<(), vaultindex_core::IndexerError> {
//! let config = FactoryConfig::from_json_file("vaultindex.json")?;
//! let indexer = IndexerFactory::new().create_indexer(&config).await?;
//! let report = indexer.sync_all().await;
//! println!("advanced: {:?}, failed: {:?}", report.advanced(), report.failed());
//! indexer.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod factory;
pub mod fetcher;
pub mod indexer;
pub mod rpc;
pub mod runtime;
pub mod source;

pub use factory::IndexerFactory;
pub use indexer::Indexer;
pub use runtime::ChainRuntime;
pub use source::{DomainSource, LogEventSource};
