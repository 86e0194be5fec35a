//! vaultindex CLI: run sync passes and inspect checkpoints.
//!
//! # Commands
//! ```text
//! vaultindex run    --config vaultindex.json [--once] [--interval 15] [--json-logs]
//! vaultindex status --config vaultindex.json
//! vaultindex info
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vaultindex_core::{DbConfig, FactoryConfig, Storage, SyncOptions, DEFAULT_START_BLOCK, GLOBAL_SCAN_SUBJECT};
use vaultindex_evm::IndexerFactory;

/// Overrides `db.password` from the config file.
const PASSWORD_ENV: &str = "VAULTINDEX_DB_PASSWORD";

#[derive(Parser, Debug)]
#[command(
    name = "vaultindex",
    about = "Multi-chain vault and position mirror",
    long_about = "
Mirrors lending-vault activity from EVM chains into PostgreSQL.

ENVIRONMENT VARIABLES:
  RUST_LOG                  Log filter (default: info)
  VAULTINDEX_DB_PASSWORD    Overrides db.password
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Sync every chain, repeating each interval until Ctrl-C
    Run {
        /// JSON config file
        #[arg(short, long)]
        config: PathBuf,
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
        /// Seconds between passes (default: sync.poll_interval_secs)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
        /// Emit JSON logs
        #[arg(long)]
        json_logs: bool,
    },

    /// Show each chain's checkpoint and current head
    Status {
        /// JSON config file
        #[arg(short, long)]
        config: PathBuf,
        /// Emit JSON logs
        #[arg(long)]
        json_logs: bool,
    },

    /// Show defaults
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, once, interval, json_logs } => {
            init_tracing(json_logs);
            cmd_run(&config, once, interval).await
        }
        Commands::Status { config, json_logs } => {
            init_tracing(json_logs);
            cmd_status(&config).await
        }
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<FactoryConfig> {
    let mut config = FactoryConfig::from_json_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        config.db.password = password;
    }
    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

async fn cmd_run(config_path: &Path, once: bool, interval: Option<u64>) -> Result<()> {
    let config = load_config(config_path)?;
    let interval = Duration::from_secs(interval.unwrap_or(config.sync.poll_interval_secs).max(1));

    let indexer = IndexerFactory::new()
        .create_indexer(&config)
        .await
        .context("failed to build indexer")?;

    let failed = loop {
        let report = indexer.sync_all().await;
        info!(advanced = ?report.advanced(), failed = ?report.failed(), "pass complete");
        if once {
            break report.failed();
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping");
                break Vec::new();
            }
            _ = tokio::time::sleep(interval) => {}
        }
    };

    indexer.shutdown().await;
    if !failed.is_empty() {
        bail!("chains failed to sync: {failed:?}");
    }
    Ok(())
}

async fn cmd_status(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let indexer = IndexerFactory::new()
        .create_indexer(&config)
        .await
        .context("failed to build indexer")?;

    println!("{:<10} {:<16} {:>14} {:>14} {:>10}", "CHAIN", "NAME", "CHECKPOINT", "HEAD", "BEHIND");
    for chain_id in indexer.chain_ids() {
        let Some(runtime) = indexer.runtime(chain_id) else { continue };
        let checkpoint = indexer
            .storage()
            .get_checkpoint(chain_id, GLOBAL_SCAN_SUBJECT)
            .await?
            .map(|cp| cp.last_processed_block);
        let head = match runtime.get_latest_block_number().await {
            Ok(head) => Some(head),
            Err(e) => {
                warn!(chain_id, error = %e, "head unavailable");
                None
            }
        };
        let behind = match (checkpoint, head) {
            (Some(cp), Some(head)) => head.saturating_sub(cp).to_string(),
            (None, Some(head)) => (head + 1).saturating_sub(runtime.start_block).to_string(),
            _ => "?".into(),
        };
        println!(
            "{:<10} {:<16} {:>14} {:>14} {:>10}",
            chain_id,
            runtime.chain.name,
            checkpoint.map_or_else(|| "-".to_string(), |b| b.to_string()),
            head.map_or_else(|| "?".to_string(), |b| b.to_string()),
            behind,
        );
    }

    indexer.shutdown().await;
    Ok(())
}

fn cmd_info() {
    let sync = SyncOptions::default();
    println!("VaultIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default start block: {DEFAULT_START_BLOCK}");
    println!("  Default log batch size: {} blocks/call", sync.log_batch_size);
    println!("  Default poll interval: {}s", sync.poll_interval_secs);
    println!("  Default RPC timeout: {}s", sync.request_timeout_secs);
    println!("  Default pool size: {} connections", DbConfig::DEFAULT_MAX_CONNECTIONS);
    println!("  Storage backends: PostgreSQL, memory");
}
