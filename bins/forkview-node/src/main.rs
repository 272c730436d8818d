//! forkview node binary.
//!
//! Imports blocks into RocksDB storage, reports the best tip, and resolves
//! transaction views from any node of the block tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use forkview_core::types::{Block, Hash256};
use forkview_core::view::TxData;
use forkview_node_lib::{Node, NodeConfig};

#[derive(Parser, Debug)]
#[command(
    name = "forkview-node",
    version,
    about = "Block tree tracking with point-of-view transaction lookup"
)]
struct Cli {
    /// Data directory for chain storage
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Side-branch block bodies kept in memory
    #[arg(long, global = true)]
    side_block_cache: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a bincode-encoded list of blocks, in order.
    Import {
        /// File holding a bincode `Vec<Block>`
        file: PathBuf,
    },
    /// Print the best chain tip.
    Tip,
    /// Resolve transactions as seen from a block tree node.
    Lookup {
        /// Hash of the point-of-view block
        #[arg(long)]
        block: Hash256,

        /// Transaction hashes to resolve
        #[arg(long = "tx", required = true)]
        txs: Vec<Hash256>,
    },
}

impl Cli {
    /// Map global flags onto a NodeConfig.
    fn config(&self) -> NodeConfig {
        let defaults = NodeConfig::default();
        NodeConfig {
            data_dir: self.data_dir.clone().unwrap_or(defaults.data_dir),
            log_level: self.log_level.clone(),
            side_block_cache_capacity: self
                .side_block_cache
                .unwrap_or(defaults.side_block_cache_capacity),
            ..defaults
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config();
    init_logging(&config.log_level, &cli.log_format);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    info!(data_dir = %config.data_dir.display(), "opening chain storage");
    let node = Node::open(config).context("opening node")?;

    match cli.command {
        Command::Import { file } => import(&node, &file),
        Command::Tip => {
            let (height, hash) = node.chain_tip()?;
            println!("{}", json!({ "height": height, "hash": hash }));
            Ok(())
        }
        Command::Lookup { block, txs } => lookup(&node, &block, &txs),
    }
}

fn import(node: &Node, file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let (blocks, _): (Vec<Block>, usize) = bincode::decode_from_slice(&bytes, bincode::config::standard())
        .with_context(|| format!("decoding blocks from {}", file.display()))?;

    let mut rejected = 0usize;
    for block in &blocks {
        let hash = block.hash();
        match node.process_block(block) {
            Ok(outcome) => {
                println!("{}", json!({ "hash": hash, "result": outcome }));
            }
            Err(e) => {
                warn!(hash = %hash, error = %e, "block not imported");
                println!("{}", json!({ "hash": hash, "error": e.to_string() }));
                rejected += 1;
            }
        }
    }
    node.flush()?;

    let (height, tip) = node.chain_tip()?;
    info!(blocks = blocks.len(), rejected, height, tip = %tip, "import finished");
    Ok(())
}

fn lookup(node: &Node, block: &Hash256, txs: &[Hash256]) -> Result<()> {
    let view = node
        .fetch_tx_list(block, txs)
        .with_context(|| format!("resolving view from {block}"))?;

    // Answer in request order; duplicates collapse to one entry.
    let mut seen = HashSet::new();
    let entries: Vec<&TxData> = txs
        .iter()
        .filter(|hash| seen.insert(**hash))
        .filter_map(|hash| view.get(hash))
        .collect();

    println!("{}", serde_json::to_string_pretty(&json!({ "block": block, "txs": entries }))?);
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG` takes precedence over `level_str`. Logs go to stderr so
/// stdout stays machine-readable.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
