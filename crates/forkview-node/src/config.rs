//! Node configuration.
//!
//! Provides [`NodeConfig`] with defaults for the data directory, logging and
//! the in-memory limits of the block tree.

use std::path::PathBuf;

use forkview_core::constants::{DEFAULT_NODE_RETENTION_DEPTH, DEFAULT_SIDE_BLOCK_CACHE_CAPACITY};

/// Configuration for a node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "debug", "forkview_core=trace").
    pub log_level: String,
    /// Maximum number of side-branch block bodies kept in memory.
    pub side_block_cache_capacity: usize,
    /// Block nodes deeper than this below the tip are dropped from memory
    /// after each processed block.
    pub node_retention_depth: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("forkview");

        Self {
            data_dir,
            log_level: "info".to_string(),
            side_block_cache_capacity: DEFAULT_SIDE_BLOCK_CACHE_CAPACITY,
            node_retention_depth: DEFAULT_NODE_RETENTION_DEPTH,
        }
    }
}

impl NodeConfig {
    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }
}
