//! # forkview-node — RocksDB storage and block processing.
//!
//! - [`storage::RocksStore`] persists the best chain and its transaction records
//! - [`node::Node`] validates incoming blocks against their own point of view
//!   and reorganizes storage when a side branch outgrows the best chain
//! - [`config::NodeConfig`] holds the data directory and cache sizes

pub mod config;
pub mod node;
pub mod storage;

pub use config::NodeConfig;
pub use node::{BlockOutcome, Node, NodeChainDb};
pub use storage::RocksStore;
