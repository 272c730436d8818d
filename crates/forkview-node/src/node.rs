//! Block-processing driver.
//!
//! The [`Node`] struct wires RocksDB storage to the in-memory block tree.
//! The [`NodeChainDb`] adapter bridges the mutable [`RocksStore`] (behind a
//! `RwLock`) to the read-only [`ChainDb`] trait the block tree reads through.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use forkview_core::blockchain::BlockChain;
use forkview_core::chain_state::ChainStore;
use forkview_core::error::{BlockError, ChainGraphError, ForkViewError, ViewError};
use forkview_core::fork::ReorgPath;
use forkview_core::graph::BlockNode;
use forkview_core::traits::{ChainDb, TxReply};
use forkview_core::types::{Block, BlockHeader, Hash256};
use forkview_core::view::{TxStatus, TxStore};

use crate::config::NodeConfig;
use crate::storage::RocksStore;

/// Adapter bridging `RocksStore` (behind `RwLock`) to the read-only `ChainDb` trait.
///
/// Takes a read lock on each call.
pub struct NodeChainDb {
    storage: Arc<RwLock<RocksStore>>,
}

impl NodeChainDb {
    /// Create a new adapter wrapping the given storage.
    pub fn new(storage: Arc<RwLock<RocksStore>>) -> Self {
        Self { storage }
    }
}

impl ChainDb for NodeChainDb {
    fn fetch_tx_by_hash_list(&self, hashes: &[Hash256]) -> Result<Vec<TxReply>, ForkViewError> {
        self.storage.read().fetch_tx_by_hash_list(hashes)
    }

    fn fetch_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, ForkViewError> {
        self.storage.read().fetch_block_by_hash(hash)
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, ForkViewError> {
        self.storage.read().get_block_header(hash)
    }

    fn get_block_height(&self, hash: &Hash256) -> Result<Option<u64>, ForkViewError> {
        self.storage.read().get_block_height(hash)
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), ForkViewError> {
        self.storage.read().chain_tip()
    }
}

/// Where a processed block ended up.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BlockOutcome {
    /// Connected on top of the previous best tip.
    MainChain { height: u64 },
    /// Accepted on a branch that does not outgrow the best chain.
    SideChain { height: u64 },
    /// The block's branch became the best chain.
    Reorganized {
        height: u64,
        /// Undone best-chain blocks, newest first.
        detached: Vec<Hash256>,
        /// Connected branch blocks, oldest first.
        attached: Vec<Hash256>,
    },
}

/// Storage plus the block tree, processing one block at a time.
pub struct Node {
    /// RocksDB storage behind a read-write lock.
    storage: Arc<RwLock<RocksStore>>,
    /// Block tree and side-branch bodies. Held for the whole of
    /// [`process_block`](Node::process_block).
    chain: Mutex<BlockChain>,
    /// Node configuration.
    config: NodeConfig,
}

impl Node {
    /// Open storage under `config.data_dir` and rebuild the tree from its tip.
    pub fn open(config: NodeConfig) -> Result<Self, ForkViewError> {
        let store = RocksStore::open(config.db_path())?;
        Self::with_store(store, config)
    }

    /// Build a node over an already opened store.
    pub fn with_store(store: RocksStore, config: NodeConfig) -> Result<Self, ForkViewError> {
        let storage = Arc::new(RwLock::new(store));
        let db: Arc<dyn ChainDb> = Arc::new(NodeChainDb::new(Arc::clone(&storage)));
        let chain = BlockChain::new(db, config.side_block_cache_capacity)?;

        Ok(Self {
            storage,
            chain: Mutex::new(chain),
            config,
        })
    }

    /// Validate a block's inputs from its own point of view and add it to
    /// the tree, reorganizing storage when its branch outgrows the best chain.
    ///
    /// A rejected block leaves no trace in the tree or in storage.
    pub fn process_block(&self, block: &Block) -> Result<BlockOutcome, ForkViewError> {
        let mut chain = self.chain.lock();
        let hash = block.hash();

        if chain.graph().contains(&hash) || self.storage.read().get_block_height(&hash)?.is_some() {
            return Err(BlockError::Duplicate(hash.to_string()).into());
        }

        let height = self.resolve_height(&mut chain, block)?;
        chain.graph_mut().insert(BlockNode::from_header(&block.header, height));

        let accepted = chain
            .fetch_input_transactions(&hash, block)
            .and_then(|view| check_inputs(block, &view));
        if let Err(e) = accepted {
            chain.graph_mut().remove(&hash);
            warn!(hash = %hash, height, error = %e, "rejected block");
            return Err(e);
        }

        let tip = chain.best_tip();
        let extends_tip = match tip {
            None => true,
            Some(tip) => block.header.parent_hash() == Some(tip.hash),
        };

        let outcome = if extends_tip {
            if let Err(e) = self.storage.write().connect_block(block, height) {
                chain.graph_mut().remove(&hash);
                warn!(hash = %hash, height, error = %e, "storage rejected block");
                return Err(e);
            }
            chain.graph_mut().set_best_tip(&hash)?;
            info!(height, hash = %hash, "connected block");
            BlockOutcome::MainChain { height }
        } else {
            chain.cache_side_block(block.clone());
            let tip_height = tip.map_or(0, |t| t.height);
            if height > tip_height {
                self.reorganize(&mut chain, &hash)?
            } else {
                debug!(height, hash = %hash, tip_height, "accepted side-chain block");
                BlockOutcome::SideChain { height }
            }
        };

        let pruned = chain.graph_mut().prune(self.config.node_retention_depth);
        if pruned > 0 {
            debug!(pruned, "pruned resident block nodes");
        }

        Ok(outcome)
    }

    /// Height the block would have, from its parent.
    fn resolve_height(&self, chain: &mut BlockChain, block: &Block) -> Result<u64, ForkViewError> {
        let hash = block.hash();
        let Some(parent) = block.header.parent_hash() else {
            if chain.best_tip().is_some() {
                return Err(BlockError::UnknownParent {
                    block: hash.to_string(),
                    parent: Hash256::ZERO.to_string(),
                }
                .into());
            }
            return Ok(0);
        };

        let db = Arc::clone(chain.db());
        match chain.graph_mut().load_node(db.as_ref(), &parent) {
            Ok(node) => Ok(node.height + 1),
            Err(ForkViewError::ChainGraph(ChainGraphError::NodeNotFound(_))) => Err(BlockError::UnknownParent {
                block: hash.to_string(),
                parent: parent.to_string(),
            }
            .into()),
            Err(e) => Err(e),
        }
    }

    /// Make the branch ending at `new_tip` the best chain in storage.
    fn reorganize(&self, chain: &mut BlockChain, new_tip: &Hash256) -> Result<BlockOutcome, ForkViewError> {
        let path = chain.reorganize_nodes(new_tip)?;
        let mut store = self.storage.write();

        if let Err(e) = apply_reorg(&mut store, chain, &path) {
            // Keep the tree's tip where storage actually is.
            let (_, stored_tip) = store.chain_tip()?;
            drop(store);
            if !stored_tip.is_zero() {
                let db = Arc::clone(chain.db());
                chain.graph_mut().load_node(db.as_ref(), &stored_tip)?;
                chain.graph_mut().set_best_tip(&stored_tip)?;
            }
            warn!(new_tip = %new_tip, error = %e, "reorganization failed");
            return Err(e);
        }

        chain.graph_mut().set_best_tip(new_tip)?;
        let height = store.chain_tip()?.0;
        let detached: Vec<Hash256> = path.detach.iter().map(|n| n.hash).collect();
        let attached: Vec<Hash256> = path.attach.iter().map(|n| n.hash).collect();
        info!(
            height,
            new_tip = %new_tip,
            detached = detached.len(),
            attached = attached.len(),
            "reorganized chain"
        );

        Ok(BlockOutcome::Reorganized { height, detached, attached })
    }

    /// Resolve `hashes` from the point of view of the tree node `node`.
    pub fn fetch_tx_list(&self, node: &Hash256, hashes: &[Hash256]) -> Result<TxStore, ForkViewError> {
        self.chain.lock().fetch_tx_list(node, hashes)
    }

    /// Resolve the inputs of `block`, whose tree node is `node`.
    pub fn fetch_input_transactions(&self, node: &Hash256, block: &Block) -> Result<TxStore, ForkViewError> {
        self.chain.lock().fetch_input_transactions(node, block)
    }

    /// Current best chain tip as `(height, hash)`.
    pub fn chain_tip(&self) -> Result<(u64, Hash256), ForkViewError> {
        self.storage.read().chain_tip()
    }

    /// Block by hash, from storage or the side-branch cache.
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, ForkViewError> {
        if let Some(block) = self.storage.read().fetch_block_by_hash(hash)? {
            return Ok(Some(block));
        }
        Ok(self.chain.lock().side_blocks().get(hash).cloned())
    }

    /// Number of side-branch bodies currently cached.
    pub fn side_block_count(&self) -> usize {
        self.chain.lock().side_blocks().len()
    }

    /// Flush storage to disk.
    pub fn flush(&self) -> Result<(), ForkViewError> {
        self.storage.read().flush()
    }

    /// The node's configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

/// Undo `path.detach` and redo `path.attach` in storage, then move bodies
/// between storage and the side-branch cache.
///
/// Every body is gathered before storage changes. A storage failure midway
/// reconnects the detached blocks, so storage ends on either the old tip or
/// the new one. The cache is only touched once storage is on the new tip.
fn apply_reorg(store: &mut RocksStore, chain: &mut BlockChain, path: &ReorgPath) -> Result<(), ForkViewError> {
    let detached = path
        .detach
        .iter()
        .map(|node| {
            store
                .fetch_block_by_hash(&node.hash)?
                .ok_or_else(|| ViewError::BlockNotFound(node.hash.to_string()).into())
        })
        .collect::<Result<Vec<Block>, ForkViewError>>()?;

    // Bodies detached before a restart are only in storage.
    let attached = path
        .attach
        .iter()
        .map(|node| match chain.side_blocks().get(&node.hash) {
            Some(block) => Ok(block.clone()),
            None => store
                .fetch_block_by_hash(&node.hash)?
                .ok_or_else(|| ViewError::SideBlockMissing(node.hash.to_string()).into()),
        })
        .collect::<Result<Vec<Block>, ForkViewError>>()?;

    for undone in 0..detached.len() {
        if let Err(e) = store.disconnect_tip() {
            restore_tip(store, path, &detached, undone, 0)?;
            return Err(e);
        }
    }
    for (done, (node, block)) in path.attach.iter().zip(&attached).enumerate() {
        if let Err(e) = store.connect_block(block, node.height) {
            restore_tip(store, path, &detached, detached.len(), done)?;
            return Err(e);
        }
    }

    for node in &path.attach {
        chain.side_blocks_mut().remove(&node.hash);
    }
    for block in detached {
        chain.cache_side_block(block);
    }
    Ok(())
}

/// Roll storage back to the tip it had before `apply_reorg` started:
/// disconnect `attached` branch blocks, then reconnect the first `undone`
/// detached blocks, oldest first.
fn restore_tip(
    store: &mut RocksStore,
    path: &ReorgPath,
    detached: &[Block],
    undone: usize,
    attached: usize,
) -> Result<(), ForkViewError> {
    for _ in 0..attached {
        store.disconnect_tip()?;
    }
    for (node, block) in path.detach.iter().zip(detached).take(undone).rev() {
        store.connect_block(block, node.height)?;
    }
    Ok(())
}

/// Every input must reference a found transaction and an existing, unspent
/// output, and no output may be spent twice within the block.
fn check_inputs(block: &Block, view: &TxStore) -> Result<(), ForkViewError> {
    let mut spent_here: HashSet<(Hash256, u64)> = HashSet::new();

    for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
        let txid = tx.txid()?;

        for input in &tx.inputs {
            let outpoint = &input.previous_output;
            let entry = view.get(&outpoint.txid);
            match entry.map(|e| &e.status) {
                Some(TxStatus::Found) => {}
                Some(TxStatus::Failed(reason)) => {
                    return Err(BlockError::LookupFailed {
                        txid: outpoint.txid.to_string(),
                        reason: reason.clone(),
                    }
                    .into());
                }
                Some(TxStatus::Missing) | None => {
                    return Err(BlockError::MissingInput {
                        txid: txid.to_string(),
                        outpoint: outpoint.to_string(),
                    }
                    .into());
                }
            }

            match entry.and_then(|e| e.is_spent(outpoint.index)) {
                None => {
                    return Err(BlockError::InvalidOutputIndex {
                        txid: txid.to_string(),
                        outpoint: outpoint.to_string(),
                    }
                    .into());
                }
                Some(true) => {
                    return Err(BlockError::DoubleSpend {
                        txid: txid.to_string(),
                        outpoint: outpoint.to_string(),
                    }
                    .into());
                }
                Some(false) => {}
            }

            if !spent_here.insert((outpoint.txid, outpoint.index)) {
                return Err(BlockError::DoubleSpend {
                    txid: txid.to_string(),
                    outpoint: outpoint.to_string(),
                }
                .into());
            }
        }
    }

    Ok(())
}
