//! The block tree plus everything a point-of-view lookup needs.

use std::fmt;
use std::sync::Arc;

use crate::error::ForkViewError;
use crate::fork::{AncestorWalk, ForkResolver, ReorgPath};
use crate::graph::{BlockNode, ChainGraph};
use crate::side_cache::SideBlockCache;
use crate::traits::ChainDb;
use crate::types::{Block, Hash256};

/// Owns the [`ChainGraph`], the [`SideBlockCache`] and the fork resolver,
/// and reads persisted data through a shared [`ChainDb`].
///
/// Lookups take `&mut self`: ancestor materialization grows the graph, and
/// the graph must not change shape underneath a running lookup.
pub struct BlockChain {
    pub(crate) db: Arc<dyn ChainDb>,
    pub(crate) graph: ChainGraph,
    pub(crate) side_blocks: SideBlockCache,
    pub(crate) fork_resolver: Box<dyn ForkResolver>,
}

impl BlockChain {
    /// Build over `db`, starting from its current tip.
    pub fn new(db: Arc<dyn ChainDb>, side_block_capacity: usize) -> Result<Self, ForkViewError> {
        let graph = ChainGraph::from_db(db.as_ref())?;
        Ok(Self {
            db,
            graph,
            side_blocks: SideBlockCache::new(side_block_capacity),
            fork_resolver: Box::new(AncestorWalk),
        })
    }

    /// Replace the fork resolver.
    pub fn with_fork_resolver(mut self, resolver: Box<dyn ForkResolver>) -> Self {
        self.fork_resolver = resolver;
        self
    }

    pub fn db(&self) -> &Arc<dyn ChainDb> {
        &self.db
    }

    pub fn graph(&self) -> &ChainGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ChainGraph {
        &mut self.graph
    }

    pub fn side_blocks(&self) -> &SideBlockCache {
        &self.side_blocks
    }

    pub fn side_blocks_mut(&mut self) -> &mut SideBlockCache {
        &mut self.side_blocks
    }

    pub fn best_tip(&self) -> Option<BlockNode> {
        self.graph.best_tip()
    }

    /// Keep a side-branch block body available for later lookups.
    pub fn cache_side_block(&mut self, block: Block) {
        self.side_blocks.insert(block);
    }

    /// Path from the best tip to `target`, through the configured resolver.
    pub fn reorganize_nodes(&mut self, target: &Hash256) -> Result<ReorgPath, ForkViewError> {
        self.fork_resolver
            .reorganize_nodes(&mut self.graph, self.db.as_ref(), target)
    }
}

impl fmt::Debug for BlockChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockChain")
            .field("best_tip", &self.graph.best_tip())
            .field("resident_nodes", &self.graph.len())
            .field("side_blocks", &self.side_blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_state::{ChainStore, MemoryChainStore};
    use crate::types::{BlockHeader, OutPoint, Transaction, TxInput, TxOutput};

    fn genesis() -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: Hash256::ZERO,
                merkle_root: Hash256::ZERO,
                timestamp: 1_000,
                difficulty_target: u64::MAX,
                nonce: 0,
            },
            transactions: vec![Transaction {
                version: 1,
                inputs: vec![TxInput { previous_output: OutPoint::null(), script_sig: vec![] }],
                outputs: vec![TxOutput { value: 50, pubkey_hash: Hash256::ZERO }],
                lock_time: 0,
            }],
        }
    }

    #[test]
    fn new_over_empty_store_has_no_tip() {
        let chain = BlockChain::new(Arc::new(MemoryChainStore::new()), 8).unwrap();
        assert!(chain.best_tip().is_none());
        assert_eq!(chain.side_blocks().capacity(), 8);
    }

    #[test]
    fn new_picks_up_stored_tip() {
        let mut store = MemoryChainStore::new();
        let block = genesis();
        store.connect_block(&block, 0).unwrap();

        let chain = BlockChain::new(Arc::new(store), 8).unwrap();
        let tip = chain.best_tip().unwrap();
        assert_eq!(tip.hash, block.hash());
        assert!(tip.is_genesis());
    }

    #[test]
    fn cache_side_block_is_retrievable() {
        let mut chain = BlockChain::new(Arc::new(MemoryChainStore::new()), 8).unwrap();
        let block = genesis();
        chain.cache_side_block(block.clone());
        assert_eq!(chain.side_blocks().get(&block.hash()), Some(&block));
        assert!(format!("{chain:?}").contains("side_blocks: 1"));
    }
}
