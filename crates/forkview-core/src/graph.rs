//! Block tree arena with lazy ancestor materialization.
//!
//! Nodes are keyed by block hash and link to their parent by hash. Only the
//! working set stays resident: ancestors that are not in memory are rebuilt
//! from storage (header + height) the first time something walks past them.

use std::collections::HashMap;

use tracing::trace;

use crate::error::{ChainGraphError, ForkViewError};
use crate::traits::ChainDb;
use crate::types::{BlockHeader, Hash256};

/// One block's position in the tree. Immutable once built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockNode {
    pub hash: Hash256,
    pub height: u64,
    /// `None` only for genesis.
    pub parent: Option<Hash256>,
}

impl BlockNode {
    pub fn new(hash: Hash256, height: u64, parent: Option<Hash256>) -> Self {
        Self { hash, height, parent }
    }

    /// Node for a block with the given header at `height`.
    pub fn from_header(header: &BlockHeader, height: u64) -> Self {
        Self::new(header.hash(), height, header.parent_hash())
    }

    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }
}

/// Arena of resident [`BlockNode`]s plus the best-chain tip.
#[derive(Clone, Debug, Default)]
pub struct ChainGraph {
    nodes: HashMap<Hash256, BlockNode>,
    best_tip: Option<Hash256>,
}

impl ChainGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph whose best tip is storage's current tip, materialized.
    /// An empty store yields an empty graph with no tip.
    pub fn from_db(db: &dyn ChainDb) -> Result<Self, ForkViewError> {
        let mut graph = Self::new();
        let (_, tip_hash) = db.chain_tip()?;
        if !tip_hash.is_zero() {
            graph.load_node(db, &tip_hash)?;
            graph.best_tip = Some(tip_hash);
        }
        Ok(graph)
    }

    /// Insert or replace a node. Returns the previous node with that hash.
    pub fn insert(&mut self, node: BlockNode) -> Option<BlockNode> {
        self.nodes.insert(node.hash, node)
    }

    /// Remove a node. Removing the best tip also clears the tip.
    pub fn remove(&mut self, hash: &Hash256) -> Option<BlockNode> {
        if self.best_tip == Some(*hash) {
            self.best_tip = None;
        }
        self.nodes.remove(hash)
    }

    pub fn node(&self, hash: &Hash256) -> Option<&BlockNode> {
        self.nodes.get(hash)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current best-chain tip, if a block has been processed.
    pub fn best_tip(&self) -> Option<BlockNode> {
        self.best_tip.and_then(|hash| self.nodes.get(&hash).copied())
    }

    /// Make a resident node the best tip.
    pub fn set_best_tip(&mut self, hash: &Hash256) -> Result<(), ChainGraphError> {
        if !self.nodes.contains_key(hash) {
            return Err(ChainGraphError::NodeNotFound(hash.to_string()));
        }
        self.best_tip = Some(*hash);
        Ok(())
    }

    /// Return the node for `hash`, building it from storage if it is not
    /// resident.
    ///
    /// # Errors
    ///
    /// [`ChainGraphError::NodeNotFound`] if storage has no header or height
    /// for `hash`; storage failures propagate unchanged.
    pub fn load_node(&mut self, db: &dyn ChainDb, hash: &Hash256) -> Result<BlockNode, ForkViewError> {
        if let Some(node) = self.nodes.get(hash) {
            return Ok(*node);
        }

        let header = db
            .get_block_header(hash)?
            .ok_or_else(|| ChainGraphError::NodeNotFound(hash.to_string()))?;
        let height = db
            .get_block_height(hash)?
            .ok_or_else(|| ChainGraphError::NodeNotFound(hash.to_string()))?;

        let node = BlockNode::new(*hash, height, header.parent_hash());
        trace!(hash = %hash, height, "materialized block node");
        self.nodes.insert(*hash, node);
        Ok(node)
    }

    /// Parent of the node `hash`, materializing it on demand.
    ///
    /// Returns `Ok(None)` for genesis.
    pub fn previous_node_of(
        &mut self,
        db: &dyn ChainDb,
        hash: &Hash256,
    ) -> Result<Option<BlockNode>, ForkViewError> {
        let node = self.load_node(db, hash)?;
        match node.parent {
            None => Ok(None),
            Some(parent) => self.load_node(db, &parent).map(Some),
        }
    }

    /// Drop resident nodes more than `keep_depth` blocks below the best tip.
    /// The tip itself always stays. Returns the number of nodes dropped.
    pub fn prune(&mut self, keep_depth: u64) -> usize {
        let Some(tip) = self.best_tip() else {
            return 0;
        };
        let Some(cutoff) = tip.height.checked_sub(keep_depth) else {
            return 0;
        };

        let before = self.nodes.len();
        self.nodes
            .retain(|hash, node| node.height >= cutoff || *hash == tip.hash);
        before - self.nodes.len()
    }
}
