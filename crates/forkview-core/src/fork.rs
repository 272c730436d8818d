//! Fork resolution: the path between the best tip and another node.

use tracing::trace;

use crate::error::{ChainGraphError, ForkViewError};
use crate::graph::{BlockNode, ChainGraph};
use crate::traits::ChainDb;
use crate::types::Hash256;

/// Blocks to undo and redo to move the best-chain view to another node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReorgPath {
    /// Best-chain nodes after the fork point up to the tip, newest first.
    pub detach: Vec<BlockNode>,
    /// Nodes after the fork point up to the target, oldest first.
    pub attach: Vec<BlockNode>,
}

impl ReorgPath {
    pub fn is_empty(&self) -> bool {
        self.detach.is_empty() && self.attach.is_empty()
    }

    /// Hash of the last node to attach, if any.
    pub fn attach_tip(&self) -> Option<Hash256> {
        self.attach.last().map(|n| n.hash)
    }
}

/// Computes the [`ReorgPath`] from the graph's best tip to `target`.
pub trait ForkResolver: Send + Sync {
    fn reorganize_nodes(
        &self,
        graph: &mut ChainGraph,
        db: &dyn ChainDb,
        target: &Hash256,
    ) -> Result<ReorgPath, ForkViewError>;
}

/// Walks both nodes back by height until they meet at their lowest common
/// ancestor.
#[derive(Clone, Copy, Debug, Default)]
pub struct AncestorWalk;

impl ForkResolver for AncestorWalk {
    fn reorganize_nodes(
        &self,
        graph: &mut ChainGraph,
        db: &dyn ChainDb,
        target: &Hash256,
    ) -> Result<ReorgPath, ForkViewError> {
        let mut path = ReorgPath::default();
        let mut side = graph.load_node(db, target)?;

        let Some(mut main) = graph.best_tip() else {
            // No best chain: everything from genesis to the target attaches.
            loop {
                path.attach.push(side);
                match graph.previous_node_of(db, &side.hash)? {
                    Some(parent) => side = parent,
                    None => break,
                }
            }
            path.attach.reverse();
            return Ok(path);
        };

        let tip_hash = main.hash;
        let step = |graph: &mut ChainGraph, node: &BlockNode| -> Result<BlockNode, ForkViewError> {
            graph.previous_node_of(db, &node.hash)?.ok_or_else(|| {
                ChainGraphError::NoCommonAncestor(tip_hash.to_string(), target.to_string()).into()
            })
        };

        while main.height > side.height {
            path.detach.push(main);
            main = step(graph, &main)?;
        }
        while side.height > main.height {
            path.attach.push(side);
            side = step(graph, &side)?;
        }
        while main.hash != side.hash {
            path.detach.push(main);
            path.attach.push(side);
            main = step(graph, &main)?;
            side = step(graph, &side)?;
        }
        path.attach.reverse();

        trace!(
            fork_point = %main.hash,
            detach = path.detach.len(),
            attach = path.attach.len(),
            "resolved fork path"
        );
        Ok(path)
    }
}
