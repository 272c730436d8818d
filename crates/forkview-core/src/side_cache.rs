//! Bounded cache of block bodies on branches not connected to the best chain.

use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::types::{Block, Hash256};

/// Least-recently-inserted eviction once `capacity` bodies are held.
#[derive(Clone, Debug)]
pub struct SideBlockCache {
    blocks: HashMap<Hash256, Block>,
    order: VecDeque<Hash256>,
    capacity: usize,
}

impl SideBlockCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, hash: &Hash256) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Insert a body keyed by its block hash, evicting the oldest entry when
    /// full. Re-inserting an existing hash refreshes its position.
    pub fn insert(&mut self, block: Block) {
        let hash = block.hash();
        if self.blocks.insert(hash, block).is_some() {
            self.order.retain(|h| *h != hash);
        }
        self.order.push_back(hash);

        while self.blocks.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.blocks.remove(&oldest);
            warn!(hash = %oldest, capacity = self.capacity, "evicted side block from cache");
        }
    }

    pub fn remove(&mut self, hash: &Hash256) -> Option<Block> {
        let block = self.blocks.remove(hash)?;
        self.order.retain(|h| h != hash);
        Some(block)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
