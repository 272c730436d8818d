//! Shared test helpers for integration and property tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use forkview_core::blockchain::BlockChain;
use forkview_core::chain_state::{ChainStore, MemoryChainStore};
use forkview_core::error::ForkViewError;
use forkview_core::fork::{AncestorWalk, ForkResolver, ReorgPath};
use forkview_core::graph::{BlockNode, ChainGraph};
use forkview_core::merkle;
use forkview_core::traits::{ChainDb, TxReply};
use forkview_core::types::*;

/// Simple pubkey hash from a seed byte.
pub fn pkh(seed: u8) -> Hash256 {
    Hash256([seed; 32])
}

/// Create a coinbase with `outputs` equal outputs and a height marker.
///
/// The marker in `lock_time` and `script_sig` gives every coinbase a
/// distinct txid per height.
pub fn make_coinbase(value: u64, pubkey_hash: Hash256, height: u64, outputs: usize) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
        }],
        outputs: (0..outputs).map(|_| TxOutput { value, pubkey_hash }).collect(),
        lock_time: height,
    }
}

/// Create a spending transaction.
pub fn make_tx(inputs: Vec<OutPoint>, outputs: Vec<(u64, Hash256)>) -> Transaction {
    Transaction {
        version: 1,
        inputs: inputs
            .into_iter()
            .map(|op| TxInput {
                previous_output: op,
                script_sig: vec![0; 64],
            })
            .collect(),
        outputs: outputs
            .into_iter()
            .map(|(value, pubkey_hash)| TxOutput { value, pubkey_hash })
            .collect(),
        lock_time: 0,
    }
}

/// Create a block with correct merkle root.
pub fn make_block(prev_hash: Hash256, timestamp: u64, txs: Vec<Transaction>) -> Block {
    let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid().unwrap()).collect();
    let mr = merkle::merkle_root(&txids);
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: mr,
            timestamp,
            difficulty_target: u64::MAX,
            nonce: 0,
        },
        transactions: txs,
    }
}

pub fn txid(tx: &Transaction) -> Hash256 {
    tx.txid().unwrap()
}

/// Outpoint `index` of `tx`.
pub fn outpoint(tx: &Transaction, index: u64) -> OutPoint {
    OutPoint { txid: txid(tx), index }
}

/// Connect `len` coinbase-only blocks (two outputs each) from genesis.
pub fn build_main_chain(store: &mut impl ChainStore, len: u64) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for height in 0..len {
        let prev = blocks.last().map_or(Hash256::ZERO, Block::hash);
        let block = make_block(prev, 1_000 + height * 60, vec![make_coinbase(50, pkh(0xAA), height, 2)]);
        store.connect_block(&block, height).unwrap();
        blocks.push(block);
    }
    blocks
}

/// A branch block on top of `parent`, with its own coinbase plus `txs`.
///
/// The timestamp offset keeps branch hashes apart from main-chain hashes.
pub fn make_branch_block(parent: &Block, height: u64, branch: u8, txs: Vec<Transaction>) -> Block {
    let mut all = vec![make_coinbase(50, pkh(branch), height, 1)];
    all.extend(txs);
    make_block(parent.hash(), parent.header.timestamp + 60 + u64::from(branch), all)
}

/// Register a branch block with the tree and the side-block cache.
pub fn add_side_block(chain: &mut BlockChain, block: &Block, height: u64) {
    chain.graph_mut().insert(BlockNode::from_header(&block.header, height));
    chain.cache_side_block(block.clone());
}

/// Register a tree node for `block` without caching its body.
///
/// Models a block under validation: its node exists but nothing stores it.
pub fn add_pending_node(chain: &mut BlockChain, block: &Block, height: u64) {
    chain.graph_mut().insert(BlockNode::from_header(&block.header, height));
}

/// An in-memory store holding `len` main-chain blocks, plus the blocks.
pub fn memory_chain(len: u64) -> (Arc<MemoryChainStore>, Vec<Block>) {
    let mut store = MemoryChainStore::new();
    let blocks = build_main_chain(&mut store, len);
    (Arc::new(store), blocks)
}

/// Fork resolver that counts invocations and remembers the last path.
#[derive(Default)]
pub struct CountingResolver {
    calls: Arc<AtomicUsize>,
    last_path: Arc<Mutex<Option<ReorgPath>>>,
}

impl CountingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the call counter, usable after the resolver is boxed.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Handle to the most recently computed path.
    pub fn last_path(&self) -> Arc<Mutex<Option<ReorgPath>>> {
        Arc::clone(&self.last_path)
    }
}

impl ForkResolver for CountingResolver {
    fn reorganize_nodes(
        &self,
        graph: &mut ChainGraph,
        db: &dyn ChainDb,
        target: &Hash256,
    ) -> Result<ReorgPath, ForkViewError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = AncestorWalk.reorganize_nodes(graph, db, target)?;
        *self.last_path.lock() = Some(path.clone());
        Ok(path)
    }
}

/// `ChainDb` wrapper recording every hash passed to the bulk lookup.
pub struct RecordingDb<D> {
    inner: D,
    requested: Mutex<Vec<Hash256>>,
}

impl<D: ChainDb> RecordingDb<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Every hash requested so far, in request order.
    pub fn requested(&self) -> Vec<Hash256> {
        self.requested.lock().clone()
    }
}

impl<D: ChainDb> ChainDb for RecordingDb<D> {
    fn fetch_tx_by_hash_list(&self, hashes: &[Hash256]) -> Result<Vec<TxReply>, ForkViewError> {
        self.requested.lock().extend_from_slice(hashes);
        self.inner.fetch_tx_by_hash_list(hashes)
    }

    fn fetch_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, ForkViewError> {
        self.inner.fetch_block_by_hash(hash)
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, ForkViewError> {
        self.inner.get_block_header(hash)
    }

    fn get_block_height(&self, hash: &Hash256) -> Result<Option<u64>, ForkViewError> {
        self.inner.get_block_height(hash)
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), ForkViewError> {
        self.inner.chain_tip()
    }
}
