//! Mutable best-chain storage interface and in-memory implementation.
//!
//! [`ChainStore`] extends the read-only [`ChainDb`] with connecting and
//! disconnecting tip blocks. Each transaction on the best chain is kept as a
//! [`TxRecord`] whose spent bitmap reflects the current tip.
//!
//! The staging helpers [`stage_connect`] and [`stage_disconnect`] compute a
//! block's record changes against any record source without mutating it, so
//! implementations can commit them atomically (a `HashMap` update here, a
//! RocksDB `WriteBatch` in forkview-node).

use std::collections::HashMap;

use crate::error::{ChainStateError, ForkViewError};
use crate::traits::{ChainDb, TxLookup, TxRecord, TxReply};
use crate::types::{Block, BlockHeader, Hash256};

/// Result of connecting a block to the chain state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectBlockResult {
    /// Number of transaction records created.
    pub txs_created: usize,
    /// Number of outputs marked spent by the block's inputs.
    pub outputs_spent: usize,
}

/// Result of disconnecting the tip block from the chain state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisconnectBlockResult {
    /// Number of transaction records removed.
    pub txs_removed: usize,
    /// Number of outputs marked unspent again.
    pub outputs_restored: usize,
}

/// Record changes produced by staging one block.
#[derive(Clone, Debug, Default)]
pub struct StagedTxChanges {
    /// Records to write, keyed by txid.
    pub put: HashMap<Hash256, TxRecord>,
    /// Records to delete.
    pub delete: Vec<Hash256>,
    /// Outputs whose spent flag changed.
    pub outputs_touched: usize,
}

/// Compute the record changes of connecting `block` at `height`.
///
/// `load` fetches a currently stored record. Every non-coinbase input must
/// reference a known transaction (stored, or earlier in this block), an
/// existing output, and an unspent one.
pub fn stage_connect<F>(block: &Block, height: u64, mut load: F) -> Result<StagedTxChanges, ForkViewError>
where
    F: FnMut(&Hash256) -> Result<Option<TxRecord>, ForkViewError>,
{
    let mut staged = StagedTxChanges::default();

    for tx in &block.transactions {
        let txid = tx.txid()?;

        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let outpoint = &input.previous_output;
                if !staged.put.contains_key(&outpoint.txid) {
                    let record = load(&outpoint.txid)?
                        .ok_or_else(|| ChainStateError::MissingInputTx(outpoint.to_string()))?;
                    staged.put.insert(outpoint.txid, record);
                }
                let flag = staged
                    .put
                    .get_mut(&outpoint.txid)
                    .and_then(|record| {
                        usize::try_from(outpoint.index).ok().and_then(|i| record.spent.get_mut(i))
                    })
                    .ok_or_else(|| ChainStateError::OutputIndexOutOfRange(outpoint.to_string()))?;
                if *flag {
                    return Err(ChainStateError::AlreadySpent(outpoint.to_string()).into());
                }
                *flag = true;
                staged.outputs_touched += 1;
            }
        }

        staged.put.insert(
            txid,
            TxRecord {
                tx: tx.clone(),
                block_height: height,
                spent: vec![false; tx.outputs.len()],
            },
        );
    }

    Ok(staged)
}

/// Compute the record changes of disconnecting `block`, the current tip.
///
/// Walks transactions in reverse so spends of same-block outputs are undone
/// before the outputs' own records are deleted.
pub fn stage_disconnect<F>(block: &Block, mut load: F) -> Result<StagedTxChanges, ForkViewError>
where
    F: FnMut(&Hash256) -> Result<Option<TxRecord>, ForkViewError>,
{
    let mut staged = StagedTxChanges::default();

    for tx in block.transactions.iter().rev() {
        let txid = tx.txid()?;

        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let outpoint = &input.previous_output;
                if !staged.put.contains_key(&outpoint.txid) {
                    let record = load(&outpoint.txid)?
                        .ok_or_else(|| ChainStateError::MissingInputTx(outpoint.to_string()))?;
                    staged.put.insert(outpoint.txid, record);
                }
                if let Some(flag) = staged.put.get_mut(&outpoint.txid).and_then(|record| {
                    usize::try_from(outpoint.index).ok().and_then(|i| record.spent.get_mut(i))
                }) {
                    *flag = false;
                    staged.outputs_touched += 1;
                }
            }
        }

        staged.put.remove(&txid);
        staged.delete.push(txid);
    }

    Ok(staged)
}

/// Mutable best-chain storage.
///
/// Assumes blocks passed to [`connect_block`](ChainStore::connect_block)
/// passed structural validation elsewhere; the store itself only checks
/// linkage and spends.
///
/// Not thread-safe — callers should wrap in a `Mutex` or `RwLock` if
/// concurrent access is needed.
pub trait ChainStore: ChainDb {
    /// Connect a block on top of the current tip at the given height.
    ///
    /// # Errors
    ///
    /// - [`ChainStateError::HeightMismatch`] if `height` is not the expected next height
    /// - [`ChainStateError::PrevHashMismatch`] if the block does not build on the tip
    /// - [`ChainStateError::DuplicateBlock`] if the block is already on the best chain
    /// - spend errors from [`stage_connect`]; the store is left untouched
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, ForkViewError>;

    /// Disconnect the current tip block, reverting its records and spends.
    ///
    /// The block body stays retrievable by hash.
    ///
    /// # Errors
    ///
    /// - [`ChainStateError::EmptyChain`] if no blocks are connected
    /// - [`ChainStateError::BlockNotFound`] if the tip block is missing
    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, ForkViewError>;

    /// Number of transaction records on the best chain.
    fn tx_count(&self) -> usize;

    /// Whether no blocks have been connected.
    fn is_empty(&self) -> bool;
}

/// Check that `block` may be connected at `height` on top of `tip`.
pub fn check_extends_tip(
    block: &Block,
    height: u64,
    tip: (u64, Hash256),
) -> Result<(), ChainStateError> {
    let (tip_height, tip_hash) = tip;
    if tip_hash.is_zero() {
        if height != 0 {
            return Err(ChainStateError::HeightMismatch { expected: 0, got: height });
        }
        return Ok(());
    }
    if height != tip_height + 1 {
        return Err(ChainStateError::HeightMismatch { expected: tip_height + 1, got: height });
    }
    if block.header.prev_hash != tip_hash {
        return Err(ChainStateError::PrevHashMismatch {
            block: block.hash().to_string(),
            tip: tip_hash.to_string(),
        });
    }
    Ok(())
}

/// In-memory chain storage for testing.
///
/// Stores everything in `HashMap`s with no persistence.
pub struct MemoryChainStore {
    /// Best-chain transaction records by txid.
    txs: HashMap<Hash256, TxRecord>,
    /// Full blocks by hash, including disconnected ones.
    blocks: HashMap<Hash256, Block>,
    /// Height of every stored block.
    block_heights: HashMap<Hash256, u64>,
    /// Best-chain height → block hash.
    height_to_hash: HashMap<u64, Hash256>,
    tip_height: u64,
    /// `Hash256::ZERO` means empty chain.
    tip_hash: Hash256,
}

impl MemoryChainStore {
    /// Create a new empty chain store.
    pub fn new() -> Self {
        Self {
            txs: HashMap::new(),
            blocks: HashMap::new(),
            block_heights: HashMap::new(),
            height_to_hash: HashMap::new(),
            tip_height: 0,
            tip_hash: Hash256::ZERO,
        }
    }

    /// Number of full blocks stored.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Best-chain block hash at `height`.
    pub fn get_block_hash(&self, height: u64) -> Option<Hash256> {
        self.height_to_hash.get(&height).copied()
    }

    /// Store's own record for `txid`, without copying.
    pub fn tx_record(&self, txid: &Hash256) -> Option<&TxRecord> {
        self.txs.get(txid)
    }

    fn commit(&mut self, staged: StagedTxChanges) {
        for txid in &staged.delete {
            self.txs.remove(txid);
        }
        self.txs.extend(staged.put);
    }
}

impl Default for MemoryChainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainDb for MemoryChainStore {
    fn fetch_tx_by_hash_list(&self, hashes: &[Hash256]) -> Result<Vec<TxReply>, ForkViewError> {
        Ok(hashes
            .iter()
            .map(|hash| TxReply {
                hash: *hash,
                lookup: self
                    .txs
                    .get(hash)
                    .cloned()
                    .map_or(TxLookup::Missing, TxLookup::Found),
            })
            .collect())
    }

    fn fetch_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, ForkViewError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, ForkViewError> {
        Ok(self.blocks.get(hash).map(|b| b.header.clone()))
    }

    fn get_block_height(&self, hash: &Hash256) -> Result<Option<u64>, ForkViewError> {
        Ok(self.block_heights.get(hash).copied())
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), ForkViewError> {
        Ok((self.tip_height, self.tip_hash))
    }
}

impl ChainStore for MemoryChainStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, ForkViewError> {
        let block_hash = block.hash();
        if self.height_to_hash.values().any(|h| *h == block_hash) {
            return Err(ChainStateError::DuplicateBlock(block_hash.to_string()).into());
        }
        check_extends_tip(block, height, (self.tip_height, self.tip_hash))?;

        let staged = stage_connect(block, height, |txid| Ok(self.txs.get(txid).cloned()))?;
        let result = ConnectBlockResult {
            txs_created: block.transactions.len(),
            outputs_spent: staged.outputs_touched,
        };
        self.commit(staged);

        self.blocks.insert(block_hash, block.clone());
        self.block_heights.insert(block_hash, height);
        self.height_to_hash.insert(height, block_hash);
        self.tip_height = height;
        self.tip_hash = block_hash;

        Ok(result)
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, ForkViewError> {
        if self.tip_hash.is_zero() {
            return Err(ChainStateError::EmptyChain.into());
        }

        let tip_hash = self.tip_hash;
        let tip_height = self.tip_height;
        let block = self
            .blocks
            .get(&tip_hash)
            .cloned()
            .ok_or_else(|| ChainStateError::BlockNotFound(tip_hash.to_string()))?;

        let staged = stage_disconnect(&block, |txid| Ok(self.txs.get(txid).cloned()))?;
        let result = DisconnectBlockResult {
            txs_removed: staged.delete.len(),
            outputs_restored: staged.outputs_touched,
        };
        self.commit(staged);

        self.height_to_hash.remove(&tip_height);
        if tip_height == 0 {
            self.tip_height = 0;
            self.tip_hash = Hash256::ZERO;
        } else {
            self.tip_height = tip_height - 1;
            self.tip_hash = block.header.prev_hash;
        }

        Ok(result)
    }

    fn tx_count(&self) -> usize {
        self.txs.len()
    }

    fn is_empty(&self) -> bool {
        self.tip_hash.is_zero()
    }
}
