//! Storage contract consumed by the view resolver.
//!
//! - [`ChainDb`] — read-only, main-chain-relative lookups (the in-memory
//!   [`MemoryChainStore`](crate::chain_state::MemoryChainStore) and the
//!   RocksDB store in forkview-node implement it)
//! - [`TxRecord`] / [`TxReply`] — what storage knows about one transaction

use serde::{Deserialize, Serialize};

use crate::error::ForkViewError;
use crate::types::{Block, BlockHeader, Hash256, Transaction};

/// Storage's record of a transaction on the best chain.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxRecord {
    /// Full transaction body.
    pub tx: Transaction,
    /// Height of the best-chain block that created it.
    pub block_height: u64,
    /// Spent flag per output, as of the best-chain tip.
    pub spent: Vec<bool>,
}

/// Outcome of looking up one hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxLookup {
    Found(TxRecord),
    Missing,
    Failed(String),
}

/// One entry of a bulk lookup reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReply {
    pub hash: Hash256,
    pub lookup: TxLookup,
}

/// Read-only view of persisted chain data, from the best-chain tip's point
/// of view.
///
/// Implementations may cache internally; callers copy what they keep.
pub trait ChainDb: Send + Sync {
    /// Look up each hash against the best chain. Replies may come back in
    /// any order and may omit hashes storage has never seen.
    fn fetch_tx_by_hash_list(&self, hashes: &[Hash256]) -> Result<Vec<TxReply>, ForkViewError>;

    /// Get a full block by its hash. Returns `None` if not found.
    fn fetch_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, ForkViewError>;

    /// Get a block header by its hash. Returns `None` if not found.
    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, ForkViewError>;

    /// Height of a stored block. Returns `None` if not found.
    fn get_block_height(&self, hash: &Hash256) -> Result<Option<u64>, ForkViewError>;

    /// Current chain tip as `(height, block_hash)`.
    ///
    /// Returns `(0, Hash256::ZERO)` if no blocks have been connected.
    fn chain_tip(&self) -> Result<(u64, Hash256), ForkViewError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MockChainDb {
        txs: HashMap<Hash256, TxRecord>,
        broken: Option<Hash256>,
    }

    impl ChainDb for MockChainDb {
        fn fetch_tx_by_hash_list(&self, hashes: &[Hash256]) -> Result<Vec<TxReply>, ForkViewError> {
            Ok(hashes
                .iter()
                .map(|hash| {
                    let lookup = if self.broken == Some(*hash) {
                        TxLookup::Failed("corrupt record".into())
                    } else {
                        self.txs.get(hash).cloned().map_or(TxLookup::Missing, TxLookup::Found)
                    };
                    TxReply { hash: *hash, lookup }
                })
                .collect())
        }

        fn fetch_block_by_hash(&self, _hash: &Hash256) -> Result<Option<Block>, ForkViewError> {
            Ok(None)
        }

        fn get_block_header(&self, _hash: &Hash256) -> Result<Option<BlockHeader>, ForkViewError> {
            Ok(None)
        }

        fn get_block_height(&self, _hash: &Hash256) -> Result<Option<u64>, ForkViewError> {
            Ok(None)
        }

        fn chain_tip(&self) -> Result<(u64, Hash256), ForkViewError> {
            Ok((0, Hash256::ZERO))
        }
    }

    fn _assert_chain_db_object_safe(db: &dyn ChainDb) {
        let _ = db.chain_tip();
    }

    #[test]
    fn bulk_lookup_reports_each_outcome() {
        let tx = Transaction { version: 1, inputs: vec![], outputs: vec![], lock_time: 0 };
        let record = TxRecord { tx, block_height: 3, spent: vec![] };
        let db = MockChainDb {
            txs: HashMap::from([(Hash256([1; 32]), record.clone())]),
            broken: Some(Hash256([3; 32])),
        };
        let dyn_db: &dyn ChainDb = &db;

        let replies = dyn_db
            .fetch_tx_by_hash_list(&[Hash256([1; 32]), Hash256([2; 32]), Hash256([3; 32])])
            .unwrap();
        assert_eq!(replies[0].lookup, TxLookup::Found(record));
        assert_eq!(replies[1].lookup, TxLookup::Missing);
        assert!(matches!(replies[2].lookup, TxLookup::Failed(_)));
    }
}
