//! Point-of-view transaction lookup.
//!
//! Storage answers from the best tip's point of view. To answer from any
//! other node, start from storage's answer, undo the best-chain blocks past
//! the fork point, and redo the side-branch blocks leading to the node.

use std::collections::HashMap;

use tracing::debug;

use crate::blockchain::BlockChain;
use crate::error::{ForkViewError, ViewError};
use crate::traits::TxLookup;
use crate::types::{Block, Hash256, Transaction};
use crate::view::{TxData, TxStore, connect_transactions, disconnect_transactions};

impl BlockChain {
    /// Resolve `hashes` as seen by the block immediately before `node`,
    /// which is the view `node`'s own transactions are validated against.
    ///
    /// Every requested hash gets exactly one entry; unknown ones are marked
    /// missing. The result shares nothing with storage.
    ///
    /// # Errors
    ///
    /// - [`ChainGraphError::NodeNotFound`](crate::error::ChainGraphError::NodeNotFound)
    ///   if `node` or an ancestor cannot be materialized
    /// - [`ViewError::BlockNotFound`] if a best-chain block to undo is not stored
    /// - [`ViewError::SideBlockMissing`] if a side-branch block to redo is not cached
    /// - storage failures, unchanged
    pub fn fetch_tx_list(&mut self, node: &Hash256, hashes: &[Hash256]) -> Result<TxStore, ForkViewError> {
        let prev = self.graph.previous_node_of(self.db.as_ref(), node)?;

        let mut store = TxStore::with_missing(hashes);
        if hashes.is_empty() {
            return Ok(store);
        }

        for reply in self.db.fetch_tx_by_hash_list(hashes)? {
            let Some(entry) = store.get_mut(&reply.hash) else {
                continue;
            };
            *entry = match &reply.lookup {
                TxLookup::Found(record) => TxData::from_record(reply.hash, record),
                TxLookup::Missing => TxData::missing(reply.hash),
                TxLookup::Failed(reason) => TxData::failed(reply.hash, reason.clone()),
            };
        }

        let Some(tip) = self.graph.best_tip() else {
            return Ok(store);
        };
        let Some(prev) = prev else {
            // Nothing precedes genesis.
            return Ok(TxStore::with_missing(hashes));
        };
        if prev.hash == tip.hash {
            return Ok(store);
        }

        let path = self
            .fork_resolver
            .reorganize_nodes(&mut self.graph, self.db.as_ref(), &prev.hash)?;
        debug!(
            node = %node,
            requested = store.len(),
            detach = path.detach.len(),
            attach = path.attach.len(),
            "resolving transactions off the best tip"
        );

        for detached in &path.detach {
            let block = self
                .db
                .fetch_block_by_hash(&detached.hash)?
                .ok_or_else(|| ViewError::BlockNotFound(detached.hash.to_string()))?;
            disconnect_transactions(&mut store, &block)?;
        }

        if path.attach.is_empty() {
            return Ok(store);
        }

        for attached in &path.attach {
            let block = self
                .side_blocks
                .get(&attached.hash)
                .ok_or_else(|| ViewError::SideBlockMissing(attached.hash.to_string()))?;
            connect_transactions(&mut store, block, attached.height)?;
        }

        Ok(store)
    }

    /// Resolve every transaction referenced by the inputs of `block`, as seen
    /// from `node` (the block's own tree node).
    ///
    /// Inputs spending transactions of the same block are answered directly
    /// at `node`'s height with all outputs unspent, without touching storage.
    pub fn fetch_input_transactions(&mut self, node: &Hash256, block: &Block) -> Result<TxStore, ForkViewError> {
        let height = self.graph.load_node(self.db.as_ref(), node)?.height;

        let mut in_flight: HashMap<Hash256, &Transaction> = HashMap::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            in_flight.insert(tx.txid()?, tx);
        }

        let mut store = TxStore::new();
        let mut needed = Vec::new();
        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            for input in &tx.inputs {
                let origin = input.previous_output.txid;
                match in_flight.get(&origin) {
                    Some(origin_tx) => {
                        store.insert(TxData::created(origin, (*origin_tx).clone(), height));
                    }
                    None if !store.contains_key(&origin) => {
                        store.insert(TxData::missing(origin));
                        needed.push(origin);
                    }
                    None => {}
                }
            }
        }

        debug!(
            block = %block.hash(),
            in_flight = store.len() - needed.len(),
            needed = needed.len(),
            "fetching input transactions"
        );

        let fetched = self.fetch_tx_list(node, &needed)?;
        store.merge(fetched);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_state::{ChainStore, MemoryChainStore};
    use crate::error::ChainGraphError;
    use crate::graph::BlockNode;
    use crate::merkle;
    use crate::traits::{ChainDb, TxReply};
    use crate::types::{BlockHeader, OutPoint, TxInput, TxOutput};
    use crate::view::TxStatus;
    use std::sync::Arc;
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn coinbase(tag: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput { previous_output: OutPoint::null(), script_sig: vec![] }],
            outputs: vec![
                TxOutput { value: 25, pubkey_hash: Hash256([0xAA; 32]) },
                TxOutput { value: 25, pubkey_hash: Hash256([0xBB; 32]) },
            ],
            lock_time: tag,
        }
    }

    fn spend(outpoints: &[(Hash256, u64)], outputs: usize, tag: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: outpoints
                .iter()
                .map(|(txid, index)| TxInput {
                    previous_output: OutPoint { txid: *txid, index: *index },
                    script_sig: vec![1],
                })
                .collect(),
            outputs: (0..outputs)
                .map(|_| TxOutput { value: 1, pubkey_hash: Hash256([0xCC; 32]) })
                .collect(),
            lock_time: tag,
        }
    }

    fn block(prev_hash: Hash256, timestamp: u64, txs: Vec<Transaction>) -> Block {
        let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid().unwrap()).collect();
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash,
                merkle_root: merkle::merkle_root(&txids),
                timestamp,
                difficulty_target: u64::MAX,
                nonce: 0,
            },
            transactions: txs,
        }
    }

    fn txid(tx: &Transaction) -> Hash256 {
        tx.txid().unwrap()
    }

    /// Main chain M0..=M2; M2 spends output 0 of M0's coinbase.
    struct Fixture {
        store: MemoryChainStore,
        main: Vec<Block>,
        cb0: Hash256,
        m2_spend: Hash256,
    }

    fn fixture() -> Fixture {
        let mut store = MemoryChainStore::new();
        let cb0 = coinbase(0);
        let cb0_id = txid(&cb0);
        let m0 = block(Hash256::ZERO, 1_000, vec![cb0]);
        let m1 = block(m0.hash(), 1_060, vec![coinbase(1)]);
        let m2_tx = spend(&[(cb0_id, 0)], 1, 2);
        let m2_spend = txid(&m2_tx);
        let m2 = block(m1.hash(), 1_120, vec![coinbase(2), m2_tx]);
        for (height, b) in [&m0, &m1, &m2].into_iter().enumerate() {
            store.connect_block(b, height as u64).unwrap();
        }
        Fixture { store, main: vec![m0, m1, m2], cb0: cb0_id, m2_spend }
    }

    fn chain_over(store: MemoryChainStore) -> BlockChain {
        BlockChain::new(Arc::new(store), 16).unwrap()
    }

    /// Register a block as a side-branch node with its body cached.
    fn add_side(chain: &mut BlockChain, b: &Block, height: u64) -> Hash256 {
        chain.graph_mut().insert(BlockNode::from_header(&b.header, height));
        chain.cache_side_block(b.clone());
        b.hash()
    }

    /// Register a block extending the tip without connecting it.
    fn add_pending(chain: &mut BlockChain, b: &Block, height: u64) -> Hash256 {
        chain.graph_mut().insert(BlockNode::from_header(&b.header, height));
        b.hash()
    }

    // ------------------------------------------------------------------
    // fetch_tx_list
    // ------------------------------------------------------------------

    #[test]
    fn empty_request_is_empty_view() {
        let f = fixture();
        let tip = f.main[2].hash();
        let mut chain = chain_over(f.store);
        assert!(chain.fetch_tx_list(&tip, &[]).unwrap().is_empty());
    }

    #[test]
    fn extending_tip_uses_storage_view() {
        let f = fixture();
        let mut chain = chain_over(f.store);
        let next = block(f.main[2].hash(), 1_180, vec![coinbase(3)]);
        let node = add_pending(&mut chain, &next, 3);

        let unknown = Hash256([0x55; 32]);
        let view = chain.fetch_tx_list(&node, &[f.cb0, f.m2_spend, unknown]).unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(&f.cb0).unwrap().spent, vec![true, false]);
        assert_eq!(view.get(&f.m2_spend).unwrap().block_height, 2);
        assert_eq!(view.get(&unknown).unwrap().status, TxStatus::Missing);
    }

    #[test]
    fn main_chain_ancestor_undoes_later_blocks() {
        let f = fixture();
        let m2 = f.main[2].hash();
        let mut chain = chain_over(f.store);

        // M2's own point of view is M1: M2's spend and tx are not there yet.
        let view = chain.fetch_tx_list(&m2, &[f.cb0, f.m2_spend]).unwrap();
        assert_eq!(view.get(&f.cb0).unwrap().spent, vec![false, false]);
        assert_eq!(view.get(&f.m2_spend).unwrap().status, TxStatus::Missing);
    }

    #[test]
    fn side_branch_view_applies_side_blocks() {
        let f = fixture();
        let mut chain = chain_over(f.store);

        // S2 forks off M1 and spends output 1 of M0's coinbase instead.
        let s2_tx = spend(&[(f.cb0, 1)], 2, 20);
        let s2_id = txid(&s2_tx);
        let s2 = block(f.main[1].hash(), 1_121, vec![coinbase(20), s2_tx]);
        add_side(&mut chain, &s2, 2);
        let s3 = block(s2.hash(), 1_181, vec![coinbase(30)]);
        let s3_hash = add_side(&mut chain, &s3, 3);

        let view = chain.fetch_tx_list(&s3_hash, &[f.cb0, f.m2_spend, s2_id]).unwrap();
        assert_eq!(view.get(&f.cb0).unwrap().spent, vec![false, true]);
        assert_eq!(view.get(&f.m2_spend).unwrap().status, TxStatus::Missing);
        let s2_entry = view.get(&s2_id).unwrap();
        assert!(s2_entry.is_found());
        assert_eq!(s2_entry.block_height, 2);
        assert_eq!(s2_entry.spent, vec![false, false]);
    }

    #[test]
    fn genesis_sees_nothing() {
        let f = fixture();
        let m0 = f.main[0].hash();
        let mut chain = chain_over(f.store);
        let view = chain.fetch_tx_list(&m0, &[f.cb0]).unwrap();
        assert_eq!(view.get(&f.cb0).unwrap().status, TxStatus::Missing);
    }

    #[test]
    fn unknown_node_errors() {
        let f = fixture();
        let mut chain = chain_over(f.store);
        let err = chain.fetch_tx_list(&Hash256([0x99; 32]), &[f.cb0]).unwrap_err();
        assert!(matches!(err, ForkViewError::ChainGraph(ChainGraphError::NodeNotFound(_))));
    }

    #[test]
    fn evicted_side_block_is_reported() {
        let f = fixture();
        let mut chain = chain_over(f.store);
        let s2 = block(f.main[1].hash(), 1_121, vec![coinbase(20)]);
        let s2_hash = add_side(&mut chain, &s2, 2);
        let s3 = block(s2_hash, 1_181, vec![coinbase(30)]);
        let s3_hash = add_side(&mut chain, &s3, 3);
        chain.side_blocks_mut().remove(&s2_hash);

        let err = chain.fetch_tx_list(&s3_hash, &[f.cb0]).unwrap_err();
        assert!(matches!(err, ForkViewError::View(ViewError::SideBlockMissing(h)) if h == s2_hash.to_string()));
    }

    /// Wraps a store and can hide block bodies or fail bulk lookups.
    struct Faulty {
        inner: MemoryChainStore,
        hide_blocks: bool,
        failing_tx: Option<Hash256>,
        fail_bulk: bool,
        bulk_requests: Mutex<Vec<Vec<Hash256>>>,
    }

    impl Faulty {
        fn new(inner: MemoryChainStore) -> Self {
            Self { inner, hide_blocks: false, failing_tx: None, fail_bulk: false, bulk_requests: Mutex::new(vec![]) }
        }
    }

    impl ChainDb for Faulty {
        fn fetch_tx_by_hash_list(&self, hashes: &[Hash256]) -> Result<Vec<TxReply>, ForkViewError> {
            self.bulk_requests.lock().unwrap().push(hashes.to_vec());
            if self.fail_bulk {
                return Err(ForkViewError::Storage("read timed out".into()));
            }
            let mut replies = self.inner.fetch_tx_by_hash_list(hashes)?;
            for reply in &mut replies {
                if Some(reply.hash) == self.failing_tx {
                    reply.lookup = TxLookup::Failed("checksum mismatch".into());
                }
            }
            Ok(replies)
        }

        fn fetch_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, ForkViewError> {
            if self.hide_blocks {
                return Ok(None);
            }
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

    #[test]
    fn missing_detach_block_is_reported() {
        let f = fixture();
        let m2 = f.main[2].hash();
        let mut db = Faulty::new(f.store);
        db.hide_blocks = true;
        let mut chain = BlockChain::new(Arc::new(db), 16).unwrap();

        let err = chain.fetch_tx_list(&m2, &[f.cb0]).unwrap_err();
        assert!(matches!(err, ForkViewError::View(ViewError::BlockNotFound(_))));
    }

    #[test]
    fn storage_failure_aborts_lookup() {
        let f = fixture();
        let m2 = f.main[2].hash();
        let mut db = Faulty::new(f.store);
        db.fail_bulk = true;
        let mut chain = BlockChain::new(Arc::new(db), 16).unwrap();

        let err = chain.fetch_tx_list(&m2, &[f.cb0]).unwrap_err();
        assert!(matches!(err, ForkViewError::Storage(_)));
    }

    #[test]
    fn per_hash_failure_is_a_status() {
        let f = fixture();
        let mut db = Faulty::new(f.store);
        db.failing_tx = Some(f.cb0);
        let mut chain = BlockChain::new(Arc::new(db), 16).unwrap();
        let next = block(f.main[2].hash(), 1_180, vec![coinbase(3)]);
        let node = add_pending(&mut chain, &next, 3);

        let view = chain.fetch_tx_list(&node, &[f.cb0, f.m2_spend]).unwrap();
        assert_eq!(view.get(&f.cb0).unwrap().status, TxStatus::Failed("checksum mismatch".into()));
        assert!(view.get(&f.m2_spend).unwrap().is_found());
    }

    // ------------------------------------------------------------------
    // fetch_input_transactions
    // ------------------------------------------------------------------

    #[test]
    fn inputs_resolve_stored_and_in_flight() {
        let f = fixture();
        let db = Arc::new(Faulty::new(f.store));
        let mut chain = BlockChain::new(db.clone(), 16).unwrap();

        let parent_tx = spend(&[(f.cb0, 1)], 2, 3);
        let parent_id = txid(&parent_tx);
        let child_tx = spend(&[(parent_id, 0), (f.m2_spend, 0)], 1, 4);
        let next = block(f.main[2].hash(), 1_180, vec![coinbase(3), parent_tx, child_tx]);
        let node = add_pending(&mut chain, &next, 3);

        let view = chain.fetch_input_transactions(&node, &next).unwrap();
        assert_eq!(view.len(), 3);

        let in_flight = view.get(&parent_id).unwrap();
        assert_eq!(in_flight.block_height, 3);
        assert_eq!(in_flight.spent, vec![false, false]);
        assert_eq!(view.get(&f.cb0).unwrap().spent, vec![true, false]);
        assert!(view.get(&f.m2_spend).unwrap().is_found());

        let requests = db.bulk_requests.lock().unwrap();
        assert!(requests.iter().all(|hashes| !hashes.contains(&parent_id)));
    }

    #[test]
    fn input_to_unknown_tx_is_missing() {
        let f = fixture();
        let mut chain = chain_over(f.store);
        let ghost = Hash256([0x66; 32]);
        let next = block(f.main[2].hash(), 1_180, vec![coinbase(3), spend(&[(ghost, 0)], 1, 5)]);
        let node = add_pending(&mut chain, &next, 3);

        let view = chain.fetch_input_transactions(&node, &next).unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view.get(&ghost).unwrap().status, TxStatus::Missing);
    }

    #[test]
    fn coinbase_only_block_needs_nothing() {
        let f = fixture();
        let mut chain = chain_over(f.store);
        let next = block(f.main[2].hash(), 1_180, vec![coinbase(3)]);
        let node = add_pending(&mut chain, &next, 3);
        assert!(chain.fetch_input_transactions(&node, &next).unwrap().is_empty());
    }
}
