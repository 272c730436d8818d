//! Point-of-view transaction state and the block mutators that move it.
//!
//! A [`TxStore`] maps transaction hashes to [`TxData`] as seen from one node
//! of the block tree. It is built fresh for every request and owned by the
//! caller; nothing in it aliases storage buffers.
//!
//! [`connect_transactions`] applies one block's effects to a store and
//! [`disconnect_transactions`] undoes them. Only keys already present in the
//! store are touched, so a store answers exactly the questions it was built
//! for.

use std::collections::HashMap;
use std::collections::hash_map;

use serde::Serialize;

use crate::error::TransactionError;
use crate::traits::TxRecord;
use crate::types::{Block, Hash256, OutPoint, Transaction};

/// Lookup status of a [`TxData`] entry.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TxStatus {
    /// The transaction exists from this point of view.
    Found,
    /// The transaction does not exist from this point of view.
    Missing,
    /// Storage reported an error for this particular hash.
    Failed(String),
}

/// Contextual information about one transaction: the block height that
/// created it and which of its outputs are spent.
///
/// `tx`, `block_height` and `spent` are only meaningful when `status` is
/// [`TxStatus::Found`]; in that case `spent.len()` equals the output count.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TxData {
    pub hash: Hash256,
    pub tx: Option<Transaction>,
    pub block_height: u64,
    pub spent: Vec<bool>,
    pub status: TxStatus,
}

impl TxData {
    /// Placeholder for a hash this view knows nothing about.
    pub fn missing(hash: Hash256) -> Self {
        Self {
            hash,
            tx: None,
            block_height: 0,
            spent: Vec::new(),
            status: TxStatus::Missing,
        }
    }

    /// A transaction first recorded at `block_height`, all outputs unspent.
    pub fn created(hash: Hash256, tx: Transaction, block_height: u64) -> Self {
        let spent = vec![false; tx.outputs.len()];
        Self {
            hash,
            tx: Some(tx),
            block_height,
            spent,
            status: TxStatus::Found,
        }
    }

    /// Copy a storage record into an owned entry.
    pub fn from_record(hash: Hash256, record: &TxRecord) -> Self {
        Self {
            hash,
            tx: Some(record.tx.clone()),
            block_height: record.block_height,
            spent: record.spent.to_vec(),
            status: TxStatus::Found,
        }
    }

    /// Entry for a hash whose lookup failed in storage.
    pub fn failed(hash: Hash256, reason: impl Into<String>) -> Self {
        Self {
            status: TxStatus::Failed(reason.into()),
            ..Self::missing(hash)
        }
    }

    pub fn is_found(&self) -> bool {
        self.status == TxStatus::Found
    }

    /// Spent flag of output `index`, or `None` if the entry is not found or
    /// the output does not exist.
    pub fn is_spent(&self, index: u64) -> Option<bool> {
        if !self.is_found() {
            return None;
        }
        usize::try_from(index)
            .ok()
            .and_then(|i| self.spent.get(i))
            .copied()
    }

    fn set_spent(&mut self, index: u64, spent: bool) {
        if let Some(flag) = usize::try_from(index).ok().and_then(|i| self.spent.get_mut(i)) {
            *flag = spent;
        }
    }

    fn reset_missing(&mut self) {
        self.tx = None;
        self.block_height = 0;
        self.spent.clear();
        self.status = TxStatus::Missing;
    }
}

/// Transaction hash → [`TxData`] as seen from one node of the block tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxStore {
    entries: HashMap<Hash256, TxData>,
}

impl TxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with one [`TxStatus::Missing`] entry per hash.
    pub fn with_missing<'a>(hashes: impl IntoIterator<Item = &'a Hash256>) -> Self {
        let entries = hashes
            .into_iter()
            .map(|hash| (*hash, TxData::missing(*hash)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, hash: &Hash256) -> Option<&TxData> {
        self.entries.get(hash)
    }

    pub fn get_mut(&mut self, hash: &Hash256) -> Option<&mut TxData> {
        self.entries.get_mut(hash)
    }

    /// Insert or replace the entry keyed by `data.hash`.
    pub fn insert(&mut self, data: TxData) -> Option<TxData> {
        self.entries.insert(data.hash, data)
    }

    pub fn contains_key(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Hash256> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash256, &TxData)> {
        self.entries.iter()
    }

    /// Overwrite entries with those of `other`.
    pub fn merge(&mut self, other: TxStore) {
        self.entries.extend(other.entries);
    }

    /// Set the spent flag of the output `outpoint` refers to, if its
    /// transaction is tracked by this store.
    fn set_spent(&mut self, outpoint: &OutPoint, spent: bool) {
        if let Some(origin) = self.entries.get_mut(&outpoint.txid) {
            origin.set_spent(outpoint.index, spent);
        }
    }
}

impl IntoIterator for TxStore {
    type Item = (Hash256, TxData);
    type IntoIter = hash_map::IntoIter<Hash256, TxData>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Apply the creation and spend effects of `block` (connected at `height`)
/// to the tracked entries of `store`.
pub fn connect_transactions(
    store: &mut TxStore,
    block: &Block,
    height: u64,
) -> Result<(), TransactionError> {
    for tx in &block.transactions {
        let txid = tx.txid()?;
        if let Some(entry) = store.get_mut(&txid) {
            *entry = TxData::created(txid, tx.clone(), height);
        }

        for input in &tx.inputs {
            store.set_spent(&input.previous_output, true);
        }
    }
    Ok(())
}

/// Undo the effects of `block` on `store`.
///
/// Entries for the block's own transactions revert to missing: from the
/// parent's point of view they were never created. The key stays, so a
/// store still answers for every hash it was built with.
pub fn disconnect_transactions(store: &mut TxStore, block: &Block) -> Result<(), TransactionError> {
    for tx in &block.transactions {
        let txid = tx.txid()?;
        if let Some(entry) = store.get_mut(&txid) {
            entry.reset_missing();
        }

        for input in &tx.inputs {
            store.set_spent(&input.previous_output, false);
        }
    }
    Ok(())
}
