//! Error types for block-tree tracking and view resolution.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainGraphError {
    #[error("block node not found: {0}")] NodeNotFound(String),
    #[error("no common ancestor between {0} and {1}")] NoCommonAncestor(String, String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("block {0} not found in storage while detaching")] BlockNotFound(String),
    #[error("unable to find block {0} in side chain cache for transaction search")] SideBlockMissing(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("empty chain: no blocks connected")] EmptyChain,
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate block: {0}")] DuplicateBlock(String),
    #[error("block {block} does not extend tip {tip}")] PrevHashMismatch { block: String, tip: String },
    #[error("input references unknown transaction: {0}")] MissingInputTx(String),
    #[error("output index out of range: {0}")] OutputIndexOutOfRange(String),
    #[error("output already spent: {0}")] AlreadySpent(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("duplicate block: {0}")] Duplicate(String),
    #[error("unknown parent {parent} for block {block}")] UnknownParent { block: String, parent: String },
    #[error("input {outpoint} of tx {txid} references a missing transaction")] MissingInput { txid: String, outpoint: String },
    #[error("input {outpoint} of tx {txid} references a nonexistent output")] InvalidOutputIndex { txid: String, outpoint: String },
    #[error("input {outpoint} of tx {txid} spends an already spent output")] DoubleSpend { txid: String, outpoint: String },
    #[error("lookup of {txid} failed: {reason}")] LookupFailed { txid: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ForkViewError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] ChainGraph(#[from] ChainGraphError),
    #[error(transparent)] View(#[from] ViewError),
    #[error(transparent)] ChainState(#[from] ChainStateError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error("storage: {0}")] Storage(String),
}
