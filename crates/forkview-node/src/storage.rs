//! RocksDB-backed persistent chain storage.
//!
//! Implements [`ChainStore`] using RocksDB column families for blocks,
//! headers, transaction records, the best-chain height index, per-block
//! heights, and metadata. All mutations use atomic [`WriteBatch`] for crash
//! safety.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};

use forkview_core::chain_state::{
    ChainStore, ConnectBlockResult, DisconnectBlockResult, check_extends_tip, stage_connect,
    stage_disconnect,
};
use forkview_core::error::{ChainStateError, ForkViewError};
use forkview_core::traits::{ChainDb, TxLookup, TxRecord, TxReply};
use forkview_core::types::{Block, BlockHeader, Hash256};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_HEADERS: &str = "headers";
const CF_TXS: &str = "txs";
const CF_HEIGHT_INDEX: &str = "height_index";
const CF_BLOCK_HEIGHTS: &str = "block_heights";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_HEADERS,
    CF_TXS,
    CF_HEIGHT_INDEX,
    CF_BLOCK_HEIGHTS,
    CF_METADATA,
];

// --- Metadata keys ---

const META_TIP_HEIGHT: &[u8] = b"tip_height";
const META_TIP_HASH: &[u8] = b"tip_hash";
const META_TX_COUNT: &[u8] = b"tx_count";

/// RocksDB-backed persistent chain storage.
///
/// Block bodies, headers and heights are kept for every block ever
/// connected, so blocks detached by a reorganization stay retrievable.
/// Transaction records and the height index describe the best chain only.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ForkViewError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| ForkViewError::Storage(e.to_string()))?;

        let store = Self { db };
        let (height, tip) = store.chain_tip()?;
        tracing::info!(height, tip = %tip, "opened chain store");
        Ok(store)
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), ForkViewError> {
        self.db
            .flush()
            .map_err(|e| ForkViewError::Storage(e.to_string()))
    }

    /// Best-chain block hash at `height`.
    pub fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, ForkViewError> {
        let cf = self.cf_handle(CF_HEIGHT_INDEX)?;
        let bytes = self
            .db
            .get_cf(&cf, Self::height_key(height))
            .map_err(|e| ForkViewError::Storage(e.to_string()))?;
        bytes.map(|b| Self::decode_hash(&b)).transpose()
    }

    /// Best-chain record for `txid`.
    pub fn tx_record(&self, txid: &Hash256) -> Result<Option<TxRecord>, ForkViewError> {
        self.get_decoded(CF_TXS, txid.as_bytes())
    }

    // --- Internal helpers ---

    /// Read and bincode-decode a value.
    fn get_decoded<T: bincode::Decode<()>>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>, ForkViewError> {
        let cf = self.cf_handle(cf_name)?;
        match self
            .db
            .get_cf(&cf, key)
            .map_err(|e| ForkViewError::Storage(e.to_string()))?
        {
            Some(data) => Self::decode(&data).map(Some),
            None => Ok(None),
        }
    }

    fn decode<T: bincode::Decode<()>>(data: &[u8]) -> Result<T, ForkViewError> {
        let (value, _): (T, _) = bincode::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| ForkViewError::Storage(e.to_string()))?;
        Ok(value)
    }

    fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, ForkViewError> {
        bincode::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| ForkViewError::Storage(e.to_string()))
    }

    /// Get a u64 from the metadata column family.
    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, ForkViewError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self
            .db
            .get_cf(&cf, key)
            .map_err(|e| ForkViewError::Storage(e.to_string()))?
        {
            Some(bytes) => <[u8; 8]>::try_from(bytes.as_slice())
                .map(u64::from_le_bytes)
                .map_err(|_| ForkViewError::Storage("invalid metadata value length".into())),
            None => Ok(0),
        }
    }

    fn decode_hash(bytes: &[u8]) -> Result<Hash256, ForkViewError> {
        <[u8; 32]>::try_from(bytes)
            .map(Hash256)
            .map_err(|_| ForkViewError::Storage("invalid hash length".into()))
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, ForkViewError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ForkViewError::Storage(format!("missing column family: {name}")))
    }

    /// Encode a height as big-endian bytes for ordered iteration.
    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    fn is_on_best_chain(&self, hash: &Hash256) -> Result<bool, ForkViewError> {
        let Some(height) = self.get_block_height(hash)? else {
            return Ok(false);
        };
        Ok(self.get_block_hash(height)? == Some(*hash))
    }
}

impl ChainDb for RocksStore {
    fn fetch_tx_by_hash_list(&self, hashes: &[Hash256]) -> Result<Vec<TxReply>, ForkViewError> {
        let cf = self.cf_handle(CF_TXS)?;
        let results = self
            .db
            .multi_get_cf(hashes.iter().map(|hash| (cf, hash.as_bytes())));

        Ok(hashes
            .iter()
            .zip(results)
            .map(|(hash, result)| {
                let lookup = match result {
                    Ok(Some(data)) => match Self::decode::<TxRecord>(&data) {
                        Ok(record) => TxLookup::Found(record),
                        Err(e) => TxLookup::Failed(e.to_string()),
                    },
                    Ok(None) => TxLookup::Missing,
                    Err(e) => TxLookup::Failed(e.to_string()),
                };
                TxReply { hash: *hash, lookup }
            })
            .collect())
    }

    fn fetch_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, ForkViewError> {
        self.get_decoded(CF_BLOCKS, hash.as_bytes())
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, ForkViewError> {
        self.get_decoded(CF_HEADERS, hash.as_bytes())
    }

    fn get_block_height(&self, hash: &Hash256) -> Result<Option<u64>, ForkViewError> {
        let cf = self.cf_handle(CF_BLOCK_HEIGHTS)?;
        match self
            .db
            .get_cf(&cf, hash.as_bytes())
            .map_err(|e| ForkViewError::Storage(e.to_string()))?
        {
            Some(bytes) => <[u8; 8]>::try_from(bytes.as_slice())
                .map(|b| Some(u64::from_be_bytes(b)))
                .map_err(|_| ForkViewError::Storage("invalid block height length".into())),
            None => Ok(None),
        }
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), ForkViewError> {
        let cf = self.cf_handle(CF_METADATA)?;
        let hash = match self
            .db
            .get_cf(&cf, META_TIP_HASH)
            .map_err(|e| ForkViewError::Storage(e.to_string()))?
        {
            Some(bytes) => Self::decode_hash(&bytes)?,
            None => return Ok((0, Hash256::ZERO)),
        };

        if hash.is_zero() {
            return Ok((0, Hash256::ZERO));
        }

        let height = self.get_meta_u64(META_TIP_HEIGHT)?;
        Ok((height, hash))
    }
}

impl ChainStore for RocksStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, ForkViewError> {
        let block_hash = block.hash();
        if self.is_on_best_chain(&block_hash)? {
            return Err(ChainStateError::DuplicateBlock(block_hash.to_string()).into());
        }
        check_extends_tip(block, height, self.chain_tip()?)?;

        let staged = stage_connect(block, height, |txid| self.tx_record(txid))?;
        let outputs_spent = staged.outputs_touched;
        let txs_created = block.transactions.len();

        // Build an atomic WriteBatch.
        let mut batch = WriteBatch::default();

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_headers = self.cf_handle(CF_HEADERS)?;
        let cf_txs = self.cf_handle(CF_TXS)?;
        let cf_height = self.cf_handle(CF_HEIGHT_INDEX)?;
        let cf_block_heights = self.cf_handle(CF_BLOCK_HEIGHTS)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        for (txid, record) in &staged.put {
            batch.put_cf(cf_txs, txid.as_bytes(), Self::encode(record)?);
        }

        batch.put_cf(cf_blocks, block_hash.as_bytes(), Self::encode(block)?);
        batch.put_cf(cf_headers, block_hash.as_bytes(), Self::encode(&block.header)?);
        batch.put_cf(cf_block_heights, block_hash.as_bytes(), height.to_be_bytes());
        batch.put_cf(cf_height, Self::height_key(height), block_hash.as_bytes());

        batch.put_cf(cf_meta, META_TIP_HEIGHT, height.to_le_bytes());
        batch.put_cf(cf_meta, META_TIP_HASH, block_hash.as_bytes());
        let tx_count = self.get_meta_u64(META_TX_COUNT)? + txs_created as u64;
        batch.put_cf(cf_meta, META_TX_COUNT, tx_count.to_le_bytes());

        // Write atomically.
        self.db
            .write(batch)
            .map_err(|e| ForkViewError::Storage(e.to_string()))?;

        Ok(ConnectBlockResult { txs_created, outputs_spent })
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, ForkViewError> {
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash.is_zero() {
            return Err(ChainStateError::EmptyChain.into());
        }

        let block = self
            .fetch_block_by_hash(&tip_hash)?
            .ok_or_else(|| ChainStateError::BlockNotFound(tip_hash.to_string()))?;

        let staged = stage_disconnect(&block, |txid| self.tx_record(txid))?;

        let mut batch = WriteBatch::default();

        let cf_txs = self.cf_handle(CF_TXS)?;
        let cf_height = self.cf_handle(CF_HEIGHT_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        for txid in &staged.delete {
            batch.delete_cf(cf_txs, txid.as_bytes());
        }
        for (txid, record) in &staged.put {
            batch.put_cf(cf_txs, txid.as_bytes(), Self::encode(record)?);
        }

        batch.delete_cf(cf_height, Self::height_key(tip_height));

        // Update tip metadata.
        if tip_height == 0 {
            // Disconnected genesis: back to empty chain.
            batch.put_cf(cf_meta, META_TIP_HEIGHT, 0u64.to_le_bytes());
            batch.put_cf(cf_meta, META_TIP_HASH, Hash256::ZERO.as_bytes());
        } else {
            batch.put_cf(cf_meta, META_TIP_HEIGHT, (tip_height - 1).to_le_bytes());
            batch.put_cf(cf_meta, META_TIP_HASH, block.header.prev_hash.as_bytes());
        }

        let tx_count = self
            .get_meta_u64(META_TX_COUNT)?
            .saturating_sub(staged.delete.len() as u64);
        batch.put_cf(cf_meta, META_TX_COUNT, tx_count.to_le_bytes());

        // Write atomically.
        self.db
            .write(batch)
            .map_err(|e| ForkViewError::Storage(e.to_string()))?;

        Ok(DisconnectBlockResult {
            txs_removed: staged.delete.len(),
            outputs_restored: staged.outputs_touched,
        })
    }

    fn tx_count(&self) -> usize {
        match self.get_meta_u64(META_TX_COUNT) {
            Ok(count) => count as usize,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable tx count, reporting 0");
                0
            }
        }
    }

    fn is_empty(&self) -> bool {
        match self.chain_tip() {
            Ok((_, hash)) => hash.is_zero(),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable chain tip, reporting empty");
                true
            }
        }
    }
}
