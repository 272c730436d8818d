//! Core ledger types: transactions, block headers, blocks.
//!
//! All numeric fields use u64. Hashes are 32 bytes and render as lowercase hex.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::TransactionError;

/// A 32-byte hash value.
///
/// Used for transaction IDs (BLAKE3), block header hashes (double SHA-256),
/// and merkle roots (BLAKE3). Human-readable serde formats use hex.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Marks "no parent" in a genesis header and the coinbase outpoint.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Self)
        }
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u64,
}

impl OutPoint {
    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u64::MAX,
        }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u64::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// Unlocking data. Opaque to this crate; script checks happen elsewhere.
    pub script_sig: Vec<u8>,
}

/// A transaction output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in base units.
    pub value: u64,
    /// Hash of the recipient's locking key.
    pub pubkey_hash: Hash256,
}

/// A transaction transferring value between outputs.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u64,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u64,
}

impl Transaction {
    /// Compute the transaction ID (BLAKE3 hash of the canonical encoding).
    ///
    /// Uses bincode with standard config for deterministic serialization.
    pub fn txid(&self) -> Result<Hash256, TransactionError> {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        Ok(Hash256(blake3::hash(&encoded).into()))
    }

    /// Check if this is a coinbase transaction (single input with null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }
}

/// Block header.
///
/// Hash is computed as double SHA-256 over a fixed byte layout.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u64,
    /// Hash of the previous block header. Zero for genesis.
    pub prev_hash: Hash256,
    /// BLAKE3 merkle root of the block's transactions.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Compact difficulty target.
    pub difficulty_target: u64,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Header size in bytes when serialized for hashing (4 u64 fields + 2 * 32-byte hashes).
    const HASH_SIZE: usize = 4 * 8 + 2 * 32;

    /// Compute the block header hash (double SHA-256).
    ///
    /// Layout: version || prev_hash || merkle_root || timestamp ||
    /// difficulty_target || nonce, integers little-endian.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.difficulty_target.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }

    /// Hash of the parent block, or `None` for a genesis header.
    pub fn parent_hash(&self) -> Option<Hash256> {
        (!self.prev_hash.is_zero()).then_some(self.prev_hash)
    }
}

/// A complete block: header plus transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,
    /// Ordered list of transactions. First transaction must be coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Get the coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Hash of this block's header.
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Transaction IDs in block order.
    pub fn txids(&self) -> Result<Vec<Hash256>, TransactionError> {
        self.transactions.iter().map(Transaction::txid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    txid: Hash256([0x11; 32]),
                    index: 0,
                },
                script_sig: vec![0u8; 64],
            }],
            outputs: vec![TxOutput {
                value: 50,
                pubkey_hash: Hash256([0xAA; 32]),
            }],
            lock_time: 0,
        }
    }

    fn sample_coinbase() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                script_sig: vec![],
            }],
            outputs: vec![TxOutput {
                value: 50,
                pubkey_hash: Hash256([0xAA; 32]),
            }],
            lock_time: 0,
        }
    }

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            timestamp: 1_700_000_000,
            difficulty_target: u64::MAX,
            nonce: 0,
        }
    }

    #[test]
    fn hash256_display_hex() {
        let h = Hash256([0xAB; 32]);
        let s = format!("{h}");
        assert_eq!(s.len(), 64);
        assert_eq!(&s[0..2], "ab");
    }

    #[test]
    fn hash256_parses_own_display() {
        let h = Hash256([0x5C; 32]);
        let parsed: Hash256 = h.to_string().parse().unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn hash256_json_is_hex() {
        let h = Hash256([0xAB; 32]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: Hash256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn hash256_rejects_short_hex() {
        assert!("abcd".parse::<Hash256>().is_err());
        assert!("zz".repeat(32).parse::<Hash256>().is_err());
    }

    #[test]
    fn outpoint_null_detection() {
        assert!(OutPoint::null().is_null());
        assert!(!OutPoint { txid: Hash256([1; 32]), index: 0 }.is_null());
    }

    #[test]
    fn outpoint_display() {
        let op = OutPoint { txid: Hash256([0xFF; 32]), index: 3 };
        assert!(format!("{op}").ends_with(":3"));
    }

    #[test]
    fn coinbase_detection() {
        assert!(sample_coinbase().is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn multi_input_not_coinbase() {
        let mut tx = sample_coinbase();
        tx.inputs.push(tx.inputs[0].clone());
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn txid_changes_with_data() {
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        tx2.lock_time = 1;
        assert_eq!(tx1.txid().unwrap(), tx1.txid().unwrap());
        assert_ne!(tx1.txid().unwrap(), tx2.txid().unwrap());
    }

    #[test]
    fn block_header_hash_changes_with_nonce() {
        let h1 = sample_header();
        let mut h2 = h1.clone();
        h2.nonce = 1;
        assert_ne!(h1.hash(), h2.hash());
        assert!(!h1.hash().is_zero());
    }

    #[test]
    fn genesis_header_has_no_parent() {
        let mut header = sample_header();
        assert_eq!(header.parent_hash(), None);
        header.prev_hash = Hash256([7; 32]);
        assert_eq!(header.parent_hash(), Some(Hash256([7; 32])));
    }

    #[test]
    fn block_txids_follow_block_order() {
        let block = Block {
            header: sample_header(),
            transactions: vec![sample_coinbase(), sample_tx()],
        };
        let txids = block.txids().unwrap();
        assert_eq!(txids.len(), 2);
        assert_eq!(txids[0], sample_coinbase().txid().unwrap());
        assert_eq!(txids[1], sample_tx().txid().unwrap());
        assert!(block.coinbase().unwrap().is_coinbase());
        assert_eq!(block.hash(), block.header.hash());
    }

    #[test]
    fn bincode_round_trip_block() {
        let block = Block {
            header: sample_header(),
            transactions: vec![sample_coinbase(), sample_tx()],
        };
        let encoded = bincode::encode_to_vec(&block, bincode::config::standard()).unwrap();
        let (decoded, _): (Block, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(block, decoded);
    }
}
