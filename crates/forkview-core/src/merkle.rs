//! Transaction commitment for block headers.
//!
//! Leaves are hashed as `BLAKE3(0x00 || txid)` and interior nodes as
//! `BLAKE3(0x01 || left || right)`. An odd trailing node is paired with itself.

use crate::types::Hash256;

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

fn tagged_hash(tag: u8, parts: &[&Hash256]) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[tag]);
    for part in parts {
        hasher.update(part.as_bytes());
    }
    Hash256(hasher.finalize().into())
}

/// Merkle root over `txids`. Empty input commits to [`Hash256::ZERO`].
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    let mut layer: Vec<Hash256> = txids.iter().map(|id| tagged_hash(LEAF_TAG, &[id])).collect();
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                tagged_hash(NODE_TAG, &[&pair[0], right])
            })
            .collect();
    }
    layer.first().copied().unwrap_or(Hash256::ZERO)
}
