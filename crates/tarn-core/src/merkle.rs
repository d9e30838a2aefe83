//! Merkle tree for transaction commitment.
//!
//! Uses domain-separated double SHA-256 to prevent second-preimage attacks:
//! - Leaf hash: `SHA256d(0x00 || txid)`
//! - Internal node: `SHA256d(0x01 || left || right)`
//!
//! Odd-length layers are padded by duplicating the last element.
//! Empty trees produce [`Hash256::ZERO`].

use sha2::{Digest, Sha256};

use crate::types::Hash256;

/// Domain separation prefix for leaf hashes.
const LEAF_PREFIX: u8 = 0x00;

/// Domain separation prefix for internal node hashes.
const NODE_PREFIX: u8 = 0x01;

fn sha256d(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let first = hasher.finalize();
    Hash256(Sha256::digest(first).into())
}

/// Compute a domain-separated leaf hash: `SHA256d(0x00 || txid)`.
pub fn leaf_hash(data: &Hash256) -> Hash256 {
    sha256d(&[&[LEAF_PREFIX], data.as_bytes()])
}

/// Compute a domain-separated internal node hash: `SHA256d(0x01 || left || right)`.
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    sha256d(&[&[NODE_PREFIX], left.as_bytes(), right.as_bytes()])
}

/// Compute the Merkle root from a slice of leaf values (transaction IDs).
///
/// Returns [`Hash256::ZERO`] for an empty slice.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::ZERO;
    }

    let mut current: Vec<Hash256> = leaves.iter().map(leaf_hash).collect();

    while current.len() > 1 {
        current = next_layer(&current);
    }

    current[0]
}

/// Compute the next layer of the tree from the current one.
///
/// Pairs adjacent hashes with [`node_hash`], duplicating the last element
/// when the layer has an odd number of entries.
fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        next.push(node_hash(left, right));
        i += 2;
    }
    next
}
