//! Core chain types: headers, blocks, transactions, unspent outputs.
//!
//! Identity hashing (header hash, txid) is double SHA-256. Header hashes are
//! computed over an explicit fixed byte layout, never over the bincode
//! encoding, so the on-wire identity can never drift with encoder changes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::ValidationError;

/// A 32-byte hash value.
///
/// Used for block header hashes, transaction IDs, and merkle roots.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used as the genesis previous-hash and
    /// for coinbase previous outpoints.
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
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
///
/// The witness carries whatever unlocking data the script layer requires;
/// this core treats it as opaque bytes.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// Opaque unlocking data. Empty for coinbase inputs.
    pub witness: Vec<u8>,
}

/// A transaction output, creating a new UTXO.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in base units.
    pub value: u64,
    /// Opaque script key identifying the output's owner. The wallet layer
    /// matches this against its watched-script set.
    pub script_key: Hash256,
}

/// A transaction transferring value between outputs.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u32,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u64,
}

impl Transaction {
    /// Compute the transaction ID (double SHA-256 of the canonical encoding).
    ///
    /// Uses bincode with standard config for deterministic serialization.
    pub fn txid(&self) -> Result<Hash256, ValidationError> {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        let first = Sha256::digest(&encoded);
        Ok(Hash256(Sha256::digest(first).into()))
    }

    /// Check if this is a coinbase transaction (single input with null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Sum of all output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }
}

/// Block header containing the proof-of-work puzzle.
///
/// The header hash is double SHA-256 over the fixed 96-byte layout below.
/// Headers are immutable once accepted; their identity is the content hash.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u64,
    /// Hash of the previous block header. Zero for genesis.
    pub prev_hash: Hash256,
    /// Merkle root of the block's transactions.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Compact difficulty target. Higher = easier.
    pub target: u64,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Header size in bytes when serialized for hashing (4 u64 fields + 2 * 32-byte hashes).
    pub const ENCODED_SIZE: usize = 4 * 8 + 2 * 32;

    /// Compute the block header hash (double SHA-256).
    ///
    /// Uses an explicit fixed byte layout: version || prev_hash || merkle_root ||
    /// timestamp || target || nonce, all little-endian.
    pub fn hash(&self) -> Hash256 {
        let first = Sha256::digest(self.encode_fixed());
        Hash256(Sha256::digest(first).into())
    }

    /// Serialize to the fixed 96-byte layout used for hashing and for
    /// fixed-record disk stores.
    pub fn encode_fixed(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut data = [0u8; Self::ENCODED_SIZE];
        data[0..8].copy_from_slice(&self.version.to_le_bytes());
        data[8..40].copy_from_slice(self.prev_hash.as_bytes());
        data[40..72].copy_from_slice(self.merkle_root.as_bytes());
        data[72..80].copy_from_slice(&self.timestamp.to_le_bytes());
        data[80..88].copy_from_slice(&self.target.to_le_bytes());
        data[88..96].copy_from_slice(&self.nonce.to_le_bytes());
        data
    }

    /// Deserialize from the fixed 96-byte layout.
    pub fn decode_fixed(data: &[u8; Self::ENCODED_SIZE]) -> Self {
        let mut prev_hash = [0u8; 32];
        prev_hash.copy_from_slice(&data[8..40]);
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&data[40..72]);
        Self {
            version: u64::from_le_bytes(data[0..8].try_into().unwrap()),
            prev_hash: Hash256(prev_hash),
            merkle_root: Hash256(merkle_root),
            timestamp: u64::from_le_bytes(data[72..80].try_into().unwrap()),
            target: u64::from_le_bytes(data[80..88].try_into().unwrap()),
            nonce: u64::from_le_bytes(data[88..96].try_into().unwrap()),
        }
    }

    /// Check the proof-of-work: the first 8 bytes of the header hash,
    /// interpreted as a little-endian u64, must be ≤ the target.
    pub fn meets_target(&self) -> bool {
        let hash = self.hash();
        let prefix = u64::from_le_bytes(hash.0[..8].try_into().unwrap());
        prefix <= self.target
    }

    /// Expected number of hash attempts to find a block at this header's
    /// target. Cumulative chain work is the sum of these per branch.
    pub fn work(&self) -> u128 {
        work_for_target(self.target)
    }
}

/// Work contributed by one block at the given compact target.
///
/// `(u64::MAX / (target + 1)) + 1`, so the easiest target contributes 1 and
/// harder (smaller) targets contribute proportionally more.
pub fn work_for_target(target: u64) -> u128 {
    (u64::MAX as u128) / (target as u128 + 1) + 1
}

/// A complete block: header plus transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Block header with proof-of-work.
    pub header: BlockHeader,
    /// Ordered list of transactions. First transaction must be coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block's identity, which is its header hash.
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Get the coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }
}

/// An entry in the unspent transaction output set.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UtxoEntry {
    /// The unspent output.
    pub output: TxOutput,
    /// Height of the block containing this UTXO.
    pub block_height: u64,
    /// Whether this output is from a coinbase transaction.
    pub is_coinbase: bool,
}
