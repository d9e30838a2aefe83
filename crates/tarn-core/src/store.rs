//! Block store contract and the volatile in-memory backend.
//!
//! A store is an arena of [`StoredHeader`] entries keyed by header hash, plus
//! a chain-head pointer. Entries reference their parent by hash only, no
//! ownership cycles. Backends differ in durability and capacity, never in
//! the contract: header-only backends answer the full-block surface with
//! [`StoreError::Pruned`] / no-ops, full backends persist bodies, the UTXO
//! set, and per-block undo data.
//!
//! Invariant: every persisted entry's previous hash resolves to another
//! stored entry or to the genesis/checkpoint root. The chain state machine
//! only calls [`BlockStore::put`] with entries built via
//! [`StoredHeader::build_next`] from a resolved parent, which preserves this.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, UtxoEntry};

/// A header with its position and cumulative proof-of-work on some branch.
///
/// The entry's identity is its header hash; `chain_work` is the sum of
/// per-block work from genesis through this entry along its branch.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct StoredHeader {
    /// The block header.
    pub header: BlockHeader,
    /// Height of this entry (genesis = 0).
    pub height: u64,
    /// Cumulative work from genesis through this entry.
    pub chain_work: u128,
}

impl StoredHeader {
    /// Entry for a genesis header at height 0.
    pub fn genesis(header: BlockHeader) -> Self {
        let chain_work = header.work();
        Self { header, height: 0, chain_work }
    }

    /// The entry's identity (its header hash).
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Build the child entry for a header extending this one.
    ///
    /// The caller must have verified `header.prev_hash == self.hash()`.
    pub fn build_next(&self, header: BlockHeader) -> Self {
        let chain_work = self.chain_work + header.work();
        Self {
            header,
            height: self.height + 1,
            chain_work,
        }
    }

    /// True if this entry has strictly more cumulative work than `other`.
    pub fn more_work_than(&self, other: &StoredHeader) -> bool {
        self.chain_work > other.chain_work
    }
}

/// Undo data for reverting a connected block.
///
/// Stores the UTXOs consumed by the block's transactions so they can be
/// restored during chain reorganization.
#[derive(
    Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockUndo {
    /// Spent UTXOs in the order they were consumed.
    pub spent_utxos: Vec<(OutPoint, UtxoEntry)>,
}

/// Chain storage capability interface.
///
/// One contract for every backend; implementations are selected at
/// construction time. Mutations between [`begin_batch`](Self::begin_batch)
/// and [`commit_batch`](Self::commit_batch) must become visible atomically;
/// [`abort_batch`](Self::abort_batch) discards them. Backends without
/// transactional storage may implement the batch calls as no-ops only if
/// every individual mutation is already atomic (true for header-only
/// stores, where the only multi-step mutation is resolved by the final
/// head-pointer write).
///
/// Not thread-safe: the chain state machine is the single serialization
/// point and guards its store with one lock.
pub trait BlockStore: Send {
    /// Persist a header entry keyed by its hash. Overwrites an existing
    /// entry with the same hash (entries are content-addressed, so this is
    /// idempotent).
    fn put(&mut self, entry: &StoredHeader) -> Result<(), StoreError>;

    /// Look up an entry by header hash.
    fn get(&self, hash: &Hash256) -> Result<Option<StoredHeader>, StoreError>;

    /// Whether an entry exists for the given hash.
    fn contains(&self, hash: &Hash256) -> Result<bool, StoreError> {
        Ok(self.get(hash)?.is_some())
    }

    /// The entry the chain currently considers best.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no head has been set (empty store).
    fn chain_head(&self) -> Result<StoredHeader, StoreError>;

    /// Move the chain-head pointer. The entry must already be stored.
    fn set_chain_head(&mut self, entry: &StoredHeader) -> Result<(), StoreError>;

    /// Hash of the best-chain entry at the given height, walking back from
    /// the head. Returns `None` if the height exceeds the head or the
    /// ancestor has been evicted.
    fn hash_at_height(&self, height: u64) -> Result<Option<Hash256>, StoreError> {
        let head = match self.chain_head() {
            Ok(h) => h,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if height > head.height {
            return Ok(None);
        }
        let mut cursor = head;
        while cursor.height > height {
            match self.get(&cursor.header.prev_hash)? {
                Some(parent) => cursor = parent,
                None => return Ok(None),
            }
        }
        Ok(Some(cursor.hash()))
    }

    /// Whether this backend retains full block bodies and UTXO state.
    fn supports_full_blocks(&self) -> bool {
        false
    }

    /// Persist an entry together with its full block body.
    ///
    /// Header-only backends store just the entry.
    fn put_block(&mut self, entry: &StoredHeader, _block: &Block) -> Result<(), StoreError> {
        self.put(entry)
    }

    /// Retrieve a full block body by hash.
    ///
    /// # Errors
    ///
    /// [`StoreError::Pruned`] when the header is known but the body is not
    /// retained (header-only backends, or pruned heights of full backends).
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StoreError> {
        if self.get(hash)?.is_some() {
            return Err(StoreError::Pruned(hash.to_string()));
        }
        Ok(None)
    }

    /// Look up an unspent output. Header-only backends track no UTXO state
    /// and always answer `None`.
    fn get_utxo(&self, _outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        Ok(None)
    }

    /// Apply a block's UTXO delta (spend inputs, create outputs) and record
    /// undo data. No-op for header-only backends.
    fn connect_transactions(
        &mut self,
        _entry: &StoredHeader,
        _block: &Block,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    /// Revert a block's UTXO delta using its undo data. No-op for
    /// header-only backends.
    fn disconnect_transactions(&mut self, _entry: &StoredHeader) -> Result<(), StoreError> {
        Ok(())
    }

    /// Begin staging mutations for an atomic commit.
    fn begin_batch(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Atomically apply all mutations staged since [`begin_batch`](Self::begin_batch).
    fn commit_batch(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Discard all mutations staged since [`begin_batch`](Self::begin_batch).
    fn abort_batch(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Snapshot of the mutable state, taken at `begin_batch`.
#[derive(Clone)]
struct MemorySnapshot {
    entries: HashMap<Hash256, StoredHeader>,
    blocks: HashMap<Hash256, Block>,
    utxos: HashMap<OutPoint, UtxoEntry>,
    undo: HashMap<Hash256, BlockUndo>,
    head: Option<Hash256>,
}

/// Volatile in-memory store implementing the full contract.
///
/// Unbounded maps, lost on drop. Used for short-lived verification and
/// tests. Batch atomicity is emulated by snapshot and restore.
pub struct MemoryBlockStore {
    /// Entry arena: hash → stored header.
    entries: HashMap<Hash256, StoredHeader>,
    /// Full blocks by hash.
    blocks: HashMap<Hash256, Block>,
    /// UTXO set: outpoint → entry.
    utxos: HashMap<OutPoint, UtxoEntry>,
    /// Undo data by block hash.
    undo: HashMap<Hash256, BlockUndo>,
    /// Hash of the current chain head, if any.
    head: Option<Hash256>,
    /// Pending snapshot between begin_batch and commit/abort.
    snapshot: Option<MemorySnapshot>,
}

impl MemoryBlockStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            blocks: HashMap::new(),
            utxos: HashMap::new(),
            undo: HashMap::new(),
            head: None,
            snapshot: None,
        }
    }

    /// Number of stored header entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of unspent outputs tracked.
    pub fn utxo_count(&self) -> usize {
        self.utxos.len()
    }

    /// Spend a transaction's inputs, recording undo data.
    ///
    /// Coinbase transactions are skipped. Fails if any referenced UTXO is
    /// missing, preventing phantom spends during reorgs.
    fn spend_inputs(&mut self, tx: &Transaction, undo: &mut BlockUndo) -> Result<(), StoreError> {
        if tx.is_coinbase() {
            return Ok(());
        }
        for input in &tx.inputs {
            let entry = self
                .utxos
                .remove(&input.previous_output)
                .ok_or_else(|| StoreError::MissingUtxo(input.previous_output.to_string()))?;
            undo.spent_utxos.push((input.previous_output, entry));
        }
        Ok(())
    }

    /// Create UTXOs for a transaction's outputs.
    fn create_outputs(&mut self, tx: &Transaction, height: u64) -> Result<(), StoreError> {
        let txid = tx
            .txid()
            .map_err(|e| StoreError::Corruption(e.to_string()))?;
        let is_coinbase = tx.is_coinbase();
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint { txid, index: index as u32 };
            self.utxos.insert(
                outpoint,
                UtxoEntry {
                    output: output.clone(),
                    block_height: height,
                    is_coinbase,
                },
            );
        }
        Ok(())
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&mut self, entry: &StoredHeader) -> Result<(), StoreError> {
        self.entries.insert(entry.hash(), entry.clone());
        Ok(())
    }

    fn get(&self, hash: &Hash256) -> Result<Option<StoredHeader>, StoreError> {
        Ok(self.entries.get(hash).cloned())
    }

    fn chain_head(&self) -> Result<StoredHeader, StoreError> {
        let head = self
            .head
            .ok_or_else(|| StoreError::NotFound("chain head".into()))?;
        self.entries
            .get(&head)
            .cloned()
            .ok_or_else(|| StoreError::Corruption(format!("head entry missing: {head}")))
    }

    fn set_chain_head(&mut self, entry: &StoredHeader) -> Result<(), StoreError> {
        let hash = entry.hash();
        if !self.entries.contains_key(&hash) {
            return Err(StoreError::NotFound(hash.to_string()));
        }
        self.head = Some(hash);
        Ok(())
    }

    fn supports_full_blocks(&self) -> bool {
        true
    }

    fn put_block(&mut self, entry: &StoredHeader, block: &Block) -> Result<(), StoreError> {
        self.blocks.insert(entry.hash(), block.clone());
        self.put(entry)
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StoreError> {
        match self.blocks.get(hash) {
            Some(block) => Ok(Some(block.clone())),
            None if self.entries.contains_key(hash) => Err(StoreError::Pruned(hash.to_string())),
            None => Ok(None),
        }
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        Ok(self.utxos.get(outpoint).cloned())
    }

    fn connect_transactions(
        &mut self,
        entry: &StoredHeader,
        block: &Block,
    ) -> Result<(), StoreError> {
        let mut undo = BlockUndo::default();
        for tx in &block.transactions {
            self.spend_inputs(tx, &mut undo)?;
            self.create_outputs(tx, entry.height)?;
        }
        self.undo.insert(entry.hash(), undo);
        Ok(())
    }

    fn disconnect_transactions(&mut self, entry: &StoredHeader) -> Result<(), StoreError> {
        let hash = entry.hash();
        let block = match self.blocks.get(&hash) {
            Some(block) => block.clone(),
            None => return Err(StoreError::Pruned(hash.to_string())),
        };
        let undo = self
            .undo
            .remove(&hash)
            .ok_or_else(|| StoreError::UndoDataMissing(hash.to_string()))?;

        // Remove UTXOs created by this block, newest transaction first.
        for tx in block.transactions.iter().rev() {
            let txid = tx
                .txid()
                .map_err(|e| StoreError::Corruption(e.to_string()))?;
            for index in 0..tx.outputs.len() {
                self.utxos.remove(&OutPoint { txid, index: index as u32 });
            }
        }

        // Restore the UTXOs it spent.
        for (outpoint, utxo) in undo.spent_utxos {
            self.utxos.insert(outpoint, utxo);
        }
        Ok(())
    }

    fn begin_batch(&mut self) -> Result<(), StoreError> {
        self.snapshot = Some(MemorySnapshot {
            entries: self.entries.clone(),
            blocks: self.blocks.clone(),
            utxos: self.utxos.clone(),
            undo: self.undo.clone(),
            head: self.head,
        });
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }

    fn abort_batch(&mut self) -> Result<(), StoreError> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| StoreError::Corruption("abort without begin_batch".into()))?;
        self.entries = snapshot.entries;
        self.blocks = snapshot.blocks;
        self.utxos = snapshot.utxos;
        self.undo = snapshot.undo;
        self.head = snapshot.head;
        Ok(())
    }
}
