//! RocksDB-backed durable chain store.
//!
//! Implements the full [`BlockStore`] contract using column families for
//! header entries, block bodies, the UTXO set, per-block undo data, and
//! metadata (the head pointer). All mutations between `begin_batch` and
//! `commit_batch` are staged in one RocksDB [`WriteBatch`] with an
//! in-memory read overlay, so (entry, head pointer, UTXO delta) become
//! visible atomically, so a crash can never leave the head pointing at an
//! entry whose UTXO delta was not durably applied.
//!
//! On first open, the network's genesis block is committed automatically.

use std::collections::HashMap;
use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use tracing::info;

use tarn_core::error::StoreError;
use tarn_core::params::NetworkParams;
use tarn_core::store::{BlockStore, BlockUndo, StoredHeader};
use tarn_core::types::{Block, Hash256, OutPoint, Transaction, UtxoEntry};

// --- Column family names ---

const CF_HEADERS: &str = "headers";
const CF_BLOCKS: &str = "blocks";
const CF_UTXOS: &str = "utxos";
const CF_UNDO: &str = "undo";
const CF_META: &str = "meta";

const ALL_CFS: &[&str] = &[CF_HEADERS, CF_BLOCKS, CF_UTXOS, CF_UNDO, CF_META];

// --- Metadata keys ---

const META_HEAD: &[u8] = b"head";

/// Mutations staged since `begin_batch`: the write batch that will hit the
/// database, plus overlays so reads inside the batch see staged state.
struct Staged {
    batch: WriteBatch,
    entries: HashMap<Hash256, StoredHeader>,
    blocks: HashMap<Hash256, Block>,
    /// `None` marks a staged delete.
    utxos: HashMap<OutPoint, Option<UtxoEntry>>,
    undo: HashMap<Hash256, Option<BlockUndo>>,
    head: Option<Hash256>,
}

impl Staged {
    fn new() -> Self {
        Self {
            batch: WriteBatch::default(),
            entries: HashMap::new(),
            blocks: HashMap::new(),
            utxos: HashMap::new(),
            undo: HashMap::new(),
            head: None,
        }
    }
}

/// Durable full-validation store. See the module docs.
pub struct RocksStore {
    db: DB,
    staged: Option<Staged>,
}

impl RocksStore {
    /// Open or create the database at `path`, committing genesis if empty.
    pub fn open(path: impl AsRef<Path>, params: &NetworkParams) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let mut store = Self { db, staged: None };

        match store.chain_head() {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                let genesis = params.genesis_block();
                let entry = StoredHeader::genesis(genesis.header.clone());
                info!(hash = %entry.hash(), network = ?params.kind, "initializing chain database at genesis");
                store.begin_batch()?;
                let staged = (|| -> Result<(), StoreError> {
                    store.put_block(&entry, &genesis)?;
                    store.connect_transactions(&entry, &genesis)?;
                    store.set_chain_head(&entry)
                })();
                match staged {
                    Ok(()) => store.commit_batch()?,
                    Err(e) => {
                        store.abort_batch()?;
                        return Err(e);
                    }
                }
            }
            Err(e) => return Err(e),
        }

        Ok(store)
    }

    /// Delete block bodies deeper than `keep_recent` blocks below the head.
    /// Headers, undo data, and the genesis body are preserved; pruned
    /// heights answer body queries with [`StoreError::Pruned`].
    ///
    /// Returns the number of bodies removed.
    pub fn prune_blocks(&mut self, keep_recent: u64) -> Result<u64, StoreError> {
        let head = self.chain_head()?;

        // Step past the retained window.
        let mut cursor = head;
        for _ in 0..keep_recent {
            if cursor.height == 0 {
                return Ok(0);
            }
            cursor = self
                .get(&cursor.header.prev_hash)?
                .ok_or_else(|| StoreError::Corruption("broken best-chain link".into()))?;
        }

        let cf_blocks = self.cf(CF_BLOCKS)?;
        let mut batch = WriteBatch::default();
        let mut pruned = 0u64;
        while cursor.height > 0 {
            let hash = cursor.hash();
            if self
                .db
                .get_cf(cf_blocks, hash.as_bytes())
                .map_err(|e| StoreError::Io(e.to_string()))?
                .is_some()
            {
                batch.delete_cf(cf_blocks, hash.as_bytes());
                pruned += 1;
            }
            cursor = self
                .get(&cursor.header.prev_hash)?
                .ok_or_else(|| StoreError::Corruption("broken best-chain link".into()))?;
        }

        if pruned > 0 {
            self.db
                .write(batch)
                .map_err(|e| StoreError::Io(e.to_string()))?;
            info!(pruned, "pruned block bodies");
        }
        Ok(pruned)
    }

    // --- Internal helpers ---

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Corruption(format!("missing column family {name}")))
    }

    fn utxo_key(outpoint: &OutPoint) -> [u8; 36] {
        let mut key = [0u8; 36];
        key[0..32].copy_from_slice(outpoint.txid.as_bytes());
        key[32..36].copy_from_slice(&outpoint.index.to_le_bytes());
        key
    }

    fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::Corruption(e.to_string()))
    }

    fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
        let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Corruption(e.to_string()))?;
        Ok(value)
    }

    fn db_get<T: bincode::Decode<()>>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>, StoreError> {
        let cf = self.cf(cf_name)?;
        match self
            .db
            .get_cf(cf, key)
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write a key either into the staged batch or directly.
    fn write_kv(&mut self, cf_name: &str, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::Corruption(format!("missing column family {cf_name}")))?;
        match &mut self.staged {
            Some(staged) => {
                staged.batch.put_cf(cf, key, value);
                Ok(())
            }
            None => self
                .db
                .put_cf(cf, key, value)
                .map_err(|e| StoreError::Io(e.to_string())),
        }
    }

    fn delete_kv(&mut self, cf_name: &str, key: &[u8]) -> Result<(), StoreError> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::Corruption(format!("missing column family {cf_name}")))?;
        match &mut self.staged {
            Some(staged) => {
                staged.batch.delete_cf(cf, key);
                Ok(())
            }
            None => self
                .db
                .delete_cf(cf, key)
                .map_err(|e| StoreError::Io(e.to_string())),
        }
    }

    fn read_undo(&self, hash: &Hash256) -> Result<Option<BlockUndo>, StoreError> {
        if let Some(staged) = &self.staged {
            if let Some(undo) = staged.undo.get(hash) {
                return Ok(undo.clone());
            }
        }
        self.db_get(CF_UNDO, hash.as_bytes())
    }

    fn write_undo(&mut self, hash: &Hash256, undo: &BlockUndo) -> Result<(), StoreError> {
        let bytes = Self::encode(undo)?;
        self.write_kv(CF_UNDO, hash.as_bytes(), bytes)?;
        if let Some(staged) = &mut self.staged {
            staged.undo.insert(*hash, Some(undo.clone()));
        }
        Ok(())
    }

    fn write_utxo(&mut self, outpoint: &OutPoint, entry: &UtxoEntry) -> Result<(), StoreError> {
        let bytes = Self::encode(entry)?;
        self.write_kv(CF_UTXOS, &Self::utxo_key(outpoint), bytes)?;
        if let Some(staged) = &mut self.staged {
            staged.utxos.insert(*outpoint, Some(entry.clone()));
        }
        Ok(())
    }

    fn delete_utxo(&mut self, outpoint: &OutPoint) -> Result<(), StoreError> {
        self.delete_kv(CF_UTXOS, &Self::utxo_key(outpoint))?;
        if let Some(staged) = &mut self.staged {
            staged.utxos.insert(*outpoint, None);
        }
        Ok(())
    }

    /// Spend a transaction's inputs, recording undo data. Coinbase
    /// transactions are skipped.
    fn spend_inputs(&mut self, tx: &Transaction, undo: &mut BlockUndo) -> Result<(), StoreError> {
        if tx.is_coinbase() {
            return Ok(());
        }
        for input in &tx.inputs {
            let outpoint = input.previous_output;
            let entry = self
                .get_utxo(&outpoint)?
                .ok_or_else(|| StoreError::MissingUtxo(outpoint.to_string()))?;
            self.delete_utxo(&outpoint)?;
            undo.spent_utxos.push((outpoint, entry));
        }
        Ok(())
    }

    fn create_outputs(&mut self, tx: &Transaction, height: u64) -> Result<(), StoreError> {
        let txid = tx
            .txid()
            .map_err(|e| StoreError::Corruption(e.to_string()))?;
        let is_coinbase = tx.is_coinbase();
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint { txid, index: index as u32 };
            self.write_utxo(
                &outpoint,
                &UtxoEntry {
                    output: output.clone(),
                    block_height: height,
                    is_coinbase,
                },
            )?;
        }
        Ok(())
    }
}

impl BlockStore for RocksStore {
    fn put(&mut self, entry: &StoredHeader) -> Result<(), StoreError> {
        let bytes = Self::encode(entry)?;
        let hash = entry.hash();
        self.write_kv(CF_HEADERS, hash.as_bytes(), bytes)?;
        if let Some(staged) = &mut self.staged {
            staged.entries.insert(hash, entry.clone());
        }
        Ok(())
    }

    fn get(&self, hash: &Hash256) -> Result<Option<StoredHeader>, StoreError> {
        if let Some(staged) = &self.staged {
            if let Some(entry) = staged.entries.get(hash) {
                return Ok(Some(entry.clone()));
            }
        }
        self.db_get(CF_HEADERS, hash.as_bytes())
    }

    fn chain_head(&self) -> Result<StoredHeader, StoreError> {
        let head_hash = if let Some(Staged { head: Some(h), .. }) = &self.staged {
            *h
        } else {
            let cf = self.cf(CF_META)?;
            let bytes = self
                .db
                .get_cf(cf, META_HEAD)
                .map_err(|e| StoreError::Io(e.to_string()))?
                .ok_or_else(|| StoreError::NotFound("chain head".into()))?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| StoreError::Corruption("malformed head pointer".into()))?;
            Hash256(arr)
        };
        self.get(&head_hash)?
            .ok_or_else(|| StoreError::Corruption(format!("head entry missing: {head_hash}")))
    }

    fn set_chain_head(&mut self, entry: &StoredHeader) -> Result<(), StoreError> {
        let hash = entry.hash();
        if self.get(&hash)?.is_none() {
            return Err(StoreError::NotFound(hash.to_string()));
        }
        self.write_kv(CF_META, META_HEAD, hash.as_bytes().to_vec())?;
        if let Some(staged) = &mut self.staged {
            staged.head = Some(hash);
        }
        Ok(())
    }

    fn supports_full_blocks(&self) -> bool {
        true
    }

    fn put_block(&mut self, entry: &StoredHeader, block: &Block) -> Result<(), StoreError> {
        let hash = entry.hash();
        let bytes = Self::encode(block)?;
        self.write_kv(CF_BLOCKS, hash.as_bytes(), bytes)?;
        if let Some(staged) = &mut self.staged {
            staged.blocks.insert(hash, block.clone());
        }
        self.put(entry)
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StoreError> {
        if let Some(staged) = &self.staged {
            if let Some(block) = staged.blocks.get(hash) {
                return Ok(Some(block.clone()));
            }
        }
        if let Some(block) = self.db_get::<Block>(CF_BLOCKS, hash.as_bytes())? {
            return Ok(Some(block));
        }
        if self.get(hash)?.is_some() {
            return Err(StoreError::Pruned(hash.to_string()));
        }
        Ok(None)
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        if let Some(staged) = &self.staged {
            if let Some(overlay) = staged.utxos.get(outpoint) {
                return Ok(overlay.clone());
            }
        }
        self.db_get(CF_UTXOS, &Self::utxo_key(outpoint))
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
        self.write_undo(&entry.hash(), &undo)
    }

    fn disconnect_transactions(&mut self, entry: &StoredHeader) -> Result<(), StoreError> {
        let hash = entry.hash();
        let block = self
            .get_block(&hash)?
            .ok_or_else(|| StoreError::Pruned(hash.to_string()))?;
        let undo = self
            .read_undo(&hash)?
            .ok_or_else(|| StoreError::UndoDataMissing(hash.to_string()))?;

        // Remove UTXOs created by this block, newest transaction first.
        for tx in block.transactions.iter().rev() {
            let txid = tx
                .txid()
                .map_err(|e| StoreError::Corruption(e.to_string()))?;
            for index in 0..tx.outputs.len() {
                self.delete_utxo(&OutPoint { txid, index: index as u32 })?;
            }
        }

        // Restore the UTXOs it spent.
        for (outpoint, utxo) in undo.spent_utxos {
            self.write_utxo(&outpoint, &utxo)?;
        }

        self.delete_kv(CF_UNDO, hash.as_bytes())?;
        if let Some(staged) = &mut self.staged {
            staged.undo.insert(hash, None);
        }
        Ok(())
    }

    fn begin_batch(&mut self) -> Result<(), StoreError> {
        if self.staged.is_some() {
            return Err(StoreError::Corruption("nested batch".into()));
        }
        self.staged = Some(Staged::new());
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<(), StoreError> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| StoreError::Corruption("commit without begin_batch".into()))?;
        // A failed atomic write leaves the database state unknown; callers
        // treat this as a durability violation.
        self.db
            .write(staged.batch)
            .map_err(|e| StoreError::Corruption(e.to_string()))
    }

    fn abort_batch(&mut self) -> Result<(), StoreError> {
        self.staged
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::Corruption("abort without begin_batch".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_core::types::{BlockHeader, TxInput, TxOutput};

    fn params() -> NetworkParams {
        NetworkParams::regtest()
    }

    fn open_store(dir: &tempfile::TempDir) -> RocksStore {
        RocksStore::open(dir.path().join("chaindata"), &params()).unwrap()
    }

    fn coinbase(tag: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                witness: tag.to_le_bytes().to_vec(),
            }],
            outputs: vec![TxOutput { value: 50, script_key: Hash256([0xAA; 32]) }],
            lock_time: 0,
        }
    }

    fn next_block(parent: &StoredHeader, tag: u64, extra: Vec<Transaction>) -> Block {
        let mut txs = vec![coinbase(tag)];
        txs.extend(extra);
        let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid().unwrap()).collect();
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: parent.hash(),
                merkle_root: tarn_core::merkle::merkle_root(&txids),
                timestamp: parent.header.timestamp + 1,
                target: u64::MAX,
                nonce: tag,
            },
            transactions: txs,
        }
    }

    /// Connect a block as one atomic unit, the way the chain does.
    fn connect(store: &mut RocksStore, parent: &StoredHeader, block: &Block) -> StoredHeader {
        let entry = parent.build_next(block.header.clone());
        store.begin_batch().unwrap();
        store.put_block(&entry, block).unwrap();
        store.connect_transactions(&entry, block).unwrap();
        store.set_chain_head(&entry).unwrap();
        store.commit_batch().unwrap();
        entry
    }

    #[test]
    fn open_initializes_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let head = store.chain_head().unwrap();
        assert_eq!(head.height, 0);
        assert_eq!(head.hash(), params().genesis_hash());
        assert!(store.supports_full_blocks());
        // Genesis body is present.
        assert!(store.get_block(&head.hash()).unwrap().is_some());
    }

    #[test]
    fn round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (entry, block) = {
            let mut store = open_store(&dir);
            let genesis = store.chain_head().unwrap();
            let block = next_block(&genesis, 1, vec![]);
            let entry = connect(&mut store, &genesis, &block);
            (entry, block)
        };

        let store = open_store(&dir);
        assert_eq!(store.chain_head().unwrap(), entry);
        let got = store.get(&entry.hash()).unwrap().unwrap();
        assert_eq!(got.header.encode_fixed(), entry.header.encode_fixed());
        assert_eq!(store.get_block(&entry.hash()).unwrap(), Some(block));
    }

    #[test]
    fn connect_and_disconnect_move_utxos() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let genesis = store.chain_head().unwrap();

        let b1 = next_block(&genesis, 1, vec![]);
        let cb1_txid = b1.transactions[0].txid().unwrap();
        let e1 = connect(&mut store, &genesis, &b1);
        let op = OutPoint { txid: cb1_txid, index: 0 };
        assert!(store.get_utxo(&op).unwrap().is_some());

        // Block 2 spends block 1's coinbase.
        let spend = Transaction {
            version: 1,
            inputs: vec![TxInput { previous_output: op, witness: vec![0; 64] }],
            outputs: vec![TxOutput { value: 49, script_key: Hash256([0xBB; 32]) }],
            lock_time: 0,
        };
        let b2 = next_block(&e1, 2, vec![spend]);
        let e2 = connect(&mut store, &e1, &b2);
        assert!(store.get_utxo(&op).unwrap().is_none());

        // Disconnect block 2: the spent coinbase comes back.
        store.begin_batch().unwrap();
        store.disconnect_transactions(&e2).unwrap();
        store.set_chain_head(&e1).unwrap();
        store.commit_batch().unwrap();

        let restored = store.get_utxo(&op).unwrap().unwrap();
        assert_eq!(restored.output.value, 50);
        assert!(restored.is_coinbase);
    }

    #[test]
    fn spending_missing_utxo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let genesis = store.chain_head().unwrap();

        let phantom = OutPoint { txid: Hash256([7; 32]), index: 0 };
        let spend = Transaction {
            version: 1,
            inputs: vec![TxInput { previous_output: phantom, witness: vec![0; 64] }],
            outputs: vec![TxOutput { value: 1, script_key: Hash256([0xBB; 32]) }],
            lock_time: 0,
        };
        let block = next_block(&genesis, 1, vec![spend]);
        let entry = genesis.build_next(block.header.clone());

        store.begin_batch().unwrap();
        store.put_block(&entry, &block).unwrap();
        let err = store.connect_transactions(&entry, &block).unwrap_err();
        store.abort_batch().unwrap();
        assert!(matches!(err, StoreError::MissingUtxo(_)));
    }

    #[test]
    fn uncommitted_batch_is_invisible_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let genesis_entry = {
            let mut store = open_store(&dir);
            let genesis = store.chain_head().unwrap();
            let block = next_block(&genesis, 1, vec![]);
            let entry = genesis.build_next(block.header.clone());

            // Stage everything, then "crash" before commit.
            store.begin_batch().unwrap();
            store.put_block(&entry, &block).unwrap();
            store.connect_transactions(&entry, &block).unwrap();
            store.set_chain_head(&entry).unwrap();
            // Inside the batch the staged state is visible...
            assert_eq!(store.chain_head().unwrap(), entry);
            genesis
            // ...but the store is dropped without commit.
        };

        let store = open_store(&dir);
        assert_eq!(store.chain_head().unwrap(), genesis_entry);
    }

    #[test]
    fn staged_reads_see_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let genesis = store.chain_head().unwrap();

        // Two blocks connected inside one batch: the second spends an
        // output the first created, which only exists in the overlay.
        let b1 = next_block(&genesis, 1, vec![]);
        let cb1_txid = b1.transactions[0].txid().unwrap();
        let e1 = genesis.build_next(b1.header.clone());
        let spend = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: cb1_txid, index: 0 },
                witness: vec![0; 64],
            }],
            outputs: vec![TxOutput { value: 49, script_key: Hash256([0xCC; 32]) }],
            lock_time: 0,
        };
        let b2 = next_block(&e1, 2, vec![spend]);
        let e2 = e1.build_next(b2.header.clone());

        store.begin_batch().unwrap();
        store.put_block(&e1, &b1).unwrap();
        store.connect_transactions(&e1, &b1).unwrap();
        store.put_block(&e2, &b2).unwrap();
        store.connect_transactions(&e2, &b2).unwrap();
        store.set_chain_head(&e2).unwrap();
        store.commit_batch().unwrap();

        assert_eq!(store.chain_head().unwrap(), e2);
        assert!(store
            .get_utxo(&OutPoint { txid: cb1_txid, index: 0 })
            .unwrap()
            .is_none());
    }

    #[test]
    fn pruned_bodies_answer_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let mut parent = store.chain_head().unwrap();
        let mut entries = Vec::new();
        for i in 1..=6u64 {
            let block = next_block(&parent, i, vec![]);
            parent = connect(&mut store, &parent, &block);
            entries.push(parent.clone());
        }

        let pruned = store.prune_blocks(2).unwrap();
        assert_eq!(pruned, 4);

        // Deep bodies are gone, recent ones and all headers remain.
        assert!(matches!(
            store.get_block(&entries[0].hash()),
            Err(StoreError::Pruned(_))
        ));
        assert!(store.get(&entries[0].hash()).unwrap().is_some());
        assert!(store.get_block(&entries[5].hash()).unwrap().is_some());
        assert!(store.get_block(&entries[4].hash()).unwrap().is_some());
        // Genesis body is never pruned.
        assert!(store.get_block(&params().genesis_hash()).unwrap().is_some());
    }

    #[test]
    fn nested_batch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        store.begin_batch().unwrap();
        assert!(matches!(
            store.begin_batch(),
            Err(StoreError::Corruption(_))
        ));
        store.abort_batch().unwrap();
    }

    #[test]
    fn hash_at_height_walks_best_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let mut parent = store.chain_head().unwrap();
        for i in 1..=3u64 {
            let block = next_block(&parent, i, vec![]);
            parent = connect(&mut store, &parent, &block);
        }
        assert_eq!(store.hash_at_height(3).unwrap(), Some(parent.hash()));
        assert_eq!(
            store.hash_at_height(0).unwrap(),
            Some(params().genesis_hash())
        );
        assert_eq!(store.hash_at_height(7).unwrap(), None);
    }
}
