//! Fixed-capacity on-disk ring of header entries (SPV mode).
//!
//! A single file holds a 48-byte metadata header followed by `capacity`
//! fixed 152-byte records: hash, height, cumulative work, and the fixed
//! header layout. Insertion beyond capacity recycles the oldest slot.
//! Recycling refuses (`StoreError::Full`) when the victim is an ancestor
//! of the current head that is still inside the ring's reorg horizon;
//! only the oldest retainable ancestor may be dropped, so work continuity
//! from the head back through the ring is never broken.
//!
//! The whole ring is cached in memory (a few hundred KiB at default
//! capacity); the file is the durable copy, and the head-pointer write is
//! the commit point, synced on every head move. Reopening rebuilds the
//! index by scanning the records.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info};

use tarn_core::error::StoreError;
use tarn_core::params::NetworkParams;
use tarn_core::store::{BlockStore, StoredHeader};
use tarn_core::types::{BlockHeader, Hash256};

/// File identification magic.
const FILE_MAGIC: [u8; 4] = *b"TRNG";

/// Metadata header size: magic, capacity, cursor, count, head hash.
const META_SIZE: u64 = 4 + 4 + 4 + 4 + 32;

/// One record: hash, height, chain work, fixed header layout.
const RECORD_SIZE: u64 = 32 + 8 + 16 + BlockHeader::ENCODED_SIZE as u64;

/// Default capacity used by node composition.
pub const DEFAULT_RING_CAPACITY: u32 = 5000;

/// Bounded on-disk header store. See the module docs.
pub struct RingStore {
    file: File,
    capacity: u32,
    /// Next slot to write (the oldest record once the ring is full).
    cursor: u32,
    /// Number of occupied slots.
    count: u32,
    head: Option<Hash256>,
    index: HashMap<Hash256, u32>,
    slots: Vec<Option<StoredHeader>>,
}

impl RingStore {
    /// Open or create a ring file with the given capacity.
    ///
    /// An empty ring is initialized with the network's genesis header as
    /// the chain head.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corruption`] if the file exists with a different
    /// magic or capacity; [`StoreError::Io`] on filesystem failure.
    pub fn open(
        path: impl AsRef<Path>,
        capacity: u32,
        params: &NetworkParams,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if capacity == 0 {
            return Err(StoreError::Corruption("ring capacity of zero".into()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let exists = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        let mut store = if exists {
            Self::load(file, capacity)?
        } else {
            Self::create(file, capacity)?
        };

        if store.head.is_none() {
            let genesis = StoredHeader::genesis(params.genesis_block().header.clone());
            info!(hash = %genesis.hash(), capacity, "initializing header ring at genesis");
            store.put(&genesis)?;
            store.set_chain_head(&genesis)?;
        } else {
            debug!(
                entries = store.count,
                head = %store.head.map(|h| h.to_string()).unwrap_or_default(),
                "reopened header ring"
            );
        }
        Ok(store)
    }

    fn create(mut file: File, capacity: u32) -> Result<Self, StoreError> {
        file.set_len(META_SIZE + capacity as u64 * RECORD_SIZE)
            .map_err(io_err)?;
        let mut store = Self {
            file,
            capacity,
            cursor: 0,
            count: 0,
            head: None,
            index: HashMap::new(),
            slots: vec![None; capacity as usize],
        };
        store.write_meta()?;
        Ok(store)
    }

    fn load(mut file: File, capacity: u32) -> Result<Self, StoreError> {
        let mut meta = [0u8; META_SIZE as usize];
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        file.read_exact(&mut meta).map_err(io_err)?;

        if meta[0..4] != FILE_MAGIC {
            return Err(StoreError::Corruption("not a ring store file".into()));
        }
        let stored_capacity = u32::from_le_bytes(meta[4..8].try_into().unwrap_or_default());
        if stored_capacity != capacity {
            return Err(StoreError::Corruption(format!(
                "ring capacity mismatch: file has {stored_capacity}, configured {capacity}"
            )));
        }
        let cursor = u32::from_le_bytes(meta[8..12].try_into().unwrap_or_default());
        let count = u32::from_le_bytes(meta[12..16].try_into().unwrap_or_default());
        if cursor >= capacity || count > capacity {
            return Err(StoreError::Corruption("ring metadata out of range".into()));
        }
        let mut head_bytes = [0u8; 32];
        head_bytes.copy_from_slice(&meta[16..48]);
        let head_hash = Hash256(head_bytes);
        let head = if head_hash.is_zero() { None } else { Some(head_hash) };

        // Rebuild the in-memory index from the records.
        let mut index = HashMap::new();
        let mut slots = vec![None; capacity as usize];
        for slot in 0..capacity {
            let mut record = vec![0u8; RECORD_SIZE as usize];
            file.seek(SeekFrom::Start(META_SIZE + slot as u64 * RECORD_SIZE))
                .map_err(io_err)?;
            file.read_exact(&mut record).map_err(io_err)?;
            // The zero hash marks an empty slot.
            if record[0..32].iter().all(|b| *b == 0) {
                continue;
            }
            let entry = decode_record(&record)?;
            let hash = entry.hash();
            if Hash256(record[0..32].try_into().unwrap_or_default()) != hash {
                return Err(StoreError::Corruption(format!(
                    "record hash mismatch in slot {slot}"
                )));
            }
            index.insert(hash, slot);
            slots[slot as usize] = Some(entry);
        }

        if let Some(h) = head {
            if !index.contains_key(&h) {
                return Err(StoreError::Corruption("head hash not present in ring".into()));
            }
        }

        Ok(Self { file, capacity, cursor, count, head, index, slots })
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Whether the ring holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn write_meta(&mut self) -> Result<(), StoreError> {
        let mut meta = [0u8; META_SIZE as usize];
        meta[0..4].copy_from_slice(&FILE_MAGIC);
        meta[4..8].copy_from_slice(&self.capacity.to_le_bytes());
        meta[8..12].copy_from_slice(&self.cursor.to_le_bytes());
        meta[12..16].copy_from_slice(&self.count.to_le_bytes());
        if let Some(head) = self.head {
            meta[16..48].copy_from_slice(head.as_bytes());
        }
        self.file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        self.file.write_all(&meta).map_err(io_err)
    }

    fn write_record(&mut self, slot: u32, entry: &StoredHeader) -> Result<(), StoreError> {
        let record = encode_record(entry);
        self.file
            .seek(SeekFrom::Start(META_SIZE + slot as u64 * RECORD_SIZE))
            .map_err(io_err)?;
        self.file.write_all(&record).map_err(io_err)
    }

    /// Whether evicting `victim` would break work continuity: true when it
    /// is a head ancestor younger than the ring's horizon. The single
    /// oldest retainable ancestor may be recycled.
    fn is_required(&self, victim: &StoredHeader) -> Result<bool, StoreError> {
        let Some(head_hash) = self.head else { return Ok(false) };
        let victim_hash = victim.hash();

        let mut cursor_hash = head_hash;
        for depth in 0..self.capacity as u64 {
            if cursor_hash == victim_hash {
                return Ok(depth + 1 < self.capacity as u64);
            }
            let Some(&slot) = self.index.get(&cursor_hash) else { break };
            let Some(entry) = &self.slots[slot as usize] else { break };
            if entry.height == 0 {
                break;
            }
            cursor_hash = entry.header.prev_hash;
        }
        Ok(false)
    }
}

impl BlockStore for RingStore {
    fn put(&mut self, entry: &StoredHeader) -> Result<(), StoreError> {
        let hash = entry.hash();

        // Content-addressed: rewriting an existing entry is a no-op slot
        // update, never an eviction.
        if let Some(&slot) = self.index.get(&hash) {
            self.write_record(slot, entry)?;
            self.slots[slot as usize] = Some(entry.clone());
            return Ok(());
        }

        let slot = self.cursor;
        if self.count == self.capacity {
            let victim = self.slots[slot as usize].clone();
            if let Some(victim) = victim {
                if self.is_required(&victim)? {
                    return Err(StoreError::Full);
                }
                self.index.remove(&victim.hash());
                debug!(evicted = %victim.hash(), height = victim.height, "ring slot recycled");
            }
        }

        self.write_record(slot, entry)?;
        self.slots[slot as usize] = Some(entry.clone());
        self.index.insert(hash, slot);
        self.cursor = (self.cursor + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
        self.write_meta()
    }

    fn get(&self, hash: &Hash256) -> Result<Option<StoredHeader>, StoreError> {
        Ok(self
            .index
            .get(hash)
            .and_then(|slot| self.slots[*slot as usize].clone()))
    }

    fn chain_head(&self) -> Result<StoredHeader, StoreError> {
        let head = self
            .head
            .ok_or_else(|| StoreError::NotFound("chain head".into()))?;
        self.get(&head)?
            .ok_or_else(|| StoreError::Corruption(format!("head entry missing: {head}")))
    }

    fn set_chain_head(&mut self, entry: &StoredHeader) -> Result<(), StoreError> {
        let hash = entry.hash();
        if !self.index.contains_key(&hash) {
            return Err(StoreError::NotFound(hash.to_string()));
        }
        self.head = Some(hash);
        self.write_meta()?;
        // The head pointer is the commit point; make it durable.
        self.file.sync_data().map_err(io_err)
    }
}

fn encode_record(entry: &StoredHeader) -> [u8; RECORD_SIZE as usize] {
    let mut record = [0u8; RECORD_SIZE as usize];
    record[0..32].copy_from_slice(entry.hash().as_bytes());
    record[32..40].copy_from_slice(&entry.height.to_le_bytes());
    record[40..56].copy_from_slice(&entry.chain_work.to_le_bytes());
    record[56..].copy_from_slice(&entry.header.encode_fixed());
    record
}

fn decode_record(record: &[u8]) -> Result<StoredHeader, StoreError> {
    if record.len() != RECORD_SIZE as usize {
        return Err(StoreError::Corruption("short ring record".into()));
    }
    let height = u64::from_le_bytes(record[32..40].try_into().unwrap_or_default());
    let chain_work = u128::from_le_bytes(record[40..56].try_into().unwrap_or_default());
    let mut header_bytes = [0u8; BlockHeader::ENCODED_SIZE];
    header_bytes.copy_from_slice(&record[56..]);
    let header = BlockHeader::decode_fixed(&header_bytes);
    Ok(StoredHeader { header, height, chain_work })
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}
