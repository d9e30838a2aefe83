//! The chain state machine.
//!
//! [`Chain`] owns a [`BlockStore`] and drives every chain mutation: it
//! validates candidates against their parent, tracks cumulative work,
//! extends the tip, buffers orphans, and performs reorganizations when a
//! competing branch overtakes the current tip. All `accept` calls are
//! serialized by the caller (one lock per chain instance); nothing else
//! writes the store.
//!
//! Two validation modes exist, chosen at construction:
//!
//! - **SPV** ([`Chain::new_spv`]): headers only. Bodies are stored when
//!   provided and the backend retains them, but no UTXO state is tracked.
//! - **Full** ([`Chain::new_full`]): every best-chain block's transactions
//!   are applied to the store's UTXO set, with undo data for disconnects.
//!   Requires a backend that retains full blocks.
//!
//! Tie-break policy: a candidate with cumulative work equal to the current
//! tip's does not replace it: first seen wins. This is deterministic local
//! policy, not consensus-canonical; other nodes may settle on the sibling.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use tarn_core::difficulty;
use tarn_core::error::{ChainError, StoreError, ValidationError};
use tarn_core::events::{ChainEvent, EventBus};
use tarn_core::params::NetworkParams;
use tarn_core::store::{BlockStore, StoredHeader};
use tarn_core::types::{Block, BlockHeader, Hash256};

use crate::checkpoint;
use crate::confidence::ConfidenceTracker;

/// Maximum number of orphan candidates buffered while their ancestors are
/// missing. Oldest entries are evicted first.
pub const MAX_ORPHANS: usize = 256;

/// Maximum headers served per [`Chain::headers_after`] call.
pub const MAX_HEADERS_PER_REQUEST: usize = 2000;

/// Outcome of accepting a candidate header or block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// The candidate extended the current tip.
    Extended,
    /// The candidate ended up on a side branch; the tip did not move.
    SideChain,
    /// The candidate's branch overtook the tip and the chain reorganized.
    Reorganized {
        /// Hashes disconnected from the old branch, tip-down order.
        disconnected: Vec<Hash256>,
        /// Hashes connected from the new branch, fork-up order.
        connected: Vec<Hash256>,
    },
    /// The candidate's parent is unknown; it was buffered for later.
    Orphan,
    /// The candidate is already stored (including re-delivery of the tip).
    Duplicate,
}

/// A buffered candidate waiting for its parent.
struct OrphanEntry {
    header: BlockHeader,
    body: Option<Block>,
}

/// Bounded FIFO pool of orphan candidates, indexed by missing parent hash.
struct OrphanPool {
    by_parent: HashMap<Hash256, Vec<OrphanEntry>>,
    /// Candidate hashes in arrival order, for eviction.
    order: VecDeque<Hash256>,
    /// Candidate hash → parent hash, to find pool entries on eviction.
    index: HashMap<Hash256, Hash256>,
    max: usize,
}

impl OrphanPool {
    fn new(max: usize) -> Self {
        Self {
            by_parent: HashMap::new(),
            order: VecDeque::new(),
            index: HashMap::new(),
            max,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn insert(&mut self, header: BlockHeader, body: Option<Block>) {
        let hash = header.hash();
        if self.index.contains_key(&hash) {
            return;
        }
        while self.index.len() >= self.max {
            self.evict_oldest();
        }
        let parent = header.prev_hash;
        self.index.insert(hash, parent);
        self.order.push_back(hash);
        self.by_parent
            .entry(parent)
            .or_default()
            .push(OrphanEntry { header, body });
    }

    fn evict_oldest(&mut self) {
        let Some(victim) = self.order.pop_front() else { return };
        let Some(parent) = self.index.remove(&victim) else { return };
        if let Some(entries) = self.by_parent.get_mut(&parent) {
            entries.retain(|e| e.header.hash() != victim);
            if entries.is_empty() {
                self.by_parent.remove(&parent);
            }
        }
    }

    /// Remove and return every orphan waiting on the given parent.
    fn take_children(&mut self, parent: &Hash256) -> Vec<OrphanEntry> {
        let entries = self.by_parent.remove(parent).unwrap_or_default();
        for entry in &entries {
            let hash = entry.header.hash();
            self.index.remove(&hash);
            self.order.retain(|h| *h != hash);
        }
        entries
    }
}

/// The chain state machine. See the module docs for the two modes.
pub struct Chain {
    params: NetworkParams,
    store: Box<dyn BlockStore>,
    bus: EventBus,
    orphans: OrphanPool,
    confidence: Option<ConfidenceTracker>,
    full_validation: bool,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("full_validation", &self.full_validation)
            .finish_non_exhaustive()
    }
}

impl Chain {
    /// Create a header-only (SPV) chain over the given store.
    ///
    /// If the store is empty, the network's genesis block is committed as
    /// the initial head.
    pub fn new_spv(
        store: Box<dyn BlockStore>,
        params: NetworkParams,
        bus: EventBus,
    ) -> Result<Self, ChainError> {
        Self::new(store, params, bus, false)
    }

    /// Create a fully-validating chain over the given store.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unsupported`] if the backend does not retain full
    /// blocks.
    pub fn new_full(
        store: Box<dyn BlockStore>,
        params: NetworkParams,
        bus: EventBus,
    ) -> Result<Self, ChainError> {
        if !store.supports_full_blocks() {
            return Err(StoreError::Unsupported(
                "full validation requires a full block store",
            )
            .into());
        }
        Self::new(store, params, bus, true)
    }

    fn new(
        mut store: Box<dyn BlockStore>,
        params: NetworkParams,
        bus: EventBus,
        full_validation: bool,
    ) -> Result<Self, ChainError> {
        // Commit genesis if the store is empty.
        match store.chain_head() {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                let genesis = params.genesis_block();
                let entry = StoredHeader::genesis(genesis.header.clone());
                info!(hash = %entry.hash(), network = ?params.kind, "initializing chain at genesis");
                store.begin_batch()?;
                let staged = (|| -> Result<(), StoreError> {
                    if store.supports_full_blocks() {
                        store.put_block(&entry, &genesis)?;
                        if full_validation {
                            store.connect_transactions(&entry, &genesis)?;
                        }
                    } else {
                        store.put(&entry)?;
                    }
                    store.set_chain_head(&entry)
                })();
                match staged {
                    Ok(()) => store.commit_batch()?,
                    Err(e) => {
                        store.abort_batch()?;
                        return Err(e.into());
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            params,
            store,
            bus,
            orphans: OrphanPool::new(MAX_ORPHANS),
            confidence: None,
            full_validation,
        })
    }

    /// Install the wallet layer's watched-script set. Transactions paying
    /// these keys (and their spends) produce confidence events.
    pub fn watch_scripts(&mut self, scripts: HashSet<Hash256>) {
        self.confidence = Some(ConfidenceTracker::new(scripts));
    }

    /// The network parameters this chain was built with.
    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// The event bus for this chain instance.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Whether this chain applies transactions to a UTXO set.
    pub fn is_full_validation(&self) -> bool {
        self.full_validation
    }

    /// Number of buffered orphans.
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// The current best entry.
    pub fn tip(&self) -> Result<StoredHeader, ChainError> {
        Ok(self.store.chain_head()?)
    }

    /// The current best height.
    pub fn height(&self) -> Result<u64, ChainError> {
        Ok(self.tip()?.height)
    }

    /// Look up a stored entry by hash.
    pub fn get(&self, hash: &Hash256) -> Result<Option<StoredHeader>, ChainError> {
        Ok(self.store.get(hash)?)
    }

    /// Look up a full block body by hash.
    ///
    /// # Errors
    ///
    /// [`StoreError::Pruned`] when only the header is retained.
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        Ok(self.store.get_block(hash)?)
    }

    /// Hash of the best-chain entry at `height`.
    pub fn hash_at_height(&self, height: u64) -> Result<Option<Hash256>, ChainError> {
        Ok(self.store.hash_at_height(height)?)
    }

    // ------------------------------------------------------------------
    // Accept
    // ------------------------------------------------------------------

    /// Accept a header candidate.
    ///
    /// In full-validation mode a header alone cannot move the tip
    /// ([`ChainError::BodyRequired`]); it may still be stored on a side
    /// branch for later work comparison.
    pub fn accept_header(&mut self, header: BlockHeader) -> Result<Accepted, ChainError> {
        let result = self.accept_one(header, None)?;
        self.settle_orphans(&result);
        Ok(result)
    }

    /// Accept a full block candidate.
    pub fn accept_block(&mut self, block: Block) -> Result<Accepted, ChainError> {
        validate_block_structure(&block)?;
        let header = block.header.clone();
        let result = self.accept_one(header, Some(block))?;
        self.settle_orphans(&result);
        Ok(result)
    }

    /// Core accept algorithm for one candidate; never drains orphans.
    fn accept_one(
        &mut self,
        header: BlockHeader,
        body: Option<Block>,
    ) -> Result<Accepted, ChainError> {
        let hash = header.hash();

        if self.store.contains(&hash)? {
            debug!(%hash, "duplicate candidate ignored");
            return Ok(Accepted::Duplicate);
        }

        // Step 1: resolve the parent, or buffer as orphan.
        let Some(parent) = self.store.get(&header.prev_hash)? else {
            debug!(%hash, parent = %header.prev_hash, "buffering orphan candidate");
            self.orphans.insert(header, body);
            return Ok(Accepted::Orphan);
        };

        // Step 2: candidate-specific validation.
        self.validate_header(&header, &parent)?;

        // Step 3: cumulative work.
        let entry = parent.build_next(header);
        let head = self.store.chain_head()?;

        if entry.header.prev_hash == head.hash() {
            // Step 4: normal extension.
            self.connect_extension(&entry, body.as_ref())?;
            Ok(Accepted::Extended)
        } else if entry.more_work_than(&head) {
            // Step 5: a side branch overtook the tip.
            self.reorganize(&entry, body.as_ref(), &head)
        } else {
            // Step 6: store for future work comparison; tip unchanged.
            // Covers the equal-work case too: first seen wins.
            match &body {
                Some(b) => self.store.put_block(&entry, b)?,
                None => self.store.put(&entry)?,
            }
            debug!(
                hash = %entry.hash(),
                height = entry.height,
                "stored side-chain candidate"
            );
            Ok(Accepted::SideChain)
        }
    }

    /// Try to connect buffered orphans whose ancestors just arrived.
    fn settle_orphans(&mut self, result: &Accepted) {
        if matches!(result, Accepted::Orphan | Accepted::Duplicate) {
            return;
        }
        let mut parents = self.ready_orphan_parents();

        while let Some(parent) = parents.pop() {
            for orphan in self.orphans.take_children(&parent) {
                let hash = orphan.header.hash();
                match self.accept_one(orphan.header, orphan.body) {
                    Ok(Accepted::Extended)
                    | Ok(Accepted::SideChain)
                    | Ok(Accepted::Reorganized { .. }) => {
                        debug!(%hash, "connected buffered orphan");
                        parents.push(hash);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%hash, error = %e, "buffered orphan rejected");
                    }
                }
            }
        }
    }

    /// Parent hashes with waiting orphans that are now resolvable.
    fn ready_orphan_parents(&self) -> Vec<Hash256> {
        self.orphans
            .by_parent
            .keys()
            .filter(|parent| self.store.contains(parent).unwrap_or(false))
            .copied()
            .collect()
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Candidate-specific checks against its resolved parent.
    fn validate_header(
        &self,
        header: &BlockHeader,
        parent: &StoredHeader,
    ) -> Result<(), ChainError> {
        if !header.meets_target() {
            return Err(ValidationError::BadProofOfWork.into());
        }

        if header.timestamp <= parent.header.timestamp {
            return Err(ValidationError::TimestampNotAfterParent.into());
        }

        let now = unix_time_now();
        let limit = now.saturating_add(self.params.max_time_drift);
        if header.timestamp > limit {
            return Err(ValidationError::TimestampTooFar(header.timestamp - limit).into());
        }

        let expected = self.expected_target_for(parent)?;
        if header.target != expected {
            return Err(ValidationError::WrongTarget {
                got: header.target,
                expected,
            }
            .into());
        }

        checkpoint::check_checkpoint(
            &self.params.checkpoints,
            parent.height + 1,
            &header.hash(),
        )?;

        Ok(())
    }

    /// The difficulty target required for a child of `parent`, computed from
    /// the retarget window walked along the parent's own branch.
    fn expected_target_for(&self, parent: &StoredHeader) -> Result<u64, ChainError> {
        let height = parent.height + 1;
        if !self.params.retargeting || height <= 1 {
            return Ok(self.params.initial_target);
        }

        // Up to difficulty_window intervals = window + 1 timestamps, ending
        // at the parent. A shorter early chain (or an eviction-bounded ring)
        // yields a smaller window.
        let wanted = self.params.difficulty_window as usize + 1;
        let mut timestamps = VecDeque::with_capacity(wanted);
        let mut cursor = parent.clone();
        loop {
            timestamps.push_front(cursor.header.timestamp);
            if timestamps.len() == wanted || cursor.height == 0 {
                break;
            }
            match self.store.get(&cursor.header.prev_hash)? {
                Some(prev) => cursor = prev,
                None => break,
            }
        }

        let timestamps: Vec<u64> = timestamps.into();
        Ok(difficulty::next_target(
            &timestamps,
            parent.header.target,
            self.params.block_time_secs,
        ))
    }

    // ------------------------------------------------------------------
    // Tip movement
    // ------------------------------------------------------------------

    /// Commit a candidate that directly extends the tip.
    fn connect_extension(
        &mut self,
        entry: &StoredHeader,
        body: Option<&Block>,
    ) -> Result<(), ChainError> {
        if self.full_validation && body.is_none() {
            return Err(ChainError::BodyRequired);
        }

        let old_tip = self.store.chain_head()?.hash();

        self.store.begin_batch()?;
        let staged = self.stage_extension(entry, body);
        match staged {
            Ok(()) => self.store.commit_batch()?,
            Err(e) => {
                self.store.abort_batch()?;
                return Err(e.into());
            }
        }

        info!(hash = %entry.hash(), height = entry.height, "extended chain tip");
        self.bus.publish(ChainEvent::BlockConnected {
            hash: entry.hash(),
            height: entry.height,
        });
        self.bus.publish(ChainEvent::TipChanged {
            old: Some(old_tip),
            new: entry.hash(),
            height: entry.height,
        });
        self.publish_confidence(body.map(|b| (b, entry.height)));
        Ok(())
    }

    fn stage_extension(
        &mut self,
        entry: &StoredHeader,
        body: Option<&Block>,
    ) -> Result<(), StoreError> {
        match body {
            Some(b) => self.store.put_block(entry, b)?,
            None => self.store.put(entry)?,
        }
        if self.full_validation {
            // Checked by the caller; bodies always exist here.
            if let Some(b) = body {
                self.store.connect_transactions(entry, b)?;
            }
        }
        self.store.set_chain_head(entry)
    }

    /// Perform a reorganization to `entry`, whose branch has strictly more
    /// cumulative work than `head`.
    ///
    /// Two-phase and all-or-nothing: the old branch is disconnected tip-down
    /// and the new branch connected fork-up inside one store batch; any
    /// failure aborts the batch, leaving the pre-reorg tip in place.
    fn reorganize(
        &mut self,
        entry: &StoredHeader,
        body: Option<&Block>,
        head: &StoredHeader,
    ) -> Result<Accepted, ChainError> {
        if self.full_validation && body.is_none() {
            return Err(ChainError::BodyRequired);
        }

        let parent = self
            .store
            .get(&entry.header.prev_hash)?
            .ok_or_else(|| ChainError::ReorgFailed("candidate parent vanished".into()))?;

        // Walk both branches back to the fork point.
        let mut old_branch: Vec<StoredHeader> = Vec::new();
        let mut new_branch: Vec<StoredHeader> = Vec::new();
        let mut old_cursor = head.clone();
        let mut new_cursor = parent;

        while new_cursor.height > old_cursor.height {
            new_branch.push(new_cursor.clone());
            new_cursor = self.require_entry(&new_cursor.header.prev_hash)?;
        }
        while old_cursor.height > new_cursor.height {
            old_branch.push(old_cursor.clone());
            old_cursor = self.require_entry(&old_cursor.header.prev_hash)?;
        }
        while old_cursor.hash() != new_cursor.hash() {
            if old_cursor.height == 0 {
                return Err(StoreError::Corruption(
                    "branches share no common ancestor".into(),
                )
                .into());
            }
            old_branch.push(old_cursor.clone());
            old_cursor = self.require_entry(&old_cursor.header.prev_hash)?;
            new_branch.push(new_cursor.clone());
            new_cursor = self.require_entry(&new_cursor.header.prev_hash)?;
        }
        let fork = old_cursor;

        // A reorg may not rewrite checkpointed history.
        if checkpoint::reorg_crosses_checkpoint(&self.params.checkpoints, fork.height) {
            return Err(ChainError::CheckpointViolation(
                checkpoint::last_checkpoint_height(&self.params.checkpoints),
            ));
        }

        // Oldest-first connect order: fork+1 .. parent, then the candidate.
        new_branch.reverse();

        // Full mode needs every new-branch body resident before starting.
        let mut new_bodies: Vec<Block> = Vec::new();
        if self.full_validation {
            for e in &new_branch {
                match self.store.get_block(&e.hash()) {
                    Ok(Some(b)) => new_bodies.push(b),
                    Ok(None) | Err(StoreError::Pruned(_)) => {
                        return Err(ChainError::ReorgFailed(format!(
                            "missing body for {} at height {}",
                            e.hash(),
                            e.height
                        )));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!(
            fork_height = fork.height,
            disconnecting = old_branch.len(),
            connecting = new_branch.len() + 1,
            new_tip = %entry.hash(),
            "reorganizing chain"
        );

        self.store.begin_batch()?;
        let staged = self.stage_reorg(entry, body, &old_branch, &new_branch, &new_bodies);
        match staged {
            Ok(()) => self.store.commit_batch()?,
            Err(e) => {
                self.store.abort_batch()?;
                warn!(error = %e, tip = %head.hash(), "reorganization aborted, tip restored");
                return Err(ChainError::ReorgFailed(e.to_string()));
            }
        }

        // Publish in mutation order only after the commit.
        let disconnected: Vec<Hash256> = old_branch.iter().map(StoredHeader::hash).collect();
        let mut connected: Vec<Hash256> = new_branch.iter().map(StoredHeader::hash).collect();
        connected.push(entry.hash());

        for e in &old_branch {
            self.bus.publish(ChainEvent::BlockDisconnected {
                hash: e.hash(),
                height: e.height,
            });
        }
        for e in &new_branch {
            self.bus.publish(ChainEvent::BlockConnected {
                hash: e.hash(),
                height: e.height,
            });
        }
        self.bus.publish(ChainEvent::BlockConnected {
            hash: entry.hash(),
            height: entry.height,
        });
        self.bus.publish(ChainEvent::TipChanged {
            old: Some(head.hash()),
            new: entry.hash(),
            height: entry.height,
        });

        if let Some(tracker) = &mut self.confidence {
            for hash in &disconnected {
                tracker.block_disconnected(hash);
            }
            for (e, b) in new_branch.iter().zip(new_bodies.iter()) {
                tracker.block_connected(b, e.height);
            }
        }
        self.publish_confidence(body.map(|b| (b, entry.height)));

        Ok(Accepted::Reorganized {
            disconnected,
            connected,
        })
    }

    fn stage_reorg(
        &mut self,
        entry: &StoredHeader,
        body: Option<&Block>,
        old_branch: &[StoredHeader],
        new_branch: &[StoredHeader],
        new_bodies: &[Block],
    ) -> Result<(), StoreError> {
        match body {
            Some(b) => self.store.put_block(entry, b)?,
            None => self.store.put(entry)?,
        }

        if self.full_validation {
            // Disconnect the old branch tip-down, undoing UTXO deltas.
            for e in old_branch {
                self.store.disconnect_transactions(e)?;
            }
            // Connect the new branch fork-up, applying UTXO deltas.
            for (e, b) in new_branch.iter().zip(new_bodies.iter()) {
                self.store.connect_transactions(e, b)?;
            }
            if let Some(b) = body {
                self.store.connect_transactions(entry, b)?;
            }
        }

        self.store.set_chain_head(entry)
    }

    fn require_entry(&self, hash: &Hash256) -> Result<StoredHeader, ChainError> {
        self.store
            .get(hash)?
            .ok_or_else(|| ChainError::ReorgFailed(format!("missing ancestor {hash}")))
    }

    /// Feed the confidence tracker and publish any resulting events.
    fn publish_confidence(&mut self, connected: Option<(&Block, u64)>) {
        let Ok(tip_height) = self.height() else { return };
        let Some(tracker) = &mut self.confidence else { return };
        if let Some((block, height)) = connected {
            tracker.block_connected(block, height);
        }
        for (txid, confidence) in tracker.confidence_events(tip_height) {
            self.bus
                .publish(ChainEvent::ConfidenceChanged { txid, confidence });
        }
    }

    // ------------------------------------------------------------------
    // Sync queries
    // ------------------------------------------------------------------

    /// Build a block locator: hashes walking back from the tip, dense near
    /// the tip and geometrically sparser going back, always ending at a
    /// root the remote side can anchor on.
    pub fn block_locator(&self) -> Result<Vec<Hash256>, ChainError> {
        let head = self.tip()?;
        let mut locator = Vec::new();
        let mut cursor = head;
        let mut step = 1u64;

        loop {
            locator.push(cursor.hash());
            if cursor.height == 0 {
                break;
            }
            let back = step.min(cursor.height);
            for _ in 0..back {
                match self.store.get(&cursor.header.prev_hash)? {
                    Some(prev) => cursor = prev,
                    None => {
                        // Ancestor evicted (bounded store). Anchor at genesis.
                        locator.push(self.params.genesis_hash());
                        return Ok(locator);
                    }
                }
            }
            if locator.len() > 10 {
                step *= 2;
            }
        }

        Ok(locator)
    }

    /// Find the most recent locator hash that is on our best chain.
    pub fn find_common_ancestor(
        &self,
        locator: &[Hash256],
    ) -> Result<Option<StoredHeader>, ChainError> {
        for hash in locator {
            let Some(entry) = self.store.get(hash)? else { continue };
            if self.store.hash_at_height(entry.height)? == Some(*hash) {
                return Ok(Some(entry));
            }
            // Known but stale/orphaned; keep looking for a deeper anchor.
        }
        Ok(None)
    }

    /// Best-chain headers after the given hash, oldest first, capped at
    /// [`MAX_HEADERS_PER_REQUEST`].
    pub fn headers_after(
        &self,
        from: &Hash256,
        max: usize,
    ) -> Result<Vec<BlockHeader>, ChainError> {
        let limit = max.min(MAX_HEADERS_PER_REQUEST);
        let Some(start) = self.store.get(from)? else {
            return Ok(Vec::new());
        };
        if self.store.hash_at_height(start.height)? != Some(*from) {
            return Ok(Vec::new());
        }

        let head = self.tip()?;
        let mut headers = Vec::new();
        let mut cursor = head;
        while cursor.height > start.height {
            headers.push(cursor.header.clone());
            cursor = self.require_entry(&cursor.header.prev_hash)?;
        }
        headers.reverse();
        headers.truncate(limit);
        Ok(headers)
    }
}

/// Structural checks that need no chain context.
fn validate_block_structure(block: &Block) -> Result<(), ValidationError> {
    if block.transactions.is_empty() {
        return Err(ValidationError::EmptyBlock);
    }
    if !block.transactions[0].is_coinbase() {
        return Err(ValidationError::FirstTxNotCoinbase);
    }
    if block.transactions[1..].iter().any(|tx| tx.is_coinbase()) {
        return Err(ValidationError::MultipleCoinbase);
    }

    let mut txids = Vec::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        txids.push(tx.txid()?);
    }
    if tarn_core::merkle::merkle_root(&txids) != block.header.merkle_root {
        return Err(ValidationError::BadMerkleRoot);
    }
    Ok(())
}

fn unix_time_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
