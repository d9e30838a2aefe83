//! Node composition: one chain, one store, one peer group.
//!
//! [`Node`] wires the configured store backend into a [`Chain`], hangs a
//! [`PeerGroup`] off it, and exposes the public entry points an embedding
//! application needs: `start`, `wait_for_peers`, `connected_peers`, `add`,
//! `subscribe`, `sync`, the single-object fetchers, and read-only chain
//! queries.
//!
//! Error containment follows the chain core's policy: validation, store,
//! and network errors are returned to the caller; only a store durability
//! violation ([`StoreError::Corruption`] out of a commit path) is logged
//! as fatal, because continuing would risk persisting an inconsistent
//! chain.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::error;

use tarn_chain::{Accepted, Chain};
use tarn_core::error::{ChainError, StoreError, TarnError};
use tarn_core::events::{ChainEvent, EventBus};
use tarn_core::params::NetworkParams;
use tarn_core::store::{MemoryBlockStore, StoredHeader};
use tarn_core::types::{Block, Hash256, Transaction};
use tarn_net::config::PeerGroupConfig;
use tarn_net::discovery::DnsDiscovery;
use tarn_net::message::InvItem;
use tarn_net::{Peer, PeerGroup};

use crate::config::{NodeConfig, StoreBackend};
use crate::ring::RingStore;
use crate::storage::RocksStore;

/// A running (or startable) node instance.
pub struct Node {
    config: NodeConfig,
    params: NetworkParams,
    chain: Arc<Mutex<Chain>>,
    group: Arc<PeerGroup>,
    bus: EventBus,
}

impl Node {
    /// Build a node from configuration.
    ///
    /// Validates the configuration (invalid configuration is startup-fatal),
    /// opens the selected store backend (committing genesis on first run),
    /// and prepares the peer group without connecting anywhere yet.
    pub fn new(config: NodeConfig) -> Result<Arc<Self>, TarnError> {
        config.validate()?;
        let params = config.params();
        let bus = EventBus::new();

        let chain = match &config.backend {
            StoreBackend::Memory => Chain::new_full(
                Box::new(MemoryBlockStore::new()),
                params.clone(),
                bus.clone(),
            )?,
            StoreBackend::Ring { capacity } => Chain::new_spv(
                Box::new(RingStore::open(config.ring_path(), *capacity, &params)?),
                params.clone(),
                bus.clone(),
            )?,
            StoreBackend::Full { .. } => Chain::new_full(
                Box::new(RocksStore::open(config.db_path(), &params)?),
                params.clone(),
                bus.clone(),
            )?,
        };
        let chain = Arc::new(Mutex::new(chain));

        let group_config = PeerGroupConfig {
            target_peers: config.target_peers,
            request_timeout: config.request_timeout,
            listen_addr: config.listen,
            ..PeerGroupConfig::default()
        };
        let group = PeerGroup::new(params.clone(), group_config, Arc::clone(&chain));

        for addr in &config.fixed_peers {
            group.add_address(*addr);
        }
        if config.use_dns_seeds && !params.dns_seeds.is_empty() {
            group.add_discovery_source(Box::new(DnsDiscovery::from_params(&params)));
        }

        Ok(Arc::new(Self { config, params, chain, group, bus }))
    }

    /// The network profile this node runs on.
    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// The configuration this node was built from.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start networking: bind the listener (if configured) and begin
    /// connecting to known addresses and discovery results.
    pub async fn start(&self) -> Result<(), TarnError> {
        self.group.start().await?;
        Ok(())
    }

    /// Wait until at least `n` peers are ready, or fail with a timeout at
    /// (never before) the deadline.
    pub async fn wait_for_peers(&self, n: usize, deadline: Duration) -> Result<(), TarnError> {
        self.group.wait_for_peers(n, deadline).await?;
        Ok(())
    }

    /// Drive synchronization until the chain reaches the best known peer
    /// height.
    pub async fn sync(&self) -> Result<(), TarnError> {
        self.group.sync().await?;
        Ok(())
    }

    /// Stop networking. Outstanding requests resolve with a cancellation
    /// failure; the chain and store stay usable.
    pub fn stop(&self) {
        self.group.stop();
    }

    // ------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------

    /// Ready peers in connection order.
    pub fn connected_peers(&self) -> Vec<Arc<Peer>> {
        self.group.connected_peers()
    }

    /// Number of ready peers.
    pub fn peer_count(&self) -> usize {
        self.group.ready_count()
    }

    /// Add one candidate peer address at runtime.
    pub fn add_peer_address(&self, addr: SocketAddr) {
        self.group.add_address(addr);
    }

    /// The bound listen address, once started with a listener.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.group.listen_addr()
    }

    // ------------------------------------------------------------------
    // Chain access
    // ------------------------------------------------------------------

    /// Feed a locally obtained block into the chain (file replay, miner,
    /// test harness). Remote blocks arrive through the peer group instead.
    pub fn add(&self, block: Block) -> Result<Accepted, TarnError> {
        let result = self.chain.lock().accept_block(block);
        if let Err(ChainError::Store(StoreError::Corruption(msg))) = &result {
            error!(%msg, "store durability violation; chain state is unreliable");
        }
        Ok(result?)
    }

    /// Subscribe to chain events (tip changes, connects/disconnects,
    /// confidence changes), delivered in commit order.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.bus.subscribe()
    }

    /// Install the wallet layer's watched-script set for confidence
    /// tracking in lightweight mode.
    pub fn watch_scripts(&self, scripts: HashSet<Hash256>) {
        self.chain.lock().watch_scripts(scripts);
    }

    /// The current best entry.
    pub fn tip(&self) -> Result<StoredHeader, TarnError> {
        Ok(self.chain.lock().tip()?)
    }

    /// The current best height.
    pub fn height(&self) -> Result<u64, TarnError> {
        Ok(self.chain.lock().height()?)
    }

    /// Look up a stored header entry.
    pub fn get_header(&self, hash: &Hash256) -> Result<Option<StoredHeader>, TarnError> {
        Ok(self.chain.lock().get(hash)?)
    }

    /// Look up a full block body (errors with a pruned notice when only
    /// the header is retained).
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, TarnError> {
        Ok(self.chain.lock().get_block(hash)?)
    }

    /// Hash of the best-chain entry at a height.
    pub fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, TarnError> {
        Ok(self.chain.lock().hash_at_height(height)?)
    }

    // ------------------------------------------------------------------
    // Remote fetch
    // ------------------------------------------------------------------

    /// Fetch a block by hash from the peer pool, requeueing across peers
    /// on failure.
    pub async fn fetch_block(&self, hash: Hash256) -> Result<Block, TarnError> {
        Ok(self.group.fetch_block(hash).await?)
    }

    /// Fetch a mempool/chain transaction by id from the peer pool.
    pub async fn fetch_transaction(&self, txid: Hash256) -> Result<Transaction, TarnError> {
        Ok(self.group.fetch_transaction(txid).await?)
    }

    /// Resolve a transaction's input dependency closure from peers.
    pub async fn download_dependencies(
        &self,
        tx: &Transaction,
        max_depth: usize,
    ) -> Result<Vec<Transaction>, TarnError> {
        Ok(self.group.download_dependencies(tx, max_depth).await?)
    }

    /// Announce a block to all ready peers.
    pub fn announce_block(&self, hash: Hash256) {
        self.group.broadcast_inv(vec![InvItem::block(hash)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_core::params::NetworkKind;
    use tarn_core::types::{BlockHeader, OutPoint, Transaction, TxInput, TxOutput};

    fn test_config(dir: &tempfile::TempDir, backend: StoreBackend) -> NodeConfig {
        NodeConfig {
            network: NetworkKind::Regtest,
            backend,
            data_dir: dir.path().to_path_buf(),
            use_dns_seeds: false,
            ..NodeConfig::default()
        }
    }

    fn coinbase(tag: u64, key: Hash256) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                witness: tag.to_le_bytes().to_vec(),
            }],
            outputs: vec![TxOutput { value: 50, script_key: key }],
            lock_time: 0,
        }
    }

    fn next_block(parent: &StoredHeader, tag: u64, key: Hash256) -> Block {
        let txs = vec![coinbase(tag, key)];
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

    #[tokio::test]
    async fn node_starts_at_genesis_on_every_backend() {
        for backend in [
            StoreBackend::Memory,
            StoreBackend::Ring { capacity: 64 },
            StoreBackend::Full { path: Default::default() },
        ] {
            let dir = tempfile::tempdir().unwrap();
            let node = Node::new(test_config(&dir, backend.clone())).unwrap();
            let tip = node.tip().unwrap();
            assert_eq!(tip.height, 0, "backend {backend:?}");
            assert_eq!(tip.hash(), node.params().genesis_hash());
        }
    }

    #[tokio::test]
    async fn invalid_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Node::new(test_config(&dir, StoreBackend::Ring { capacity: 0 })).unwrap_err();
        assert!(matches!(err, TarnError::Config(_)));
    }

    #[tokio::test]
    async fn add_extends_and_emits_events() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(test_config(&dir, StoreBackend::Memory)).unwrap();
        let mut events = node.subscribe();

        let genesis = node.tip().unwrap();
        let block = next_block(&genesis, 1, Hash256([0xAA; 32]));
        let hash = block.hash();

        assert!(matches!(node.add(block.clone()).unwrap(), Accepted::Extended));
        assert_eq!(node.height().unwrap(), 1);
        assert_eq!(node.get_block_hash(1).unwrap(), Some(hash));
        assert_eq!(node.get_block(&hash).unwrap(), Some(block.clone()));

        assert!(matches!(
            events.try_recv().unwrap(),
            ChainEvent::BlockConnected { .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            ChainEvent::TipChanged { .. }
        ));

        // Re-delivery is a no-op.
        assert!(matches!(node.add(block).unwrap(), Accepted::Duplicate));
    }

    #[tokio::test]
    async fn ring_backend_takes_headers_via_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(test_config(&dir, StoreBackend::Ring { capacity: 32 })).unwrap();

        let mut parent = node.tip().unwrap();
        for i in 1..=5 {
            let block = next_block(&parent, i, Hash256([0xAA; 32]));
            node.add(block).unwrap();
            parent = node.tip().unwrap();
        }
        assert_eq!(node.height().unwrap(), 5);

        // SPV mode: the header is retained, the body is not.
        let tip_hash = parent.hash();
        assert!(node.get_header(&tip_hash).unwrap().is_some());
        assert!(node.get_block(&tip_hash).is_err());
    }

    #[tokio::test]
    async fn watched_scripts_emit_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(test_config(&dir, StoreBackend::Memory)).unwrap();
        let watched = Hash256([0x5A; 32]);
        node.watch_scripts([watched].into_iter().collect());
        let mut events = node.subscribe();

        let genesis = node.tip().unwrap();
        let block = next_block(&genesis, 1, watched);
        let txid = block.transactions[0].txid().unwrap();
        node.add(block).unwrap();

        let mut saw_confidence = false;
        while let Ok(event) = events.try_recv() {
            if let ChainEvent::ConfidenceChanged { txid: id, .. } = event {
                assert_eq!(id, txid);
                saw_confidence = true;
            }
        }
        assert!(saw_confidence);
    }

    #[tokio::test]
    async fn full_backend_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let tip_hash = {
            let node = Node::new(test_config(&dir, StoreBackend::Full { path: Default::default() }))
                .unwrap();
            let genesis = node.tip().unwrap();
            node.add(next_block(&genesis, 1, Hash256([0xAA; 32]))).unwrap();
            node.tip().unwrap().hash()
        };

        let node = Node::new(test_config(&dir, StoreBackend::Full { path: Default::default() }))
            .unwrap();
        assert_eq!(node.height().unwrap(), 1);
        assert_eq!(node.tip().unwrap().hash(), tip_hash);
    }
}
