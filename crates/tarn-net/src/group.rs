//! The peer group: connection management and download orchestration.
//!
//! A [`PeerGroup`] owns a pool of [`Peer`] connections, feeds candidate
//! addresses from discovery sources into opportunistic connection attempts
//! up to a target count, serves chain queries to remote peers, and drives
//! the [`DownloadState`] machine against the chain.
//!
//! The chain instance is the single serialization point for mutation: the
//! group only touches it under its mutex, and never across an await point.
//! Lock order is chain before sync state, everywhere.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use tarn_chain::Chain;
use tarn_core::error::NetError;
use tarn_core::params::{NetworkParams, PROTOCOL_VERSION};
use tarn_core::types::{Block, Hash256, Transaction};

use crate::config::PeerGroupConfig;
use crate::discovery::DiscoverySource;
use crate::message::{Codec, InvItem, InvKind, Message};
use crate::peer::{Handshake, Peer, PeerEvent};
use crate::sync::{DownloadState, PeerId, SyncAction};

/// Pace of the sync driver loop when there is nothing to send.
const SYNC_TICK: Duration = Duration::from_millis(50);

/// Pause between connector passes when the pool is satisfied or starved.
const CONNECT_RETRY: Duration = Duration::from_secs(1);

/// Hard cap on transactions pulled by dependency resolution.
const MAX_DEPENDENCY_TXS: usize = 256;

/// Manages discovery, connections, serving, and chain synchronization for
/// one chain instance.
pub struct PeerGroup {
    params: NetworkParams,
    config: PeerGroupConfig,
    codec: Codec,
    chain: Arc<Mutex<Chain>>,
    /// Our handshake nonce, for self-connection detection.
    nonce: u64,
    discovery: Mutex<Vec<Box<dyn DiscoverySource>>>,
    /// Every address ever admitted, for deduplication by endpoint.
    known: Mutex<HashSet<SocketAddr>>,
    /// Addresses waiting for a connection attempt.
    pending_addrs: Mutex<std::collections::VecDeque<SocketAddr>>,
    peers: Mutex<Vec<Arc<Peer>>>,
    ready_tx: watch::Sender<usize>,
    next_peer_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    sync_state: Mutex<DownloadState>,
    /// Bound listen address once the listener is up.
    listen_addr: Mutex<Option<SocketAddr>>,
    started: AtomicBool,
}

impl PeerGroup {
    /// Create a group for the given chain. Call [`start`](Self::start) to
    /// begin connecting.
    pub fn new(
        params: NetworkParams,
        config: PeerGroupConfig,
        chain: Arc<Mutex<Chain>>,
    ) -> Arc<Self> {
        let codec = Codec::new(params.magic);
        let want_bodies = chain.lock().is_full_validation();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, _) = watch::channel(0);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            params,
            codec,
            chain,
            nonce: rand::random(),
            discovery: Mutex::new(Vec::new()),
            known: Mutex::new(HashSet::new()),
            pending_addrs: Mutex::new(std::collections::VecDeque::new()),
            peers: Mutex::new(Vec::new()),
            ready_tx,
            next_peer_id: AtomicU64::new(1),
            shutdown_tx,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            sync_state: Mutex::new(DownloadState::new(want_bodies, config.request_timeout)),
            listen_addr: Mutex::new(None),
            started: AtomicBool::new(false),
            config,
        })
    }

    /// Register a discovery source. Sources are polled while the pool is
    /// below its target.
    pub fn add_discovery_source(&self, source: Box<dyn DiscoverySource>) {
        self.discovery.lock().push(source);
    }

    /// Add one candidate peer address. Duplicates by endpoint are ignored.
    pub fn add_address(&self, addr: SocketAddr) {
        if self.known.lock().insert(addr) {
            self.pending_addrs.lock().push_back(addr);
        }
    }

    /// Start the group: bind the listener (if configured) and spawn the
    /// connector and event tasks.
    pub async fn start(self: &Arc<Self>) -> Result<(), NetError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(addr) = self.config.listen_addr {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| NetError::Io(e.to_string()))?;
            let local = listener
                .local_addr()
                .map_err(|e| NetError::Io(e.to_string()))?;
            *self.listen_addr.lock() = Some(local);
            info!(%local, "listening for inbound peers");
            let group = Arc::clone(self);
            tokio::spawn(group.run_listener(listener));
        }

        let rx = self
            .events_rx
            .lock()
            .take()
            .ok_or_else(|| NetError::Io("peer group already consumed".into()))?;
        tokio::spawn(Arc::clone(self).run_events(rx));
        tokio::spawn(Arc::clone(self).run_connector());
        Ok(())
    }

    /// The bound listen address, once [`start`](Self::start) bound one.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.lock()
    }

    /// Wait until at least `n` peers are ready.
    ///
    /// # Errors
    ///
    /// [`NetError::Timeout`] once `deadline` elapses, at or after it and
    /// never before.
    pub async fn wait_for_peers(&self, n: usize, deadline: Duration) -> Result<(), NetError> {
        let mut rx = self.ready_tx.subscribe();
        let reached = async move {
            loop {
                if *rx.borrow_and_update() >= n {
                    return;
                }
                if rx.changed().await.is_err() {
                    // The group went away; let the deadline fire.
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::time::timeout(deadline, reached)
            .await
            .map_err(|_| NetError::Timeout)
    }

    /// Ready peers in connection order.
    pub fn connected_peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .lock()
            .iter()
            .filter(|p| p.is_ready())
            .cloned()
            .collect()
    }

    /// Number of ready peers.
    pub fn ready_count(&self) -> usize {
        *self.ready_tx.borrow()
    }

    /// Stop the group: cancel outstanding requests and close every
    /// connection. Pending fetch handles resolve with
    /// [`NetError::Cancelled`].
    pub fn stop(&self) {
        info!("stopping peer group");
        let _ = self.shutdown_tx.send(true);
        let peers: Vec<Arc<Peer>> = self.peers.lock().clone();
        for peer in peers {
            peer.disconnect(NetError::Cancelled);
        }
        let _ = self.ready_tx.send(0);
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    // ------------------------------------------------------------------
    // Object fetch with requeue
    // ------------------------------------------------------------------

    /// Fetch a block by hash from any ready peer.
    ///
    /// On peer disconnect, timeout, or not-found the request is requeued to
    /// the next ready peer; it fails only when no untried peer remains.
    pub async fn fetch_block(&self, hash: Hash256) -> Result<Block, NetError> {
        let mut tried: HashSet<PeerId> = HashSet::new();
        let mut last_err = NetError::NoPeers;
        loop {
            if self.is_stopped() {
                return Err(NetError::Cancelled);
            }
            let next = self
                .connected_peers()
                .into_iter()
                .find(|p| !tried.contains(&p.id()));
            let Some(peer) = next else { return Err(last_err) };
            tried.insert(peer.id());

            match peer.fetch_block(hash, self.config.request_timeout).await {
                Ok(block) => return Ok(block),
                Err(NetError::Cancelled) => return Err(NetError::Cancelled),
                Err(e @ (NetError::Timeout | NetError::PeerDisconnected(_) | NetError::NotFound(_))) => {
                    debug!(peer = peer.id(), error = %e, %hash, "block fetch moved to next peer");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch a transaction by id from any ready peer, with the same
    /// requeue behavior as [`fetch_block`](Self::fetch_block).
    pub async fn fetch_transaction(&self, txid: Hash256) -> Result<Transaction, NetError> {
        let mut tried: HashSet<PeerId> = HashSet::new();
        let mut last_err = NetError::NoPeers;
        loop {
            if self.is_stopped() {
                return Err(NetError::Cancelled);
            }
            let next = self
                .connected_peers()
                .into_iter()
                .find(|p| !tried.contains(&p.id()));
            let Some(peer) = next else { return Err(last_err) };
            tried.insert(peer.id());

            match peer.fetch_transaction(txid, self.config.request_timeout).await {
                Ok(tx) => return Ok(tx),
                Err(NetError::Cancelled) => return Err(NetError::Cancelled),
                Err(e @ (NetError::Timeout | NetError::PeerDisconnected(_) | NetError::NotFound(_))) => {
                    debug!(peer = peer.id(), error = %e, %txid, "tx fetch moved to next peer");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve a transaction's input dependency closure, breadth-first,
    /// bounded by `max_depth` levels and [`MAX_DEPENDENCY_TXS`] total.
    ///
    /// Unresolvable inputs (spent long ago, unknown to peers) are skipped;
    /// cycles cannot occur because a transaction only depends on
    /// transactions that precede it.
    pub async fn download_dependencies(
        &self,
        tx: &Transaction,
        max_depth: usize,
    ) -> Result<Vec<Transaction>, NetError> {
        let mut resolved = Vec::new();
        let mut seen: HashSet<Hash256> = HashSet::new();
        let mut frontier: Vec<Hash256> = tx
            .inputs
            .iter()
            .filter(|i| !i.previous_output.is_null())
            .map(|i| i.previous_output.txid)
            .collect();

        for _ in 0..max_depth {
            if frontier.is_empty() || resolved.len() >= MAX_DEPENDENCY_TXS {
                break;
            }
            let mut next = Vec::new();
            for txid in frontier.drain(..) {
                if !seen.insert(txid) || resolved.len() >= MAX_DEPENDENCY_TXS {
                    continue;
                }
                match self.fetch_transaction(txid).await {
                    Ok(dep) => {
                        next.extend(
                            dep.inputs
                                .iter()
                                .filter(|i| !i.previous_output.is_null())
                                .map(|i| i.previous_output.txid),
                        );
                        resolved.push(dep);
                    }
                    Err(NetError::NotFound(_)) | Err(NetError::Timeout) | Err(NetError::NoPeers) => {
                        debug!(%txid, "dependency unresolved, skipping");
                    }
                    Err(e) => return Err(e),
                }
            }
            frontier = next;
        }
        Ok(resolved)
    }

    /// Announce an object to every ready peer.
    pub fn broadcast_inv(&self, items: Vec<InvItem>) {
        for peer in self.connected_peers() {
            let _ = peer.send(Message::Inv(items.clone()));
        }
    }

    // ------------------------------------------------------------------
    // Synchronization driver
    // ------------------------------------------------------------------

    /// Drive the download state machine until the chain reaches the best
    /// known peer height (or there is nothing to sync from).
    ///
    /// # Errors
    ///
    /// [`NetError::Cancelled`] if the group is stopped while syncing.
    pub async fn sync(&self) -> Result<(), NetError> {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            if self.is_stopped() {
                return Err(NetError::Cancelled);
            }

            let overdue = self.sync_state.lock().check_timeouts(Instant::now());
            for id in overdue {
                if let Some(peer) = self.peer_by_id(id) {
                    peer.disconnect(NetError::Timeout);
                }
            }

            let actions = {
                let chain = self.chain.lock();
                let height = chain.height().unwrap_or(0);
                let mut state = self.sync_state.lock();
                state.next_actions(height, || chain.block_locator().unwrap_or_default())
            };

            for action in actions {
                match action {
                    SyncAction::RequestHeaders { peer, locator } => {
                        self.send_or_drop(peer, Message::GetHeaders { locator });
                    }
                    SyncAction::RequestBody { peer, hash } => {
                        self.send_or_drop(peer, Message::GetData(vec![InvItem::block(hash)]));
                    }
                    SyncAction::Wait => {}
                    SyncAction::Finished => return Ok(()),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(SYNC_TICK) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    fn send_or_drop(&self, peer: PeerId, msg: Message) {
        match self.peer_by_id(peer) {
            Some(p) if p.is_ready() => {
                if p.send(msg).is_err() {
                    self.sync_state.lock().on_peer_gone(peer);
                }
            }
            _ => self.sync_state.lock().on_peer_gone(peer),
        }
    }

    fn peer_by_id(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers.lock().iter().find(|p| p.id() == id).cloned()
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    fn handshake(&self) -> Handshake {
        Handshake {
            protocol_version: PROTOCOL_VERSION,
            best_height: self.chain.lock().height().unwrap_or(0),
            nonce: self.nonce,
            user_agent: self.config.user_agent.clone(),
        }
    }

    fn spawn_peer(&self, addr: SocketAddr) {
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        debug!(peer = id, %addr, "connecting");
        let peer = Peer::connect(
            id,
            addr,
            self.codec.clone(),
            self.handshake(),
            self.events_tx.clone(),
            &self.config,
        );
        self.peers.lock().push(peer);
    }

    fn adopt_inbound(&self, stream: TcpStream) {
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let peer = Peer::accept(
            id,
            stream,
            self.codec.clone(),
            self.handshake(),
            self.events_tx.clone(),
            &self.config,
        );
        debug!(peer = id, addr = %peer.addr(), "accepted inbound connection");
        self.peers.lock().push(peer);
    }

    /// Peers still connecting, handshaking, or ready.
    fn live_count(&self) -> usize {
        use crate::peer::PeerState;
        self.peers
            .lock()
            .iter()
            .filter(|p| {
                matches!(
                    p.state(),
                    PeerState::Connecting | PeerState::Handshaking | PeerState::Ready
                )
            })
            .count()
    }

    /// Drop finished connections from the pool.
    fn prune_peers(&self) {
        use crate::peer::PeerState;
        self.peers.lock().retain(|p| {
            !matches!(p.state(), PeerState::Disconnected | PeerState::Errored)
        });
    }

    fn refresh_ready_count(&self) {
        let count = self.peers.lock().iter().filter(|p| p.is_ready()).count();
        let _ = self.ready_tx.send(count);
    }

    async fn run_connector(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            if self.is_stopped() {
                break;
            }
            self.prune_peers();

            if self.live_count() < self.config.target_peers {
                let next = self.pending_addrs.lock().pop_front();
                match next {
                    Some(addr) => {
                        self.spawn_peer(addr);
                        continue;
                    }
                    None => self.poll_discovery().await,
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(CONNECT_RETRY) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Poll every discovery source once and admit new addresses.
    async fn poll_discovery(&self) {
        let sources = std::mem::take(&mut *self.discovery.lock());
        if sources.is_empty() {
            return;
        }
        let mut found = 0usize;
        for source in &sources {
            for addr in source.addresses().await {
                if self.known.lock().insert(addr) {
                    self.pending_addrs.lock().push_back(addr);
                    found += 1;
                }
            }
        }
        // Preserve sources registered while we were polling.
        self.discovery.lock().extend(sources);
        if found > 0 {
            debug!(found, "discovery produced new addresses");
        }
    }

    async fn run_listener(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _remote)) => self.adopt_inbound(stream),
                    Err(e) => {
                        warn!(error = %e, "inbound accept failed");
                    }
                }
            }
        }
    }

    async fn run_events(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<PeerEvent>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                }
            }
        }
    }

    fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::Ready(id) => {
                // Register with the sync state before the readiness watch
                // fires, so a waiter that wakes on it sees this peer.
                let height = self.peer_by_id(id).map(|p| p.best_height()).unwrap_or(0);
                self.sync_state.lock().on_peer_ready(id, height);
                self.refresh_ready_count();
            }
            PeerEvent::Disconnected(id) => {
                self.sync_state.lock().on_peer_gone(id);
                self.refresh_ready_count();
            }
            PeerEvent::Headers { peer, headers } => self.on_headers(peer, headers),
            PeerEvent::Block { peer: _, block } => self.on_block(block),
            PeerEvent::Tx { .. } => {
                // Fetch handles were resolved at the peer; unsolicited
                // transaction relay is not consumed by this core.
            }
            PeerEvent::Inv { peer, items } => self.on_inv(peer, items),
            PeerEvent::GetHeaders { peer, locator } => self.serve_headers(peer, locator),
            PeerEvent::GetData { peer, items } => self.serve_data(peer, items),
        }
    }

    /// A header batch from a peer: feed the chain (or queue bodies in
    /// full-block mode), then advance the sync state.
    fn on_headers(&self, peer: PeerId, headers: Vec<tarn_core::types::BlockHeader>) {
        let batch_len = headers.len();
        let mut accepted: Vec<Hash256> = Vec::new();

        {
            let mut chain = self.chain.lock();
            if chain.is_full_validation() {
                // Bodies carry the state; verify linkage and queue unknowns.
                for pair in headers.windows(2) {
                    if pair[1].prev_hash != pair[0].hash() {
                        warn!(peer, "discarding header batch with broken linkage");
                        return;
                    }
                }
                for header in &headers {
                    let hash = header.hash();
                    if chain.get(&hash).ok().flatten().is_none() {
                        accepted.push(hash);
                    }
                }
            } else {
                for header in headers {
                    let hash = header.hash();
                    match chain.accept_header(header) {
                        Ok(_) => accepted.push(hash),
                        Err(e) => {
                            debug!(peer, %hash, error = %e, "header rejected");
                        }
                    }
                }
            }
        }

        self.sync_state.lock().on_headers(peer, accepted, batch_len);
    }

    /// A block body from a peer: apply to the chain and mark the download.
    fn on_block(&self, block: Block) {
        let hash = block.hash();
        {
            let mut chain = self.chain.lock();
            match chain.accept_block(block) {
                Ok(result) => debug!(%hash, ?result, "block applied"),
                Err(e) => debug!(%hash, error = %e, "block rejected"),
            }
        }
        self.sync_state.lock().on_body(&hash);
    }

    /// Follow up an inventory announcement with a data request for
    /// anything we do not have yet.
    fn on_inv(&self, peer: PeerId, items: Vec<InvItem>) {
        let wanted: Vec<InvItem> = {
            let chain = self.chain.lock();
            items
                .into_iter()
                .filter(|item| {
                    item.kind == InvKind::Block
                        && chain.get(&item.hash).ok().flatten().is_none()
                })
                .collect()
        };
        if wanted.is_empty() {
            return;
        }
        if let Some(p) = self.peer_by_id(peer) {
            let _ = p.send(Message::GetData(wanted));
        }
    }

    /// Serve a remote `GetHeaders`: anchor on the locator (or genesis) and
    /// reply with up to one batch of best-chain headers.
    fn serve_headers(&self, peer: PeerId, locator: Vec<Hash256>) {
        let headers = {
            let chain = self.chain.lock();
            let anchor = chain
                .find_common_ancestor(&locator)
                .ok()
                .flatten()
                .map(|e| e.hash())
                .unwrap_or_else(|| self.params.genesis_hash());
            chain
                .headers_after(&anchor, crate::message::MAX_HEADERS_PER_MESSAGE)
                .unwrap_or_default()
        };
        if let Some(p) = self.peer_by_id(peer) {
            debug!(peer, count = headers.len(), "serving headers");
            let _ = p.send(Message::Headers(headers));
        }
    }

    /// Serve a remote `GetData`: known blocks are sent, everything else is
    /// answered with `NotFound`.
    fn serve_data(&self, peer: PeerId, items: Vec<InvItem>) {
        let Some(p) = self.peer_by_id(peer) else { return };
        let mut missing = Vec::new();
        for item in items {
            match item.kind {
                InvKind::Block => {
                    let block = {
                        let chain = self.chain.lock();
                        chain.get_block(&item.hash).ok().flatten()
                    };
                    match block {
                        Some(block) => {
                            let _ = p.send(Message::Block(block));
                        }
                        None => missing.push(item),
                    }
                }
                // This core keeps no mempool to serve from.
                InvKind::Tx => missing.push(item),
            }
        }
        if !missing.is_empty() {
            let _ = p.send(Message::NotFound(missing));
        }
    }
}
