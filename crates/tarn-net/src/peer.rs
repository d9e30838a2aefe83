//! One peer connection.
//!
//! A [`Peer`] walks `Connecting → Handshaking → Ready` and ends in
//! `Disconnected` or `Errored`. After the version/verack exchange the
//! connection runs a read loop plus a writer task; incoming responses
//! complete pending fetch handles, everything else is forwarded to the
//! group as [`PeerEvent`]s.
//!
//! Requests are keyed by `(kind, hash)` and idempotent: concurrent fetches
//! of the same object share one wire request's answer, and each waiter is
//! completed exactly once. A timed-out request fails alone; crossing the
//! consecutive-timeout threshold disconnects the whole peer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use tarn_core::error::NetError;
use tarn_core::types::{Block, BlockHeader, Hash256, Transaction};

use crate::config::PeerGroupConfig;
use crate::message::{Codec, InvItem, InvKind, Message};
use crate::sync::PeerId;

/// Interval between keepalive pings on an idle connection.
const PING_INTERVAL: Duration = Duration::from_secs(60);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Dialing the remote endpoint.
    Connecting,
    /// Exchanging version/verack.
    Handshaking,
    /// Handshake complete; requests may be issued.
    Ready,
    /// Cleanly closed (remote hangup, local disconnect, or group stop).
    Disconnected,
    /// Failed before or during the handshake.
    Errored,
}

/// What the remote side advertised in its version message.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Remote protocol version.
    pub protocol_version: u64,
    /// Remote best chain height at handshake time.
    pub best_height: u64,
    /// Remote user agent string.
    pub user_agent: String,
}

/// Our side of the version exchange.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Protocol version to advertise.
    pub protocol_version: u64,
    /// Our best chain height.
    pub best_height: u64,
    /// Connection nonce for self-connection detection.
    pub nonce: u64,
    /// User agent to advertise.
    pub user_agent: String,
}

/// Events a peer forwards to the group.
#[derive(Debug)]
pub enum PeerEvent {
    /// The peer finished its handshake.
    Ready(PeerId),
    /// The peer left the ready state.
    Disconnected(PeerId),
    /// A header batch arrived.
    Headers { peer: PeerId, headers: Vec<BlockHeader> },
    /// A block arrived (response or unsolicited relay).
    Block { peer: PeerId, block: Block },
    /// A transaction arrived.
    Tx { peer: PeerId, tx: Transaction },
    /// The peer announced objects it has.
    Inv { peer: PeerId, items: Vec<InvItem> },
    /// The peer asked for headers after its locator.
    GetHeaders { peer: PeerId, locator: Vec<Hash256> },
    /// The peer asked for full objects.
    GetData { peer: PeerId, items: Vec<InvItem> },
}

/// A completed fetch payload.
enum FetchPayload {
    Block(Block),
    Tx(Transaction),
}

type Waiter = (u64, oneshot::Sender<Result<FetchPayload, NetError>>);

/// One peer connection handle. Cheap to share; the connection itself runs
/// on background tasks.
pub struct Peer {
    id: PeerId,
    addr: SocketAddr,
    outbound: bool,
    state: RwLock<PeerState>,
    info: RwLock<Option<VersionInfo>>,
    writer_tx: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<(InvKind, Hash256), Vec<Waiter>>>,
    next_waiter: AtomicU64,
    consecutive_timeouts: AtomicU32,
    max_consecutive_timeouts: u32,
    ready_seen: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl Peer {
    /// Dial an outbound connection and run it in the background.
    pub fn connect(
        id: PeerId,
        addr: SocketAddr,
        codec: Codec,
        handshake: Handshake,
        events: mpsc::UnboundedSender<PeerEvent>,
        config: &PeerGroupConfig,
    ) -> Arc<Self> {
        let (peer, writer_rx, close_rx) = Self::new(id, addr, true, config);
        let connect_timeout = config.connect_timeout;
        let handshake_timeout = config.handshake_timeout;
        let task_peer = Arc::clone(&peer);
        tokio::spawn(async move {
            let result = async {
                let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
                    .await
                    .map_err(|_| NetError::Timeout)?
                    .map_err(|e| NetError::Io(e.to_string()))?;
                Self::serve(
                    &task_peer,
                    stream,
                    codec,
                    handshake,
                    handshake_timeout,
                    &events,
                    writer_rx,
                    close_rx,
                )
                .await
            }
            .await;
            Self::finish(&task_peer, &events, result);
        });
        peer
    }

    /// Adopt an inbound connection and run it in the background.
    pub fn accept(
        id: PeerId,
        stream: TcpStream,
        codec: Codec,
        handshake: Handshake,
        events: mpsc::UnboundedSender<PeerEvent>,
        config: &PeerGroupConfig,
    ) -> Arc<Self> {
        let addr = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let (peer, writer_rx, close_rx) = Self::new(id, addr, false, config);
        let handshake_timeout = config.handshake_timeout;
        let task_peer = Arc::clone(&peer);
        tokio::spawn(async move {
            let result = Self::serve(
                &task_peer,
                stream,
                codec,
                handshake,
                handshake_timeout,
                &events,
                writer_rx,
                close_rx,
            )
            .await;
            Self::finish(&task_peer, &events, result);
        });
        peer
    }

    fn new(
        id: PeerId,
        addr: SocketAddr,
        outbound: bool,
        config: &PeerGroupConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Message>, watch::Receiver<bool>) {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let peer = Arc::new(Self {
            id,
            addr,
            outbound,
            state: RwLock::new(PeerState::Connecting),
            info: RwLock::new(None),
            writer_tx,
            pending: Mutex::new(HashMap::new()),
            next_waiter: AtomicU64::new(0),
            consecutive_timeouts: AtomicU32::new(0),
            max_consecutive_timeouts: config.max_consecutive_timeouts,
            ready_seen: AtomicBool::new(false),
            close_tx,
        });
        (peer, writer_rx, close_rx)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Group-assigned identifier.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Remote endpoint.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether we dialed this peer (vs. accepted it).
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    /// Whether the handshake completed and the connection is live.
    pub fn is_ready(&self) -> bool {
        self.state() == PeerState::Ready
    }

    /// Height the remote advertised during the handshake, 0 before it.
    pub fn best_height(&self) -> u64 {
        self.info.read().as_ref().map(|i| i.best_height).unwrap_or(0)
    }

    /// Remote version info, once the handshake completed.
    pub fn version_info(&self) -> Option<VersionInfo> {
        self.info.read().clone()
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Queue a message for the writer task.
    pub fn send(&self, msg: Message) -> Result<(), NetError> {
        self.writer_tx
            .send(msg)
            .map_err(|_| NetError::PeerDisconnected(self.addr.to_string()))
    }

    /// Fetch a block by hash from this peer.
    ///
    /// # Errors
    ///
    /// [`NetError::Timeout`] after `timeout`; [`NetError::NotFound`] when the
    /// peer answers that it lacks the block; [`NetError::PeerDisconnected`]
    /// if the connection goes away first.
    pub async fn fetch_block(&self, hash: Hash256, timeout: Duration) -> Result<Block, NetError> {
        match self.fetch(InvKind::Block, hash, timeout).await? {
            FetchPayload::Block(block) => Ok(block),
            FetchPayload::Tx(_) => Err(NetError::BadMessage("expected a block".into())),
        }
    }

    /// Fetch a transaction by id from this peer (its mempool or chain).
    pub async fn fetch_transaction(
        &self,
        txid: Hash256,
        timeout: Duration,
    ) -> Result<Transaction, NetError> {
        match self.fetch(InvKind::Tx, txid, timeout).await? {
            FetchPayload::Tx(tx) => Ok(tx),
            FetchPayload::Block(_) => Err(NetError::BadMessage("expected a transaction".into())),
        }
    }

    async fn fetch(
        &self,
        kind: InvKind,
        hash: Hash256,
        timeout: Duration,
    ) -> Result<FetchPayload, NetError> {
        if !self.is_ready() {
            return Err(NetError::PeerDisconnected(self.addr.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let waiter_id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let fresh_request = {
            let mut pending = self.pending.lock();
            let waiters = pending.entry((kind, hash)).or_default();
            waiters.push((waiter_id, tx));
            waiters.len() == 1
        };
        // Idempotent by hash: only the first waiter puts a request on the wire.
        if fresh_request {
            self.send(Message::GetData(vec![InvItem { kind, hash }]))?;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => {
                self.consecutive_timeouts.store(0, Ordering::Relaxed);
                result
            }
            Ok(Err(_)) => Err(NetError::PeerDisconnected(self.addr.to_string())),
            Err(_) => {
                self.remove_waiter(kind, hash, waiter_id);
                let timeouts = self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1;
                if timeouts >= self.max_consecutive_timeouts {
                    warn!(
                        peer = self.id,
                        addr = %self.addr,
                        timeouts,
                        "disconnecting peer after consecutive timeouts"
                    );
                    self.disconnect(NetError::Timeout);
                }
                Err(NetError::Timeout)
            }
        }
    }

    fn remove_waiter(&self, kind: InvKind, hash: Hash256, waiter_id: u64) {
        let mut pending = self.pending.lock();
        if let Some(waiters) = pending.get_mut(&(kind, hash)) {
            waiters.retain(|(id, _)| *id != waiter_id);
            if waiters.is_empty() {
                pending.remove(&(kind, hash));
            }
        }
    }

    /// Tear the connection down and fail every outstanding request with
    /// the given reason.
    pub fn disconnect(&self, reason: NetError) {
        {
            let mut state = self.state.write();
            if matches!(*state, PeerState::Disconnected | PeerState::Errored) {
                return;
            }
            *state = PeerState::Disconnected;
        }
        debug!(peer = self.id, addr = %self.addr, reason = %reason, "disconnecting peer");
        let _ = self.close_tx.send(true);
        self.fail_all(reason);
    }

    fn fail_all(&self, reason: NetError) {
        let drained: Vec<Waiter> = {
            let mut pending = self.pending.lock();
            pending.drain().flat_map(|(_, waiters)| waiters).collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(reason.clone()));
        }
    }

    fn complete(&self, kind: InvKind, hash: Hash256, payload: FetchPayload) {
        let waiters = {
            let mut pending = self.pending.lock();
            pending.remove(&(kind, hash))
        };
        let Some(waiters) = waiters else { return };
        let mut payloads = Vec::new();
        for _ in 0..waiters.len() {
            payloads.push(match &payload {
                FetchPayload::Block(b) => FetchPayload::Block(b.clone()),
                FetchPayload::Tx(t) => FetchPayload::Tx(t.clone()),
            });
        }
        for ((_, tx), payload) in waiters.into_iter().zip(payloads) {
            let _ = tx.send(Ok(payload));
        }
    }

    fn fail_one(&self, kind: InvKind, hash: Hash256, reason: NetError) {
        let waiters = {
            let mut pending = self.pending.lock();
            pending.remove(&(kind, hash))
        };
        let Some(waiters) = waiters else { return };
        for (_, tx) in waiters {
            let _ = tx.send(Err(reason.clone()));
        }
    }

    // ------------------------------------------------------------------
    // Connection driving
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn serve(
        peer: &Arc<Peer>,
        stream: TcpStream,
        codec: Codec,
        handshake: Handshake,
        handshake_timeout: Duration,
        events: &mpsc::UnboundedSender<PeerEvent>,
        writer_rx: mpsc::UnboundedReceiver<Message>,
        mut close_rx: watch::Receiver<bool>,
    ) -> Result<(), NetError> {
        let (mut rh, mut wh) = stream.into_split();
        *peer.state.write() = PeerState::Handshaking;

        codec
            .write_message(
                &mut wh,
                &Message::Version {
                    protocol_version: handshake.protocol_version,
                    best_height: handshake.best_height,
                    nonce: handshake.nonce,
                    user_agent: handshake.user_agent.clone(),
                },
            )
            .await?;

        let info = tokio::time::timeout(
            handshake_timeout,
            Self::handshake_exchange(&codec, &mut rh, &mut wh, &handshake),
        )
        .await
        .map_err(|_| NetError::HandshakeFailed("timed out".into()))??;

        info!(
            peer = peer.id,
            addr = %peer.addr,
            height = info.best_height,
            agent = %info.user_agent,
            "peer ready"
        );
        *peer.info.write() = Some(info);
        *peer.state.write() = PeerState::Ready;
        peer.ready_seen.store(true, Ordering::Relaxed);
        let _ = events.send(PeerEvent::Ready(peer.id));

        let writer = Self::spawn_writer(codec.clone(), wh, writer_rx);

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await; // the first tick fires immediately

        let result = loop {
            tokio::select! {
                _ = close_rx.changed() => break Ok(()),
                _ = ping.tick() => {
                    let _ = peer.send(Message::Ping(rand::random()));
                }
                read = codec.read_message(&mut rh) => match read {
                    Ok(msg) => peer.dispatch(msg, events),
                    Err(e) => break Err(e),
                },
            }
        };

        writer.abort();
        result
    }

    async fn handshake_exchange(
        codec: &Codec,
        rh: &mut OwnedReadHalf,
        wh: &mut OwnedWriteHalf,
        ours: &Handshake,
    ) -> Result<VersionInfo, NetError> {
        let mut info: Option<VersionInfo> = None;
        let mut acked = false;

        while info.is_none() || !acked {
            match codec.read_message(rh).await? {
                Message::Version {
                    protocol_version,
                    best_height,
                    nonce,
                    user_agent,
                } => {
                    if nonce == ours.nonce {
                        return Err(NetError::HandshakeFailed("connected to self".into()));
                    }
                    if protocol_version == 0 {
                        return Err(NetError::HandshakeFailed(
                            "unsupported protocol version 0".into(),
                        ));
                    }
                    codec.write_message(wh, &Message::Verack).await?;
                    info = Some(VersionInfo {
                        protocol_version,
                        best_height,
                        user_agent,
                    });
                }
                Message::Verack => acked = true,
                other => {
                    return Err(NetError::HandshakeFailed(format!(
                        "unexpected {} during handshake",
                        other.name()
                    )));
                }
            }
        }

        info.ok_or_else(|| NetError::HandshakeFailed("missing version".into()))
    }

    fn spawn_writer(
        codec: Codec,
        mut wh: OwnedWriteHalf,
        mut writer_rx: mpsc::UnboundedReceiver<Message>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(msg) = writer_rx.recv().await {
                if let Err(e) = codec.write_message(&mut wh, &msg).await {
                    debug!(error = %e, "peer write failed");
                    break;
                }
            }
        })
    }

    /// Route one incoming message: answer pings, complete pending fetches,
    /// forward the rest to the group.
    fn dispatch(&self, msg: Message, events: &mpsc::UnboundedSender<PeerEvent>) {
        match msg {
            Message::Ping(n) => {
                let _ = self.send(Message::Pong(n));
            }
            Message::Pong(_) => {}
            Message::Block(block) => {
                let hash = block.hash();
                self.complete(InvKind::Block, hash, FetchPayload::Block(block.clone()));
                let _ = events.send(PeerEvent::Block { peer: self.id, block });
            }
            Message::Tx(tx) => {
                if let Ok(txid) = tx.txid() {
                    self.complete(InvKind::Tx, txid, FetchPayload::Tx(tx.clone()));
                }
                let _ = events.send(PeerEvent::Tx { peer: self.id, tx });
            }
            Message::Headers(headers) => {
                let _ = events.send(PeerEvent::Headers { peer: self.id, headers });
            }
            Message::Inv(items) => {
                let _ = events.send(PeerEvent::Inv { peer: self.id, items });
            }
            Message::GetHeaders { locator } => {
                let _ = events.send(PeerEvent::GetHeaders { peer: self.id, locator });
            }
            Message::GetData(items) => {
                let _ = events.send(PeerEvent::GetData { peer: self.id, items });
            }
            Message::NotFound(items) => {
                for item in items {
                    self.fail_one(item.kind, item.hash, NetError::NotFound(item.hash.to_string()));
                }
            }
            Message::Version { .. } | Message::Verack => {
                debug!(peer = self.id, "ignoring duplicate handshake message");
            }
        }
    }

    fn finish(
        peer: &Arc<Peer>,
        events: &mpsc::UnboundedSender<PeerEvent>,
        result: Result<(), NetError>,
    ) {
        {
            let mut state = peer.state.write();
            if !matches!(*state, PeerState::Disconnected) {
                *state = if result.is_ok() || peer.ready_seen.load(Ordering::Relaxed) {
                    PeerState::Disconnected
                } else {
                    PeerState::Errored
                };
            }
        }
        peer.fail_all(NetError::PeerDisconnected(peer.addr.to_string()));
        if let Err(e) = result {
            debug!(peer = peer.id, addr = %peer.addr, error = %e, "peer connection ended");
        }
        if peer.ready_seen.load(Ordering::Relaxed) {
            let _ = events.send(PeerEvent::Disconnected(peer.id));
        }
    }
}
