//! Download orchestration state machine.
//!
//! Sans-io: the peer group feeds peer/headers/body events in and receives
//! actions out; all network I/O happens in the driver. Synchronization runs
//! header-first: locate the fork point with a locator, pull header batches
//! from the best ready peer, then (for full-block chains) fan body requests
//! across every available peer bounded by a per-peer in-flight cap.
//!
//! Timed-out or disconnected peers have their assignments pushed back onto
//! the front of the queue in order; a peer that keeps failing is demoted and
//! no longer receives work.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use tarn_core::types::Hash256;

/// Peer identifier assigned by the peer group.
pub type PeerId = u64;

/// Failures before a peer is demoted out of the rotation.
pub const MAX_FAILURES: u32 = 3;

/// Maximum concurrent in-flight body requests per peer.
pub const MAX_IN_FLIGHT_PER_PEER: u32 = 8;

/// Headers requested per batch; a full batch means the peer has more.
pub const HEADER_BATCH_SIZE: usize = 2000;

/// The phase of the synchronization process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing in flight; will start a header request when a peer is ahead.
    Idle,
    /// Waiting for a header batch from the given peer.
    SyncingHeaders { peer: PeerId },
    /// Headers done; fetching block bodies across peers.
    FetchingBodies,
    /// Synchronization finished; reported once then back to idle.
    Done,
}

/// Actions the driver should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Send a `GetHeaders` with the given locator to the peer.
    RequestHeaders { peer: PeerId, locator: Vec<Hash256> },
    /// Request one block body from the peer.
    RequestBody { peer: PeerId, hash: Hash256 },
    /// Nothing to do right now.
    Wait,
    /// The chain is synchronized to the best known peer height.
    Finished,
}

/// Per-peer synchronization bookkeeping.
#[derive(Debug, Clone)]
pub struct PeerSyncState {
    /// The peer's advertised best height.
    pub best_height: u64,
    /// Outstanding body requests assigned to this peer.
    pub in_flight: u32,
    /// Failed or timed-out requests.
    pub failures: u32,
    /// Demoted peers receive no further work.
    pub demoted: bool,
}

impl PeerSyncState {
    /// Selection score; higher is better. Failures weigh heavily.
    fn score(&self) -> i64 {
        self.best_height as i64 - self.failures as i64 * 1000
    }
}

/// One outstanding body request.
#[derive(Debug, Clone)]
struct InFlight {
    peer: PeerId,
    requested_at: Instant,
}

/// Header-first synchronization state machine.
pub struct DownloadState {
    phase: SyncPhase,
    /// Whether block bodies are fetched after headers (full-block chains).
    want_bodies: bool,
    peers: HashMap<PeerId, PeerSyncState>,
    /// Body hashes awaiting assignment, oldest first.
    queue: VecDeque<Hash256>,
    /// Assigned body requests.
    in_flight: HashMap<Hash256, InFlight>,
    /// Outstanding header request, for timeout tracking.
    header_request: Option<(PeerId, Instant)>,
    /// The last batch was full, so the peer has more headers for us once
    /// the current bodies have been applied.
    more_headers: bool,
    request_timeout: Duration,
}

impl DownloadState {
    /// New idle state machine.
    pub fn new(want_bodies: bool, request_timeout: Duration) -> Self {
        Self {
            phase: SyncPhase::Idle,
            want_bodies,
            peers: HashMap::new(),
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            header_request: None,
            more_headers: false,
            request_timeout,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> &SyncPhase {
        &self.phase
    }

    /// Body hashes currently queued or in flight.
    pub fn pending_bodies(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }

    /// A peer finished its handshake and advertised a height.
    pub fn on_peer_ready(&mut self, peer: PeerId, best_height: u64) {
        debug!(peer, best_height, "sync: peer ready");
        self.peers
            .entry(peer)
            .and_modify(|p| p.best_height = best_height)
            .or_insert(PeerSyncState {
                best_height,
                in_flight: 0,
                failures: 0,
                demoted: false,
            });
    }

    /// A peer disconnected: requeue its assignments at the front, in order.
    pub fn on_peer_gone(&mut self, peer: PeerId) {
        let mut reassign: Vec<Hash256> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.peer == peer)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &reassign {
            self.in_flight.remove(hash);
        }
        reassign.reverse();
        for hash in reassign {
            self.queue.push_front(hash);
        }
        self.peers.remove(&peer);

        // Abandon an outstanding header request to this peer.
        if matches!(self.phase, SyncPhase::SyncingHeaders { peer: p } if p == peer) {
            self.phase = SyncPhase::Idle;
            self.header_request = None;
        }
        info!(peer, "sync: peer gone, work requeued");
    }

    /// A header batch arrived. `new_hashes` are the hashes the chain
    /// accepted from it (in order); `batch_len` is the raw batch size.
    pub fn on_headers(&mut self, peer: PeerId, new_hashes: Vec<Hash256>, batch_len: usize) {
        if !matches!(self.phase, SyncPhase::SyncingHeaders { peer: p } if p == peer) {
            debug!(peer, "sync: unsolicited header batch");
        }
        self.header_request = None;

        if self.want_bodies {
            for hash in &new_hashes {
                if !self.queue.contains(hash) && !self.in_flight.contains_key(hash) {
                    self.queue.push_back(*hash);
                }
            }
        }
        self.more_headers = batch_len >= HEADER_BATCH_SIZE;

        // Bodies must land (advancing the chain and thus the locator)
        // before the next header batch is requested.
        if self.pending_bodies() > 0 {
            self.phase = SyncPhase::FetchingBodies;
        } else if self.more_headers {
            self.phase = SyncPhase::Idle;
        } else {
            self.phase = SyncPhase::Done;
        }
        debug!(
            peer,
            accepted = new_hashes.len(),
            batch_len,
            queued = self.queue.len(),
            "sync: header batch processed"
        );
    }

    /// A requested body arrived (or was satisfied some other way).
    pub fn on_body(&mut self, hash: &Hash256) {
        if let Some(inflight) = self.in_flight.remove(hash) {
            if let Some(p) = self.peers.get_mut(&inflight.peer) {
                p.in_flight = p.in_flight.saturating_sub(1);
                p.failures = 0;
            }
        }
        if let Some(pos) = self.queue.iter().position(|h| h == hash) {
            self.queue.remove(pos);
        }

        if matches!(self.phase, SyncPhase::FetchingBodies) && self.pending_bodies() == 0 {
            if self.more_headers {
                debug!("sync: bodies applied, requesting next header batch");
                self.phase = SyncPhase::Idle;
            } else {
                info!("sync: all bodies downloaded");
                self.phase = SyncPhase::Done;
            }
        }
    }

    /// Expire overdue requests. Returns peers that crossed the failure
    /// threshold and should be disconnected by the driver.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<PeerId> {
        let mut to_disconnect = Vec::new();

        // Body requests.
        let overdue: Vec<Hash256> = self
            .in_flight
            .iter()
            .filter(|(_, f)| now.duration_since(f.requested_at) >= self.request_timeout)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in overdue {
            let Some(inflight) = self.in_flight.remove(&hash) else { continue };
            self.queue.push_front(hash);
            if let Some(p) = self.peers.get_mut(&inflight.peer) {
                p.in_flight = p.in_flight.saturating_sub(1);
                p.failures += 1;
                if p.failures >= MAX_FAILURES && !p.demoted {
                    warn!(peer = inflight.peer, failures = p.failures, "sync: demoting peer");
                    p.demoted = true;
                    to_disconnect.push(inflight.peer);
                }
            }
        }

        // Header request.
        if let Some((peer, at)) = self.header_request {
            if now.duration_since(at) >= self.request_timeout {
                self.header_request = None;
                self.phase = SyncPhase::Idle;
                if let Some(p) = self.peers.get_mut(&peer) {
                    p.failures += 1;
                    if p.failures >= MAX_FAILURES && !p.demoted {
                        warn!(peer, "sync: demoting peer after header timeout");
                        p.demoted = true;
                        to_disconnect.push(peer);
                    }
                }
            }
        }

        to_disconnect
    }

    /// Best non-demoted peer strictly ahead of `our_height`, if any.
    fn best_peer_ahead(&self, our_height: u64) -> Option<PeerId> {
        self.peers
            .iter()
            .filter(|(_, p)| !p.demoted && p.best_height > our_height)
            .max_by_key(|(_, p)| p.best_height)
            .map(|(id, _)| *id)
    }

    /// Compute the next actions.
    ///
    /// `our_height` is the chain's current best height; `locator` builds a
    /// fresh locator when a header request is issued.
    pub fn next_actions<F>(&mut self, our_height: u64, locator: F) -> Vec<SyncAction>
    where
        F: FnOnce() -> Vec<Hash256>,
    {
        match self.phase.clone() {
            SyncPhase::Idle => {
                let Some(peer) = self.best_peer_ahead(our_height) else {
                    // Caught up with everyone we know.
                    return if self.pending_bodies() > 0 && self.want_bodies {
                        self.phase = SyncPhase::FetchingBodies;
                        self.body_actions()
                    } else {
                        vec![SyncAction::Finished]
                    };
                };
                info!(peer, our_height, "sync: requesting headers");
                self.phase = SyncPhase::SyncingHeaders { peer };
                self.header_request = Some((peer, Instant::now()));
                vec![SyncAction::RequestHeaders { peer, locator: locator() }]
            }
            SyncPhase::SyncingHeaders { .. } => vec![SyncAction::Wait],
            SyncPhase::FetchingBodies => self.body_actions(),
            SyncPhase::Done => {
                self.phase = SyncPhase::Idle;
                vec![SyncAction::Finished]
            }
        }
    }

    /// Assign queued body hashes across available peers, best peers first,
    /// respecting the per-peer in-flight cap.
    fn body_actions(&mut self) -> Vec<SyncAction> {
        let mut available: Vec<(PeerId, i64)> = self
            .peers
            .iter()
            .filter(|(_, p)| !p.demoted && p.in_flight < MAX_IN_FLIGHT_PER_PEER)
            .map(|(id, p)| (*id, p.score()))
            .collect();
        available.sort_by(|a, b| b.1.cmp(&a.1));

        if available.is_empty() {
            return vec![SyncAction::Wait];
        }

        let unassigned: Vec<Hash256> = self
            .queue
            .iter()
            .filter(|h| !self.in_flight.contains_key(*h))
            .copied()
            .collect();

        let mut actions = Vec::new();
        let mut cursor = 0usize;
        for hash in unassigned {
            let start = cursor;
            loop {
                let (peer, _) = available[cursor % available.len()];
                cursor += 1;
                let can_take = self
                    .peers
                    .get(&peer)
                    .map(|p| p.in_flight < MAX_IN_FLIGHT_PER_PEER)
                    .unwrap_or(false);
                if can_take {
                    self.in_flight
                        .insert(hash, InFlight { peer, requested_at: Instant::now() });
                    if let Some(p) = self.peers.get_mut(&peer) {
                        p.in_flight += 1;
                    }
                    actions.push(SyncAction::RequestBody { peer, hash });
                    break;
                }
                if cursor - start >= available.len() {
                    // Everyone is at capacity.
                    return if actions.is_empty() { vec![SyncAction::Wait] } else { actions };
                }
            }
        }

        if actions.is_empty() {
            vec![SyncAction::Wait]
        } else {
            actions
        }
    }
}
