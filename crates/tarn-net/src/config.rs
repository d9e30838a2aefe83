//! Peer group configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Default number of peers the group tries to keep connected.
pub const DEFAULT_TARGET_PEERS: usize = 8;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive request timeouts before a peer is disconnected.
pub const DEFAULT_MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

/// Tunables for one [`PeerGroup`](crate::group::PeerGroup).
#[derive(Debug, Clone)]
pub struct PeerGroupConfig {
    /// How many ready peers the group opportunistically maintains.
    pub target_peers: usize,
    /// TCP connect deadline.
    pub connect_timeout: Duration,
    /// Version/verack exchange deadline.
    pub handshake_timeout: Duration,
    /// Per outstanding request deadline.
    pub request_timeout: Duration,
    /// Consecutive timeouts from one peer before it is disconnected.
    pub max_consecutive_timeouts: u32,
    /// Local address to accept inbound connections on, if any.
    pub listen_addr: Option<SocketAddr>,
    /// User agent advertised in the version handshake.
    pub user_agent: String,
}

impl Default for PeerGroupConfig {
    fn default() -> Self {
        Self {
            target_peers: DEFAULT_TARGET_PEERS,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_consecutive_timeouts: DEFAULT_MAX_CONSECUTIVE_TIMEOUTS,
            listen_addr: None,
            user_agent: concat!("/tarn:", env!("CARGO_PKG_VERSION"), "/").to_string(),
        }
    }
}
