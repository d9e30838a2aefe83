//! # tarn-net
//! Peer coordination and download orchestration: discovery, connections,
//! the wire codec, and header-first chain synchronization.

pub mod config;
pub mod discovery;
pub mod group;
pub mod message;
pub mod peer;
pub mod sync;

pub use config::PeerGroupConfig;
pub use group::PeerGroup;
pub use peer::{Peer, PeerEvent, PeerState};
