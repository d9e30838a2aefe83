//! Node configuration: store backend selection and peer settings.
//!
//! An invalid configuration is a startup-fatal error: [`NodeConfig::validate`]
//! is called by `Node::new` before anything is opened.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tarn_core::error::ConfigError;
use tarn_core::params::{NetworkKind, NetworkParams};

/// Which chain store backs the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Volatile in-memory store with full validation. Lost on restart;
    /// meant for short-lived verification and testing.
    Memory,
    /// Fixed-capacity on-disk ring of headers (SPV mode).
    Ring {
        /// Maximum number of header entries retained.
        capacity: u32,
    },
    /// Durable RocksDB store with full blocks and UTXO state.
    Full {
        /// Database directory. Empty means "use the data dir default".
        path: PathBuf,
    },
}

/// Configuration for one node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Network profile to join.
    pub network: NetworkKind,
    /// Chain store backend.
    pub backend: StoreBackend,
    /// Root directory for persistent data.
    pub data_dir: PathBuf,
    /// How many peers to keep connected.
    pub target_peers: usize,
    /// Addresses always dialed, ahead of discovery.
    pub fixed_peers: Vec<SocketAddr>,
    /// Whether to poll the network's DNS seeds.
    pub use_dns_seeds: bool,
    /// Local address for inbound connections, if serving.
    pub listen: Option<SocketAddr>,
    /// Per network request deadline.
    pub request_timeout: Duration,
    /// Log level filter string (e.g. "info", "tarn_net=debug").
    pub log_filter: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkKind::Mainnet,
            backend: StoreBackend::Memory,
            data_dir: PathBuf::from(".tarn"),
            target_peers: 8,
            fixed_peers: Vec::new(),
            use_dns_seeds: true,
            listen: None,
            request_timeout: Duration::from_secs(30),
            log_filter: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Check for configurations that must fail at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.backend {
            StoreBackend::Ring { capacity: 0 } => return Err(ConfigError::ZeroRingCapacity),
            StoreBackend::Full { path } if path.as_os_str().is_empty()
                && self.data_dir.as_os_str().is_empty() =>
            {
                return Err(ConfigError::MissingDataPath)
            }
            _ => {}
        }
        if self.target_peers == 0 {
            return Err(ConfigError::ZeroTargetPeers);
        }
        Ok(())
    }

    /// The network parameter profile for this configuration.
    pub fn params(&self) -> NetworkParams {
        match self.network {
            NetworkKind::Mainnet => NetworkParams::mainnet(),
            NetworkKind::Testnet => NetworkParams::testnet(),
            NetworkKind::Regtest => NetworkParams::regtest(),
        }
    }

    /// Path of the ring store file.
    pub fn ring_path(&self) -> PathBuf {
        self.data_dir.join("headers.ring")
    }

    /// Path of the RocksDB directory, honoring an explicit backend path.
    pub fn db_path(&self) -> PathBuf {
        match &self.backend {
            StoreBackend::Full { path } if !path.as_os_str().is_empty() => path.clone(),
            _ => self.data_dir.join("chaindata"),
        }
    }
}
