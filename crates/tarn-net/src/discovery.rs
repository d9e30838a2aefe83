//! Peer discovery sources.
//!
//! A discovery source produces candidate peer addresses. Sources are polled
//! asynchronously by the peer group and may be combined; a fixed address
//! list plus DNS seed lookup is the usual pairing. Deduplication by socket
//! address happens in the group, not here.

use std::net::SocketAddr;

use async_trait::async_trait;
use tracing::debug;

use tarn_core::params::NetworkParams;

/// A source of candidate peer addresses.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Produce the source's current set of candidate addresses. Failures
    /// are reported as an empty list; discovery is best-effort.
    async fn addresses(&self) -> Vec<SocketAddr>;
}

/// A fixed list of known peer addresses.
pub struct FixedSeeds {
    addrs: Vec<SocketAddr>,
}

impl FixedSeeds {
    /// A source always answering with the given addresses.
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self { addrs }
    }
}

#[async_trait]
impl DiscoverySource for FixedSeeds {
    async fn addresses(&self) -> Vec<SocketAddr> {
        self.addrs.clone()
    }
}

/// Name-service lookup over the network's DNS seed hosts.
pub struct DnsDiscovery {
    seeds: Vec<String>,
    port: u16,
}

impl DnsDiscovery {
    /// Resolve the given seed host names against `port`.
    pub fn new(seeds: Vec<String>, port: u16) -> Self {
        Self { seeds, port }
    }

    /// Resolver over the network profile's seed list and default port.
    pub fn from_params(params: &NetworkParams) -> Self {
        Self::new(params.dns_seeds.clone(), params.default_port)
    }
}

#[async_trait]
impl DiscoverySource for DnsDiscovery {
    async fn addresses(&self) -> Vec<SocketAddr> {
        let mut found = Vec::new();
        for seed in &self.seeds {
            match tokio::net::lookup_host((seed.as_str(), self.port)).await {
                Ok(addrs) => found.extend(addrs),
                Err(e) => {
                    debug!(seed = %seed, error = %e, "dns seed lookup failed");
                }
            }
        }
        found
    }
}
