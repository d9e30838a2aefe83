//! Local block-file replay.
//!
//! Reads blocks from a file of wire-framed `block` messages (the same
//! `magic || length || payload` framing used on the network, so files are
//! network-tagged) and feeds each one into the node's chain, tallying the
//! outcomes. Frames from another network fail the magic check and stop the
//! replay.

use std::path::Path;

use tokio::io::BufReader;
use tracing::{info, warn};

use tarn_chain::Accepted;
use tarn_core::error::{ChainError, NetError, TarnError};
use tarn_core::types::Block;
use tarn_net::message::{Codec, Message};

use crate::node::Node;

/// Outcome tally of one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Blocks that extended or reorganized the best chain.
    pub connected: u64,
    /// Blocks stored on side branches.
    pub side_chain: u64,
    /// Blocks buffered waiting for an ancestor.
    pub orphaned: u64,
    /// Blocks already known.
    pub duplicate: u64,
    /// Blocks failing validation.
    pub rejected: u64,
}

impl ReplayStats {
    /// Total frames processed.
    pub fn total(&self) -> u64 {
        self.connected + self.side_chain + self.orphaned + self.duplicate + self.rejected
    }
}

/// Replay every block frame in `path` into the node's chain.
///
/// Validation failures are counted and skipped; store and configuration
/// failures abort the replay.
pub async fn replay_file(node: &Node, path: impl AsRef<Path>) -> Result<ReplayStats, TarnError> {
    let file = tokio::fs::File::open(path.as_ref())
        .await
        .map_err(|e| NetError::Io(e.to_string()))?;
    let mut reader = BufReader::new(file);
    let codec = Codec::new(node.params().magic);
    let mut stats = ReplayStats::default();

    loop {
        match codec.read_message(&mut reader).await {
            Ok(Message::Block(block)) => match node.add(block) {
                Ok(Accepted::Extended) | Ok(Accepted::Reorganized { .. }) => stats.connected += 1,
                Ok(Accepted::SideChain) => stats.side_chain += 1,
                Ok(Accepted::Orphan) => stats.orphaned += 1,
                Ok(Accepted::Duplicate) => stats.duplicate += 1,
                Err(TarnError::Chain(ChainError::Validation(e))) => {
                    warn!(error = %e, "replayed block failed validation");
                    stats.rejected += 1;
                }
                Err(e) => return Err(e),
            },
            Ok(other) => {
                warn!(kind = other.name(), "skipping non-block frame in block file");
            }
            // End of file (or a truncated final frame).
            Err(NetError::Io(_)) => break,
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        connected = stats.connected,
        side_chain = stats.side_chain,
        orphaned = stats.orphaned,
        duplicate = stats.duplicate,
        rejected = stats.rejected,
        "block file replay finished"
    );
    Ok(stats)
}

/// Write blocks to a replayable file with the given network magic.
pub async fn write_block_file(
    path: impl AsRef<Path>,
    magic: [u8; 4],
    blocks: &[Block],
) -> Result<(), NetError> {
    let mut file = tokio::fs::File::create(path.as_ref())
        .await
        .map_err(|e| NetError::Io(e.to_string()))?;
    let codec = Codec::new(magic);
    for block in blocks {
        codec
            .write_message(&mut file, &Message::Block(block.clone()))
            .await?;
    }
    file.sync_all().await.map_err(|e| NetError::Io(e.to_string()))
}
