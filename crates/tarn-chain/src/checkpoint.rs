//! Checkpoint verification.
//!
//! Checkpoints pin known-good (height, hash) pairs from the network
//! parameters so that deep history cannot be rewritten: a candidate at a
//! checkpoint height must carry the pinned hash, and a reorganization whose
//! fork point lies at or below the highest checkpoint is rejected outright.
//!
//! The functions take an explicit checkpoint slice so tests can supply their
//! own lists; production code passes `params.checkpoints`.

use tarn_core::error::ValidationError;
use tarn_core::types::Hash256;

/// Verify that a block at `height` matches the pinned checkpoint hash, if
/// one is configured there.
///
/// # Errors
///
/// [`ValidationError::CheckpointMismatch`] when a checkpoint exists at
/// `height` and the hash differs.
pub fn check_checkpoint(
    checkpoints: &[(u64, Hash256)],
    height: u64,
    hash: &Hash256,
) -> Result<(), ValidationError> {
    for (cp_height, cp_hash) in checkpoints {
        if *cp_height == height {
            if cp_hash != hash {
                return Err(ValidationError::CheckpointMismatch { height });
            }
            return Ok(());
        }
    }
    Ok(())
}

/// Height of the most recent checkpoint, or 0 if there are none.
pub fn last_checkpoint_height(checkpoints: &[(u64, Hash256)]) -> u64 {
    checkpoints.iter().map(|(h, _)| *h).max().unwrap_or(0)
}

/// Returns `true` if a reorganization forking at `fork_height` would rewrite
/// checkpointed history (disconnect blocks at or below the last checkpoint).
pub fn reorg_crosses_checkpoint(checkpoints: &[(u64, Hash256)], fork_height: u64) -> bool {
    let last = last_checkpoint_height(checkpoints);
    last > 0 && fork_height < last
}
