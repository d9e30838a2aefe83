//! Error types for the Tarn chain core.
//!
//! Validation and store errors never crash the process; network errors are
//! isolated to the affected peer or request. Only [`StoreError::Corruption`]
//! raised from a commit path may be escalated to process-fatal by the
//! embedder, since continuing would risk persisting an inconsistent chain.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("proof of work does not meet target")] BadProofOfWork,
    #[error("timestamp not after parent")] TimestampNotAfterParent,
    #[error("timestamp too far in the future: {0}s past tolerance")] TimestampTooFar(u64),
    #[error("wrong difficulty target: got {got}, expected {expected}")] WrongTarget { got: u64, expected: u64 },
    #[error("merkle root does not match transactions")] BadMerkleRoot,
    #[error("first transaction is not coinbase")] FirstTxNotCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("block has no transactions")] EmptyBlock,
    #[error("checkpoint mismatch at height {height}")] CheckpointMismatch { height: u64 },
    #[error("malformed structure: {0}")] Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store full: admitting entry would evict a required ancestor")] Full,
    #[error("block body pruned: {0}")] Pruned(String),
    #[error("entry not found: {0}")] NotFound(String),
    #[error("missing UTXO: {0}")] MissingUtxo(String),
    #[error("undo data missing for block: {0}")] UndoDataMissing(String),
    #[error("operation not supported by this backend: {0}")] Unsupported(&'static str),
    #[error("store corruption: {0}")] Corruption(String),
    #[error("storage I/O: {0}")] Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error("reorganization failed, tip restored: {0}")] ReorgFailed(String),
    #[error("reorganization would rewrite history below checkpoint height {0}")] CheckpointViolation(u64),
    #[error("block body required but only a header was provided")] BodyRequired,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("peer disconnected: {0}")] PeerDisconnected(String),
    #[error("request timed out")] Timeout,
    #[error("request cancelled")] Cancelled,
    #[error("peer does not have the object: {0}")] NotFound(String),
    #[error("handshake failed: {0}")] HandshakeFailed(String),
    #[error("message too large: {size} > {max}")] MessageTooLarge { size: usize, max: usize },
    #[error("bad magic bytes")] BadMagic,
    #[error("malformed message: {0}")] BadMessage(String),
    #[error("no ready peers")] NoPeers,
    #[error("connection I/O: {0}")] Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown store backend: {0}")] UnknownBackend(String),
    #[error("ring store capacity must be greater than zero")] ZeroRingCapacity,
    #[error("full store requires a data path")] MissingDataPath,
    #[error("target peer count must be greater than zero")] ZeroTargetPeers,
    #[error("invalid network profile: {0}")] InvalidNetwork(String),
}

#[derive(Error, Debug)]
pub enum TarnError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Net(#[from] NetError),
    #[error(transparent)] Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_display_nonempty() {
        let errors: Vec<String> = vec![
            ValidationError::BadProofOfWork.to_string(),
            ValidationError::WrongTarget { got: 1, expected: 2 }.to_string(),
            StoreError::Full.to_string(),
            StoreError::Pruned("ab".into()).to_string(),
            ChainError::ReorgFailed("connect failed".into()).to_string(),
            NetError::Timeout.to_string(),
            ConfigError::ZeroRingCapacity.to_string(),
        ];
        for e in &errors {
            assert!(!e.is_empty());
        }
    }

    #[test]
    fn chain_error_from_store() {
        let err: ChainError = StoreError::Full.into();
        assert!(matches!(err, ChainError::Store(StoreError::Full)));
    }

    #[test]
    fn tarn_error_wraps_transparently() {
        let err: TarnError = NetError::Timeout.into();
        assert_eq!(err.to_string(), NetError::Timeout.to_string());
    }
}
