//! Network parameters: the injected profile that fixes genesis, difficulty
//! rules, checkpoints, and peer defaults for one deployment.
//!
//! The chain core never hard-codes network constants; everything that varies
//! between mainnet, testnet, and regtest lives here and is passed in at
//! construction time.

use std::sync::LazyLock;

use crate::difficulty::MAX_TARGET;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Genesis timestamp: January 1, 2025 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_735_689_600;

/// Message embedded in the genesis coinbase witness.
pub const GENESIS_MESSAGE: &[u8] = b"A lake fills drop by drop. Tarn genesis 2025.";

/// Protocol version advertised during the handshake.
pub const PROTOCOL_VERSION: u64 = 1;

/// Network kind selecting a parameter profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkKind {
    /// Production network.
    #[default]
    Mainnet,
    /// Public test network with lower difficulty.
    Testnet,
    /// Local regression-test network: minimal difficulty, no retargeting.
    Regtest,
}

/// Complete parameter set for one network.
///
/// Cloned freely; the checkpoint list is small and the genesis block is
/// shared via a per-process cache.
#[derive(Debug, Clone)]
pub struct NetworkParams {
    /// Which profile this is.
    pub kind: NetworkKind,
    /// Four-byte identifier prepended to all P2P messages.
    pub magic: [u8; 4],
    /// Default TCP port for P2P connections.
    pub default_port: u16,
    /// DNS seed host names polled by discovery.
    pub dns_seeds: Vec<String>,
    /// Target seconds between blocks.
    pub block_time_secs: u64,
    /// Number of block intervals in the difficulty adjustment window.
    pub difficulty_window: u64,
    /// Difficulty target for the first blocks (and for every block on
    /// networks with retargeting disabled).
    pub initial_target: u64,
    /// Whether the retarget rule is applied at all. Regtest disables it so
    /// every block may use `initial_target`.
    pub retargeting: bool,
    /// Maximum seconds a header timestamp may lead wall-clock time.
    pub max_time_drift: u64,
    /// Pinned (height, hash) pairs bounding how deep history may be rewritten.
    pub checkpoints: Vec<(u64, Hash256)>,
}

impl NetworkParams {
    /// Production parameters.
    pub fn mainnet() -> Self {
        Self {
            kind: NetworkKind::Mainnet,
            magic: *b"TARN",
            default_port: 18915,
            dns_seeds: vec![
                "seed1.tarn.network".to_string(),
                "seed2.tarn.network".to_string(),
            ],
            block_time_secs: 120,
            difficulty_window: 60,
            initial_target: MAX_TARGET / 1024,
            retargeting: true,
            max_time_drift: 2 * 60 * 60,
            checkpoints: Vec::new(),
        }
    }

    /// Public test network parameters.
    pub fn testnet() -> Self {
        Self {
            kind: NetworkKind::Testnet,
            magic: *b"TTST",
            default_port: 28915,
            dns_seeds: vec!["testnet-seed.tarn.network".to_string()],
            block_time_secs: 120,
            difficulty_window: 60,
            initial_target: MAX_TARGET / 16,
            retargeting: true,
            max_time_drift: 2 * 60 * 60,
            checkpoints: Vec::new(),
        }
    }

    /// Local regression-test parameters: any hash passes the proof-of-work
    /// check and no retargeting is performed.
    pub fn regtest() -> Self {
        Self {
            kind: NetworkKind::Regtest,
            magic: *b"TREG",
            default_port: 38915,
            dns_seeds: Vec::new(),
            block_time_secs: 1,
            difficulty_window: 60,
            initial_target: MAX_TARGET,
            retargeting: false,
            max_time_drift: 2 * 60 * 60,
            checkpoints: Vec::new(),
        }
    }

    /// The genesis block for this network.
    ///
    /// All profiles share the same genesis body; the header target is the
    /// profile's `initial_target` so regtest genesis trivially meets its own
    /// proof-of-work rule.
    pub fn genesis_block(&self) -> Block {
        match self.kind {
            NetworkKind::Regtest => GENESIS_REGTEST.clone(),
            _ => build_genesis(self.initial_target, GENESIS_NONCE_PUBLIC),
        }
    }

    /// Hash of this network's genesis header.
    pub fn genesis_hash(&self) -> Hash256 {
        self.genesis_block().header.hash()
    }

    /// Height of the highest configured checkpoint, or 0 if there are none.
    pub fn last_checkpoint_height(&self) -> u64 {
        self.checkpoints.iter().map(|(h, _)| *h).max().unwrap_or(0)
    }

    /// The pinned hash at `height`, if a checkpoint exists there.
    pub fn checkpoint_at(&self, height: u64) -> Option<Hash256> {
        self.checkpoints
            .iter()
            .find(|(h, _)| *h == height)
            .map(|(_, hash)| *hash)
    }
}

/// Nonce baked into the public-network genesis headers.
///
/// Chosen once so the genesis hash meets the initial target on main and test
/// profiles; regtest accepts any nonce.
const GENESIS_NONCE_PUBLIC: u64 = 0;

static GENESIS_REGTEST: LazyLock<Block> =
    LazyLock::new(|| build_genesis(MAX_TARGET, 0));

/// Build the deterministic genesis block.
fn build_genesis(target: u64, nonce: u64) -> Block {
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            witness: GENESIS_MESSAGE.to_vec(),
        }],
        outputs: vec![TxOutput {
            value: 0,
            script_key: Hash256::ZERO,
        }],
        lock_time: 0,
    };
    // Hardcoded coinbase; serialization cannot fail.
    let coinbase_txid = coinbase
        .txid()
        .expect("genesis coinbase is hardcoded valid data");
    let merkle_root = crate::merkle::merkle_root(&[coinbase_txid]);

    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root,
            timestamp: GENESIS_TIMESTAMP,
            target,
            nonce,
        },
        transactions: vec![coinbase],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_have_distinct_magic_and_ports() {
        let main = NetworkParams::mainnet();
        let test = NetworkParams::testnet();
        let reg = NetworkParams::regtest();
        assert_ne!(main.magic, test.magic);
        assert_ne!(main.magic, reg.magic);
        assert_ne!(main.default_port, test.default_port);
        assert_ne!(test.default_port, reg.default_port);
    }

    #[test]
    fn genesis_is_deterministic() {
        let params = NetworkParams::regtest();
        assert_eq!(params.genesis_hash(), params.genesis_hash());
        assert_eq!(params.genesis_block(), params.genesis_block());
    }

    #[test]
    fn genesis_has_zero_prev_hash() {
        let block = NetworkParams::regtest().genesis_block();
        assert!(block.header.prev_hash.is_zero());
        assert!(block.coinbase().unwrap().is_coinbase());
    }

    #[test]
    fn regtest_genesis_meets_its_own_target() {
        let block = NetworkParams::regtest().genesis_block();
        assert!(block.header.meets_target());
    }

    #[test]
    fn genesis_merkle_root_matches_coinbase() {
        let block = NetworkParams::regtest().genesis_block();
        let txid = block.transactions[0].txid().unwrap();
        assert_eq!(block.header.merkle_root, crate::merkle::merkle_root(&[txid]));
    }

    #[test]
    fn regtest_disables_retargeting() {
        let params = NetworkParams::regtest();
        assert!(!params.retargeting);
        assert_eq!(params.initial_target, MAX_TARGET);
    }

    #[test]
    fn checkpoint_lookup() {
        let mut params = NetworkParams::regtest();
        params.checkpoints = vec![(10, Hash256([0xAA; 32])), (50, Hash256([0xBB; 32]))];
        assert_eq!(params.last_checkpoint_height(), 50);
        assert_eq!(params.checkpoint_at(10), Some(Hash256([0xAA; 32])));
        assert_eq!(params.checkpoint_at(11), None);

        let empty = NetworkParams::regtest();
        assert_eq!(empty.last_checkpoint_height(), 0);
    }
}
