//! Transaction confidence tracking for a watched-script set.
//!
//! The wallet layer injects an opaque set of script keys it cares about.
//! When full blocks flow through the chain, transactions relevant to that
//! set are recorded here, and every committed tip movement re-derives their
//! [`Confidence`]: `Building { depth }` while the containing block is on the
//! best chain, `Dead` after a reorganization disconnects it. Only changed
//! confidences produce events.
//!
//! A transaction is relevant if any output pays a watched script key, or if
//! any input spends an already-tracked transaction.

use std::collections::{HashMap, HashSet};

use tarn_core::events::Confidence;
use tarn_core::types::{Block, Hash256, Transaction};

/// Where a tracked transaction currently sits.
#[derive(Debug, Clone)]
struct TxRecord {
    /// Hash of the block that contained it (last time it was connected).
    block_hash: Hash256,
    /// Height of that block.
    height: u64,
    /// True after its containing block left the best chain.
    dead: bool,
}

/// Tracks confidence for transactions relevant to a watched-script set.
pub struct ConfidenceTracker {
    /// Opaque script keys the wallet layer is interested in.
    watched: HashSet<Hash256>,
    /// txid → placement record.
    txs: HashMap<Hash256, TxRecord>,
    /// Last confidence reported per txid, to emit only changes.
    reported: HashMap<Hash256, Confidence>,
}

impl ConfidenceTracker {
    /// Create a tracker for the given watched script keys.
    pub fn new(watched: HashSet<Hash256>) -> Self {
        Self {
            watched,
            txs: HashMap::new(),
            reported: HashMap::new(),
        }
    }

    /// Whether anything is being watched at all.
    pub fn is_empty(&self) -> bool {
        self.watched.is_empty() && self.txs.is_empty()
    }

    /// Number of transactions currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.txs.len()
    }

    /// A transaction is relevant if it pays a watched script or spends an
    /// already-tracked transaction.
    fn is_relevant(&self, tx: &Transaction) -> bool {
        if tx.outputs.iter().any(|out| self.watched.contains(&out.script_key)) {
            return true;
        }
        tx.inputs
            .iter()
            .any(|input| self.txs.contains_key(&input.previous_output.txid))
    }

    /// Record relevant transactions from a block that joined the best chain.
    pub fn block_connected(&mut self, block: &Block, height: u64) {
        let block_hash = block.hash();
        for tx in &block.transactions {
            if !self.is_relevant(tx) {
                continue;
            }
            let Ok(txid) = tx.txid() else { continue };
            self.txs.insert(
                txid,
                TxRecord { block_hash, height, dead: false },
            );
        }
    }

    /// Mark transactions from a disconnected block as dead until re-included.
    pub fn block_disconnected(&mut self, block_hash: &Hash256) {
        for record in self.txs.values_mut() {
            if record.block_hash == *block_hash {
                record.dead = true;
            }
        }
    }

    /// Re-derive confidence for every tracked transaction against the new
    /// tip height, returning only the ones that changed.
    pub fn confidence_events(&mut self, tip_height: u64) -> Vec<(Hash256, Confidence)> {
        let mut events = Vec::new();
        for (txid, record) in &self.txs {
            let confidence = if record.dead {
                Confidence::Dead
            } else {
                Confidence::Building {
                    depth: tip_height.saturating_sub(record.height) + 1,
                }
            };
            if self.reported.get(txid) != Some(&confidence) {
                self.reported.insert(*txid, confidence);
                events.push((*txid, confidence));
            }
        }
        // Deterministic order for subscribers.
        events.sort_by_key(|(txid, _)| *txid);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_core::types::{BlockHeader, OutPoint, TxInput, TxOutput};

    fn watched_key() -> Hash256 {
        Hash256([0xAB; 32])
    }

    fn tracker() -> ConfidenceTracker {
        let mut watched = HashSet::new();
        watched.insert(watched_key());
        ConfidenceTracker::new(watched)
    }

    fn tx_paying(key: Hash256, tag: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                witness: vec![tag],
            }],
            outputs: vec![TxOutput { value: 10, script_key: key }],
            lock_time: 0,
        }
    }

    fn block_with(txs: Vec<Transaction>, nonce: u64) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: Hash256::ZERO,
                merkle_root: Hash256::ZERO,
                timestamp: 1_700_000_000,
                target: u64::MAX,
                nonce,
            },
            transactions: txs,
        }
    }

    #[test]
    fn irrelevant_transactions_ignored() {
        let mut t = tracker();
        let block = block_with(vec![tx_paying(Hash256([0x01; 32]), 0)], 0);
        t.block_connected(&block, 5);
        assert_eq!(t.tracked_count(), 0);
        assert!(t.confidence_events(5).is_empty());
    }

    #[test]
    fn watched_output_tracked_and_building() {
        let mut t = tracker();
        let tx = tx_paying(watched_key(), 0);
        let txid = tx.txid().unwrap();
        let block = block_with(vec![tx], 0);

        t.block_connected(&block, 5);
        let events = t.confidence_events(5);
        assert_eq!(events, vec![(txid, Confidence::Building { depth: 1 })]);
    }

    #[test]
    fn depth_grows_with_tip() {
        let mut t = tracker();
        let tx = tx_paying(watched_key(), 0);
        let txid = tx.txid().unwrap();
        t.block_connected(&block_with(vec![tx], 0), 5);

        t.confidence_events(5);
        let events = t.confidence_events(8);
        assert_eq!(events, vec![(txid, Confidence::Building { depth: 4 })]);
    }

    #[test]
    fn unchanged_confidence_not_re_emitted() {
        let mut t = tracker();
        let tx = tx_paying(watched_key(), 0);
        t.block_connected(&block_with(vec![tx], 0), 5);

        assert_eq!(t.confidence_events(5).len(), 1);
        assert!(t.confidence_events(5).is_empty());
    }

    #[test]
    fn disconnect_marks_dead() {
        let mut t = tracker();
        let tx = tx_paying(watched_key(), 0);
        let txid = tx.txid().unwrap();
        let block = block_with(vec![tx], 0);
        let block_hash = block.hash();

        t.block_connected(&block, 5);
        t.confidence_events(5);

        t.block_disconnected(&block_hash);
        let events = t.confidence_events(4);
        assert_eq!(events, vec![(txid, Confidence::Dead)]);
    }

    #[test]
    fn reconnected_tx_revives() {
        let mut t = tracker();
        let tx = tx_paying(watched_key(), 0);
        let txid = tx.txid().unwrap();
        let block = block_with(vec![tx.clone()], 0);
        let block_hash = block.hash();

        t.block_connected(&block, 5);
        t.confidence_events(5);
        t.block_disconnected(&block_hash);
        t.confidence_events(4);

        // The same transaction comes back in a different block.
        let block2 = block_with(vec![tx], 1);
        t.block_connected(&block2, 6);
        let events = t.confidence_events(6);
        assert_eq!(events, vec![(txid, Confidence::Building { depth: 1 })]);
    }

    #[test]
    fn spend_of_tracked_tx_is_relevant() {
        let mut t = tracker();
        let tx = tx_paying(watched_key(), 0);
        let txid = tx.txid().unwrap();
        t.block_connected(&block_with(vec![tx], 0), 5);

        // A transaction spending the tracked one, paying an unwatched key.
        let spender = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid, index: 0 },
                witness: vec![0; 64],
            }],
            outputs: vec![TxOutput { value: 9, script_key: Hash256([0x02; 32]) }],
            lock_time: 0,
        };
        let spender_txid = spender.txid().unwrap();
        t.block_connected(&block_with(vec![spender], 1), 6);

        let events = t.confidence_events(6);
        assert!(events.iter().any(|(id, _)| *id == spender_txid));
    }
}
