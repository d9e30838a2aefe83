//! Chain event bus.
//!
//! Delivers tip-changed, block-connected/disconnected, and transaction-
//! confidence events to external subscribers (wallet, UI) without coupling
//! the chain core to them. Each bus is scoped to one chain instance;
//! multiple chains (e.g. in tests) never share subscribers.
//!
//! Emission never blocks the chain-mutation path: events go through a
//! broadcast channel, preserving commit order; a subscriber that falls
//! behind observes a lag error and drops old events rather than stalling
//! the chain.

use tokio::sync::broadcast;
use tracing::trace;

use crate::types::Hash256;

/// Default bus capacity. A subscriber further than this behind the chain
/// starts lagging (and is told so by the broadcast receiver).
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Confidence of a watched transaction, derived from the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Included in the best chain at the given depth (1 = in the tip block).
    Building { depth: u64 },
    /// Its containing block left the best chain; unconfirmed until re-included.
    Dead,
}

/// An event published by the chain state machine after a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// The best-chain tip moved.
    TipChanged {
        /// Previous tip hash, if the chain was already initialized.
        old: Option<Hash256>,
        /// New tip hash.
        new: Hash256,
        /// New tip height.
        height: u64,
    },
    /// A block joined the best chain.
    BlockConnected { hash: Hash256, height: u64 },
    /// A block left the best chain during a reorganization.
    BlockDisconnected { hash: Hash256, height: u64 },
    /// A watched transaction's confidence changed.
    ConfidenceChanged { txid: Hash256, confidence: Confidence },
}

/// Event bus for one chain instance.
///
/// Cheap to clone; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChainEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a bus with an explicit channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Never blocks; with zero subscribers the event is
    /// simply dropped.
    pub fn publish(&self, event: ChainEvent) {
        trace!(?event, "chain event");
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(ChainEvent::TipChanged {
            old: None,
            new: Hash256([1; 32]),
            height: 0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ChainEvent::BlockDisconnected { hash: Hash256([1; 32]), height: 2 });
        bus.publish(ChainEvent::BlockConnected { hash: Hash256([2; 32]), height: 2 });
        bus.publish(ChainEvent::TipChanged {
            old: Some(Hash256([1; 32])),
            new: Hash256([2; 32]),
            height: 2,
        });

        assert!(matches!(rx.recv().await.unwrap(), ChainEvent::BlockDisconnected { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ChainEvent::BlockConnected { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ChainEvent::TipChanged { .. }));
    }

    #[tokio::test]
    async fn buses_are_isolated_per_instance() {
        let bus_a = EventBus::new();
        let bus_b = EventBus::new();
        let mut rx_b = bus_b.subscribe();

        bus_a.publish(ChainEvent::BlockConnected { hash: Hash256([3; 32]), height: 1 });
        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for i in 0..5u8 {
            bus.publish(ChainEvent::BlockConnected { hash: Hash256([i; 32]), height: i as u64 });
        }
        // The receiver lost the oldest events but the publisher never blocked.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
