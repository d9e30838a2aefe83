//! End-to-end test through the public node API: one node serves its chain,
//! a second one discovers it, synchronizes, and observes tip events.

use std::time::Duration;

use tarn_core::events::ChainEvent;
use tarn_core::params::NetworkKind;
use tarn_core::store::StoredHeader;
use tarn_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};
use tarn_node::{Node, NodeConfig, StoreBackend};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn next_block(parent: &StoredHeader, tag: u64) -> Block {
    let txs = vec![Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            witness: tag.to_le_bytes().to_vec(),
        }],
        outputs: vec![TxOutput { value: 50, script_key: Hash256([0xAA; 32]) }],
        lock_time: 0,
    }];
    let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid().unwrap()).collect();
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: parent.hash(),
            merkle_root: tarn_core::merkle::merkle_root(&txids),
            timestamp: parent.header.timestamp + 1,
            target: u64::MAX,
            nonce: tag,
        },
        transactions: txs,
    }
}

fn config(dir: &tempfile::TempDir, listen: bool) -> NodeConfig {
    NodeConfig {
        network: NetworkKind::Regtest,
        backend: StoreBackend::Memory,
        data_dir: dir.path().to_path_buf(),
        use_dns_seeds: false,
        listen: listen.then(|| "127.0.0.1:0".parse().unwrap()),
        ..NodeConfig::default()
    }
}

#[tokio::test]
async fn fresh_node_syncs_from_serving_node() {
    init_tracing();
    let dir_a = tempfile::tempdir().unwrap();
    let node_a = Node::new(config(&dir_a, true)).unwrap();
    let mut parent = node_a.tip().unwrap();
    for i in 1..=6 {
        node_a.add(next_block(&parent, i)).unwrap();
        parent = node_a.tip().unwrap();
    }
    node_a.start().await.unwrap();
    let addr_a = node_a.listen_addr().unwrap();

    let dir_b = tempfile::tempdir().unwrap();
    let node_b = Node::new(config(&dir_b, false)).unwrap();
    let mut events_b = node_b.subscribe();
    node_b.add_peer_address(addr_a);
    node_b.start().await.unwrap();

    node_b
        .wait_for_peers(1, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(node_b.connected_peers().len(), 1);

    tokio::time::timeout(Duration::from_secs(10), node_b.sync())
        .await
        .expect("sync did not finish")
        .unwrap();

    assert_eq!(node_b.height().unwrap(), 6);
    assert_eq!(node_b.tip().unwrap().hash(), node_a.tip().unwrap().hash());

    // The subscriber saw the tip advance to the final height.
    let mut last_tip_height = None;
    while let Ok(event) = events_b.try_recv() {
        if let ChainEvent::TipChanged { height, .. } = event {
            last_tip_height = Some(height);
        }
    }
    assert_eq!(last_tip_height, Some(6));

    node_b.stop();
    node_a.stop();
}

#[tokio::test]
async fn fetch_block_by_hash_from_serving_node() {
    init_tracing();
    let dir_a = tempfile::tempdir().unwrap();
    let node_a = Node::new(config(&dir_a, true)).unwrap();
    let genesis = node_a.tip().unwrap();
    let block = next_block(&genesis, 1);
    let hash = block.hash();
    node_a.add(block.clone()).unwrap();
    node_a.start().await.unwrap();

    let dir_b = tempfile::tempdir().unwrap();
    let node_b = Node::new(config(&dir_b, false)).unwrap();
    node_b.add_peer_address(node_a.listen_addr().unwrap());
    node_b.start().await.unwrap();
    node_b
        .wait_for_peers(1, Duration::from_secs(5))
        .await
        .unwrap();

    let got = tokio::time::timeout(Duration::from_secs(10), node_b.fetch_block(hash))
        .await
        .expect("fetch hung")
        .unwrap();
    assert_eq!(got, block);

    node_b.stop();
    node_a.stop();
}
