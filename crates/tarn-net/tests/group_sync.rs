//! Peer group integration tests over localhost TCP: readiness deadlines,
//! two-node header and block synchronization, and fetch requeueing across
//! peer failure.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::TcpListener;

use tarn_chain::Chain;
use tarn_core::error::NetError;
use tarn_core::events::EventBus;
use tarn_core::params::NetworkParams;
use tarn_core::store::{MemoryBlockStore, StoredHeader};
use tarn_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};
use tarn_net::config::PeerGroupConfig;
use tarn_net::message::{Codec, Message};
use tarn_net::PeerGroup;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn coinbase(tag: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            witness: tag.to_le_bytes().to_vec(),
        }],
        outputs: vec![TxOutput { value: 50, script_key: Hash256([0xAA; 32]) }],
        lock_time: 0,
    }
}

fn next_block(parent: &StoredHeader, tag: u64) -> Block {
    let txs = vec![coinbase(tag)];
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

fn spv_chain_with_blocks(n: u64) -> Arc<Mutex<Chain>> {
    let mut chain = Chain::new_spv(
        Box::new(MemoryBlockStore::new()),
        NetworkParams::regtest(),
        EventBus::new(),
    )
    .unwrap();
    let mut parent = chain.tip().unwrap();
    for i in 1..=n {
        let block = next_block(&parent, i);
        chain.accept_header(block.header.clone()).unwrap();
        parent = chain.tip().unwrap();
    }
    Arc::new(Mutex::new(chain))
}

fn full_chain_with_blocks(n: u64) -> Arc<Mutex<Chain>> {
    let mut chain = Chain::new_full(
        Box::new(MemoryBlockStore::new()),
        NetworkParams::regtest(),
        EventBus::new(),
    )
    .unwrap();
    let mut parent = chain.tip().unwrap();
    for i in 1..=n {
        let block = next_block(&parent, i);
        chain.accept_block(block).unwrap();
        parent = chain.tip().unwrap();
    }
    Arc::new(Mutex::new(chain))
}

fn listening_config() -> PeerGroupConfig {
    PeerGroupConfig {
        listen_addr: Some("127.0.0.1:0".parse().unwrap()),
        request_timeout: Duration::from_secs(5),
        ..PeerGroupConfig::default()
    }
}

// ----------------------------------------------------------------------
// wait_for_peers
// ----------------------------------------------------------------------

#[tokio::test]
async fn wait_for_peers_times_out_at_or_after_deadline() {
    init_tracing();
    let chain = spv_chain_with_blocks(0);
    let group = PeerGroup::new(
        NetworkParams::regtest(),
        PeerGroupConfig::default(),
        chain,
    );
    group.start().await.unwrap();

    let deadline = Duration::from_secs(1);
    let started = Instant::now();
    let result = group.wait_for_peers(1, deadline).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(NetError::Timeout)));
    assert!(elapsed >= deadline, "resolved early: {elapsed:?}");
    group.stop();
}

// ----------------------------------------------------------------------
// Two-node synchronization
// ----------------------------------------------------------------------

#[tokio::test]
async fn spv_node_syncs_headers_from_serving_node() {
    init_tracing();
    let chain_a = spv_chain_with_blocks(15);
    let group_a = PeerGroup::new(
        NetworkParams::regtest(),
        listening_config(),
        Arc::clone(&chain_a),
    );
    group_a.start().await.unwrap();
    let addr_a = group_a.listen_addr().unwrap();

    let chain_b = spv_chain_with_blocks(0);
    let group_b = PeerGroup::new(
        NetworkParams::regtest(),
        PeerGroupConfig::default(),
        Arc::clone(&chain_b),
    );
    group_b.add_address(addr_a);
    group_b.start().await.unwrap();

    group_b
        .wait_for_peers(1, Duration::from_secs(5))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), group_b.sync())
        .await
        .expect("sync did not finish")
        .unwrap();

    let tip_a = chain_a.lock().tip().unwrap();
    let tip_b = chain_b.lock().tip().unwrap();
    assert_eq!(tip_b.height, 15);
    assert_eq!(tip_b.hash(), tip_a.hash());

    group_b.stop();
    group_a.stop();
}

#[tokio::test]
async fn full_node_syncs_bodies_from_serving_node() {
    init_tracing();
    let chain_a = full_chain_with_blocks(10);
    let group_a = PeerGroup::new(
        NetworkParams::regtest(),
        listening_config(),
        Arc::clone(&chain_a),
    );
    group_a.start().await.unwrap();
    let addr_a = group_a.listen_addr().unwrap();

    let chain_b = full_chain_with_blocks(0);
    let group_b = PeerGroup::new(
        NetworkParams::regtest(),
        PeerGroupConfig::default(),
        Arc::clone(&chain_b),
    );
    group_b.add_address(addr_a);
    group_b.start().await.unwrap();

    group_b
        .wait_for_peers(1, Duration::from_secs(5))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), group_b.sync())
        .await
        .expect("sync did not finish")
        .unwrap();

    let tip_a = chain_a.lock().tip().unwrap();
    let tip_b = chain_b.lock().tip().unwrap();
    assert_eq!(tip_b.height, 10);
    assert_eq!(tip_b.hash(), tip_a.hash());

    // Bodies were stored, not just headers.
    let body = chain_b.lock().get_block(&tip_b.hash()).unwrap();
    assert!(body.is_some());

    group_b.stop();
    group_a.stop();
}

// ----------------------------------------------------------------------
// Fetch requeueing across peer failure
// ----------------------------------------------------------------------

/// A minimal remote that handshakes and then handles `GetData` with the
/// given behavior: `Some(block)` serves it, `None` drops the connection.
async fn fake_remote(serve: Option<Block>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let codec = Codec::new(NetworkParams::regtest().magic);

        // Symmetric version/verack exchange.
        let msg = codec.read_message(&mut stream).await.unwrap();
        assert!(matches!(msg, Message::Version { .. }));
        codec
            .write_message(
                &mut stream,
                &Message::Version {
                    protocol_version: 1,
                    best_height: 0,
                    nonce: rand::random(),
                    user_agent: "/fake/".into(),
                },
            )
            .await
            .unwrap();
        loop {
            match codec.read_message(&mut stream).await {
                Ok(Message::Verack) => break,
                Ok(_) => continue,
                Err(_) => return,
            }
        }
        codec.write_message(&mut stream, &Message::Verack).await.unwrap();

        loop {
            match codec.read_message(&mut stream).await {
                Ok(Message::GetData(_)) => match &serve {
                    Some(block) => {
                        codec
                            .write_message(&mut stream, &Message::Block(block.clone()))
                            .await
                            .unwrap();
                    }
                    // Disconnect instead of answering.
                    None => return,
                },
                Ok(_) => continue,
                Err(_) => return,
            }
        }
    });
    addr
}

#[tokio::test]
async fn block_fetch_requeues_to_second_peer_on_disconnect() {
    init_tracing();
    let params = NetworkParams::regtest();
    let genesis = StoredHeader::genesis(params.genesis_block().header.clone());
    let block = next_block(&genesis, 1);

    // Peer 1 drops the connection on request; peer 2 has the block.
    let addr_flaky = fake_remote(None).await;
    let addr_good = fake_remote(Some(block.clone())).await;

    let chain = spv_chain_with_blocks(0);
    let group = PeerGroup::new(params, PeerGroupConfig::default(), chain);
    group.add_address(addr_flaky);
    group.add_address(addr_good);
    group.start().await.unwrap();
    group
        .wait_for_peers(2, Duration::from_secs(5))
        .await
        .unwrap();

    let got = tokio::time::timeout(
        Duration::from_secs(10),
        group.fetch_block(block.hash()),
    )
    .await
    .expect("fetch hung")
    .unwrap();
    assert_eq!(got, block);

    group.stop();
}

#[tokio::test]
async fn fetch_fails_when_no_peer_has_the_object() {
    init_tracing();
    let addr = fake_remote(None).await;

    let chain = spv_chain_with_blocks(0);
    let group = PeerGroup::new(
        NetworkParams::regtest(),
        PeerGroupConfig::default(),
        chain,
    );
    group.add_address(addr);
    group.start().await.unwrap();
    group
        .wait_for_peers(1, Duration::from_secs(5))
        .await
        .unwrap();

    let err = tokio::time::timeout(
        Duration::from_secs(10),
        group.fetch_block(Hash256([0x55; 32])),
    )
    .await
    .expect("fetch hung")
    .unwrap_err();
    assert!(matches!(err, NetError::PeerDisconnected(_)));

    group.stop();
}
