use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chain::REGTEST_PARAMS;
use containers::{target_from_compact, BlockHeader, Bytes32, H160};
use fork_choice::{ChainState, ChainStateConfig};
use networking::network::{codec::encode_frame, Message, NetworkConfig, NetworkService};
use networking::sync::{PeerManager, SyncConfig, SyncService};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use validator::{meets_target, Clock, CommitmentHasher, HeaderValidator, MockableClock, PowHasher};

const NOW: i64 = 1_296_700_000;

fn mine_child(parent: &BlockHeader) -> BlockHeader {
    let mut header = BlockHeader {
        version: 1,
        prev_hash: parent.hash(),
        miner_address: H160::repeat_byte(1),
        time: parent.time + 120,
        bits: REGTEST_PARAMS.genesis.bits,
        nonce: 0,
        randomx_hash: Bytes32::from([1; 32]),
    };
    let target = target_from_compact(header.bits).target;
    while !meets_target(&CommitmentHasher.pow_hash(&header), &target) {
        header.nonce += 1;
    }
    header
}

fn node(clock: &Arc<MockableClock>, headers: &[BlockHeader]) -> SyncService {
    let validator = HeaderValidator::new(Arc::new(REGTEST_PARAMS), clock.clone());
    let chain = ChainState::open(validator, ChainStateConfig::default()).unwrap();
    for header in headers {
        chain.add_header(*header, None).unwrap();
    }
    let clock: Arc<dyn Clock> = clock.clone();
    SyncService::new(Arc::new(chain), PeerManager::new(clock), SyncConfig::default())
}

fn loopback() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
}

fn network_config(listen: bool, static_peers: Vec<SocketAddr>) -> NetworkConfig {
    NetworkConfig {
        listen,
        listen_addr: loopback(),
        static_peers,
        magic: REGTEST_PARAMS.magic,
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached in time");
}

fn height(service: &SyncService) -> u64 {
    service.chain().best_tip().unwrap().height
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn static_peer_syncs_and_announces_over_tcp() {
    let clock = Arc::new(MockableClock::with_time(NOW));
    let mut source = vec![mine_child(&REGTEST_PARAMS.genesis)];
    while source.len() < 20 {
        let next = mine_child(&source[source.len() - 1]);
        source.push(next);
    }
    let seeded = node(&clock, &source);
    let fresh = node(&clock, &[]);

    let listening = NetworkService::new(network_config(true, Vec::new()), fresh.clone());
    let listener = listening.bind().await.unwrap().unwrap();
    let address = listener.local_addr().unwrap();
    let listening = tokio::spawn(listening.run(Some(listener)));

    let dialing = NetworkService::new(network_config(false, vec![address]), seeded.clone());
    let dialing = tokio::spawn(dialing.run(None));

    wait_for(|| height(&fresh) == 20).await;
    assert_eq!(fresh.chain().best_tip().unwrap().hash, source[19].hash());
    assert_eq!(seeded.peer_count(), 1);
    assert!(seeded.peers()[0].permissions.manual);

    // A new tip on one side is pushed to the other.
    let next = mine_child(&source[19]);
    seeded.chain().add_header(next, None).unwrap();
    wait_for(|| height(&fresh) == 21).await;
    assert!(fresh.peers().iter().all(|peer| peer.score == 0));

    listening.abort();
    dialing.abort();
}

#[tokio::test]
async fn foreign_network_connection_is_dropped() {
    let clock = Arc::new(MockableClock::with_time(NOW));
    let fresh = node(&clock, &[]);
    let service = NetworkService::new(network_config(true, Vec::new()), fresh.clone());
    let listener = service.bind().await.unwrap().unwrap();
    let address = listener.local_addr().unwrap();
    let running = tokio::spawn(service.run(Some(listener)));

    let mut stream = TcpStream::connect(address).await.unwrap();
    let frame = encode_frame([0xcb, 0xc8, 0xa1, 0x00], &Message::Headers(Vec::new())).unwrap();
    stream.write_all(&frame).await.unwrap();

    let mut received = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received)).await;
    assert!(closed.is_ok(), "connection was not closed");
    wait_for(|| fresh.peer_count() == 0).await;

    running.abort();
}
