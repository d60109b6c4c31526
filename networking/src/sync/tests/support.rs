use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use chain::REGTEST_PARAMS;
use containers::{target_from_compact, BlockHeader, Bytes32, H160};
use fork_choice::{ChainState, ChainStateConfig};
use parking_lot::Mutex;
use validator::{meets_target, Clock, CommitmentHasher, HeaderValidator, MockableClock, PowHasher};

use crate::sync::{PeerManager, SyncConfig, SyncService};
use crate::types::{OutboundRequest, SyncAction};

pub const NOW: i64 = 1_296_700_000;

pub fn genesis() -> BlockHeader {
    REGTEST_PARAMS.genesis
}

pub fn clock() -> Arc<MockableClock> {
    Arc::new(MockableClock::with_time(NOW))
}

pub fn chain_with(clock: Arc<MockableClock>, depth: u64) -> Arc<ChainState> {
    let validator = HeaderValidator::new(Arc::new(REGTEST_PARAMS), clock);
    let config = ChainStateConfig {
        snapshot_path: None,
        suspicious_reorg_depth: Some(depth),
    };
    Arc::new(ChainState::open(validator, config).unwrap())
}

pub fn chain(clock: Arc<MockableClock>) -> Arc<ChainState> {
    chain_with(clock, REGTEST_PARAMS.suspicious_reorg_depth)
}

pub fn peer_manager(clock: Arc<MockableClock>) -> Mutex<PeerManager> {
    let clock: Arc<dyn Clock> = clock;
    Mutex::new(PeerManager::new(clock))
}

pub fn service(chain: Arc<ChainState>, config: SyncConfig) -> SyncService {
    let clock: Arc<dyn Clock> = chain.validator().clock().clone();
    SyncService::new(chain, PeerManager::new(clock), config)
}

pub fn addr(last_octet: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), 9590)
}

pub fn mine_child(parent: &BlockHeader, tag: u8) -> BlockHeader {
    let mut header = BlockHeader {
        version: 1,
        prev_hash: parent.hash(),
        miner_address: H160::repeat_byte(tag),
        time: parent.time + 120,
        bits: REGTEST_PARAMS.genesis.bits,
        nonce: 0,
        randomx_hash: Bytes32::from([tag; 32]),
    };
    let target = target_from_compact(header.bits).target;
    while !meets_target(&CommitmentHasher.pow_hash(&header), &target) {
        header.nonce += 1;
    }
    header
}

pub fn unmined_child(parent: &BlockHeader, tag: u8) -> BlockHeader {
    let mut header = mine_child(parent, tag);
    let target = target_from_compact(header.bits).target;
    while meets_target(&CommitmentHasher.pow_hash(&header), &target) {
        header.nonce += 1;
    }
    header
}

pub fn build_chain(parent: &BlockHeader, len: usize, tag: u8) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(len);
    let mut tip = *parent;
    for _ in 0..len {
        tip = mine_child(&tip, tag);
        headers.push(tip);
    }
    headers
}

pub fn populate(chain: &ChainState, headers: &[BlockHeader]) {
    for header in headers {
        chain.add_header(*header, None).unwrap();
    }
}

/// The locator of the single getheaders request in `actions`.
pub fn requested_locator(actions: &[SyncAction]) -> Option<Vec<Bytes32>> {
    actions.iter().find_map(|action| match action {
        SyncAction::Send(OutboundRequest::GetHeaders { locator, .. }) => Some(locator.clone()),
        _ => None,
    })
}
