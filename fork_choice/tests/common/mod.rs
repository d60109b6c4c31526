//! Shared helpers for the header store tests: a regtest chain state with a
//! pinned clock, and a tiny miner for the regtest target.
#![allow(dead_code)]

use std::sync::Arc;

use chain::REGTEST_PARAMS;
use containers::{target_from_compact, BlockHeader, Bytes32, H160};
use fork_choice::{AddOutcome, ChainState, ChainStateConfig};
use validator::{meets_target, CommitmentHasher, HeaderValidator, MockableClock, PowHasher};

/// Mocked "now": a little over three hours after the regtest genesis.
pub const NOW: i64 = 1_296_700_000;

pub const SPACING: u32 = 120;

pub fn genesis() -> BlockHeader {
    REGTEST_PARAMS.genesis
}

pub fn regtest_validator() -> (HeaderValidator, Arc<MockableClock>) {
    let clock = Arc::new(MockableClock::with_time(NOW));
    let validator = HeaderValidator::new(Arc::new(REGTEST_PARAMS), clock.clone());
    (validator, clock)
}

pub fn regtest_state() -> (ChainState, Arc<MockableClock>) {
    let (validator, clock) = regtest_validator();
    (ChainState::new(validator), clock)
}

pub fn regtest_state_with_depth(depth: u64) -> ChainState {
    let (validator, _) = regtest_validator();
    let config = ChainStateConfig {
        snapshot_path: None,
        suspicious_reorg_depth: Some(depth),
    };
    ChainState::open(validator, config).unwrap()
}

/// Child of `parent` with a valid commitment. `tag` separates sibling forks.
pub fn mine_child(parent: &BlockHeader, tag: u8) -> BlockHeader {
    let mut header = BlockHeader {
        version: 1,
        prev_hash: parent.hash(),
        miner_address: H160::repeat_byte(tag),
        time: parent.time + SPACING,
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

/// Child of `parent` whose commitment misses the target.
pub fn unmined_child(parent: &BlockHeader, tag: u8) -> BlockHeader {
    let mut header = mine_child(parent, tag);
    let target = target_from_compact(header.bits).target;
    while meets_target(&CommitmentHasher.pow_hash(&header), &target) {
        header.nonce += 1;
    }
    header
}

/// `len` consecutive headers on top of `parent`.
pub fn build_chain(parent: &BlockHeader, len: usize, tag: u8) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(len);
    let mut tip = *parent;
    for _ in 0..len {
        tip = mine_child(&tip, tag);
        headers.push(tip);
    }
    headers
}

pub fn add_all(state: &ChainState, headers: &[BlockHeader]) {
    for header in headers {
        let acceptance = state.add_header(*header, None).unwrap();
        assert_eq!(acceptance.outcome, AddOutcome::Accepted, "header {}", acceptance.hash);
    }
}
