use containers::{BlockHeader, Bytes32, H160, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of ancestor timestamps whose median bounds a new header's time.
pub const MEDIAN_TIME_SPAN: usize = 11;
/// Allowed clock drift into the future, in seconds.
pub const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;
/// Reorgs disconnecting this many active blocks or more are refused.
pub const DEFAULT_SUSPICIOUS_REORG_DEPTH: u64 = 100;
/// Low-work headers are tolerated within this many blocks of work below the tip.
pub const ANTI_DOS_WORK_BUFFER_BLOCKS: u64 = 144;
/// A tip older than this keeps the node in initial block download.
pub const MAX_TIP_AGE: i64 = 12 * 60 * 60;
pub const ASERT_ANCHOR_HEIGHT: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
    Regtest,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Main => "main",
            Network::Test => "test",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" | "mainnet" => Ok(Network::Main),
            "test" | "testnet" => Ok(Network::Test),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network {other:?}")),
        }
    }
}

/// Consensus and transport parameters for one network.
#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub magic: [u8; 4],
    pub default_port: u16,
    pub pow_limit: U256,
    pub target_spacing: i64,
    pub asert_half_life: i64,
    pub asert_anchor_height: u64,
    pub pow_no_retargeting: bool,
    pub minimum_chain_work: U256,
    pub anti_dos_work_buffer_blocks: u64,
    pub suspicious_reorg_depth: u64,
    pub max_tip_age: i64,
    pub genesis: BlockHeader,
}

const fn genesis_header(time: u32, nonce: u32, bits: u32) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_hash: Bytes32(H256([0; 32])),
        miner_address: H160([0; 20]),
        time,
        bits,
        nonce,
        randomx_hash: Bytes32(H256([0; 32])),
    }
}

pub const MAIN_PARAMS: ChainParams = ChainParams {
    network: Network::Main,
    magic: [0xcb, 0xc8, 0xa1, 0x00],
    default_port: 9590,
    pow_limit: U256([0, 0, 0, 0x000f_ffff_0000_0000]),
    target_spacing: 2 * 60,
    asert_half_life: 2 * 24 * 60 * 60,
    asert_anchor_height: ASERT_ANCHOR_HEIGHT,
    pow_no_retargeting: false,
    minimum_chain_work: U256([0, 0, 0, 0]),
    anti_dos_work_buffer_blocks: ANTI_DOS_WORK_BUFFER_BLOCKS,
    suspicious_reorg_depth: DEFAULT_SUSPICIOUS_REORG_DEPTH,
    max_tip_age: MAX_TIP_AGE,
    genesis: genesis_header(1_760_292_878, 633_285, 0x1e27_0fd8),
};

pub const TEST_PARAMS: ChainParams = ChainParams {
    network: Network::Test,
    magic: [0xcb, 0xc8, 0xa1, 0xd1],
    default_port: 19333,
    pow_limit: U256([0, 0, 0, 0x007f_ffff_0000_0000]),
    target_spacing: 5,
    asert_half_life: 60,
    asert_anchor_height: ASERT_ANCHOR_HEIGHT,
    pow_no_retargeting: false,
    minimum_chain_work: U256([0, 0, 0, 0]),
    anti_dos_work_buffer_blocks: ANTI_DOS_WORK_BUFFER_BLOCKS,
    suspicious_reorg_depth: DEFAULT_SUSPICIOUS_REORG_DEPTH,
    max_tip_age: MAX_TIP_AGE,
    genesis: genesis_header(1_760_549_555, 253, 0x1f7f_ffff),
};

pub const REGTEST_PARAMS: ChainParams = ChainParams {
    network: Network::Regtest,
    magic: [0xfa, 0xbf, 0xb5, 0xda],
    default_port: 29333,
    pow_limit: U256([u64::MAX, u64::MAX, u64::MAX, 0x7fff_ffff_ffff_ffff]),
    target_spacing: 2 * 60,
    asert_half_life: 2 * 24 * 60 * 60,
    asert_anchor_height: ASERT_ANCHOR_HEIGHT,
    pow_no_retargeting: true,
    minimum_chain_work: U256([0, 0, 0, 0]),
    anti_dos_work_buffer_blocks: ANTI_DOS_WORK_BUFFER_BLOCKS,
    suspicious_reorg_depth: DEFAULT_SUSPICIOUS_REORG_DEPTH,
    max_tip_age: MAX_TIP_AGE,
    genesis: genesis_header(1_296_688_602, 2, 0x207f_ffff),
};

impl ChainParams {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => MAIN_PARAMS,
            Network::Test => TEST_PARAMS,
            Network::Regtest => REGTEST_PARAMS,
        }
    }

    pub fn genesis_hash(&self) -> Bytes32 {
        self.genesis.hash()
    }

    pub fn magic_u32(&self) -> u32 {
        u32::from_le_bytes(self.magic)
    }
}
