use ethereum_types::{H160, H256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::Bytes32;

/// Serialized header length: 4 + 32 + 20 + 4 + 4 + 4 + 32.
pub const HEADER_SIZE: usize = 100;

const PREV_OFFSET: usize = 4;
const MINER_OFFSET: usize = 36;
const TIME_OFFSET: usize = 56;
const BITS_OFFSET: usize = 60;
const NONCE_OFFSET: usize = 64;
const RANDOMX_OFFSET: usize = 68;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("header requires {HEADER_SIZE} bytes, got {0}")]
    TooShort(usize),
}

/// Block header as it travels on the wire. There is no body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: Bytes32,
    pub miner_address: H160,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub randomx_hash: Bytes32,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            version: 1,
            prev_hash: Bytes32::zero(),
            miner_address: H160::zero(),
            time: 0,
            bits: 0,
            nonce: 0,
            randomx_hash: Bytes32::zero(),
        }
    }
}

impl BlockHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..PREV_OFFSET].copy_from_slice(&self.version.to_le_bytes());
        out[PREV_OFFSET..MINER_OFFSET].copy_from_slice(self.prev_hash.as_bytes());
        out[MINER_OFFSET..TIME_OFFSET].copy_from_slice(self.miner_address.as_bytes());
        out[TIME_OFFSET..BITS_OFFSET].copy_from_slice(&self.time.to_le_bytes());
        out[BITS_OFFSET..NONCE_OFFSET].copy_from_slice(&self.bits.to_le_bytes());
        out[NONCE_OFFSET..RANDOMX_OFFSET].copy_from_slice(&self.nonce.to_le_bytes());
        out[RANDOMX_OFFSET..].copy_from_slice(self.randomx_hash.as_bytes());
        out
    }

    /// Decodes the first `HEADER_SIZE` bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::TooShort(bytes.len()));
        }

        let u32_at = |offset: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[offset..offset + 4]);
            u32::from_le_bytes(word)
        };

        Ok(Self {
            version: u32_at(0) as i32,
            prev_hash: Bytes32(H256::from_slice(&bytes[PREV_OFFSET..MINER_OFFSET])),
            miner_address: H160::from_slice(&bytes[MINER_OFFSET..TIME_OFFSET]),
            time: u32_at(TIME_OFFSET),
            bits: u32_at(BITS_OFFSET),
            nonce: u32_at(NONCE_OFFSET),
            randomx_hash: Bytes32(H256::from_slice(&bytes[RANDOMX_OFFSET..HEADER_SIZE])),
        })
    }

    /// Identifying hash: double SHA-256 over the serialized header.
    pub fn hash(&self) -> Bytes32 {
        Bytes32::from(sha256d(&self.to_bytes()))
    }

    pub fn is_genesis_shaped(&self) -> bool {
        self.prev_hash.is_zero()
    }
}

pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}
