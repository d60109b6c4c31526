use std::collections::{HashMap, HashSet, VecDeque};

use chain::ChainParams;
use containers::{block_work, BlockHeader, Bytes32, U256};
use serde::{Deserialize, Serialize};
use validator::AsertAnchor;

use crate::error::ChainError;
use crate::orphans::OrphanPool;

/// Cap on remembered invalid hashes.
pub const MAX_FAILED_HEADERS: usize = 50_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderStatus {
    Unknown,
    ValidatedPoW,
    Invalid,
}

/// A header accepted into the store. Immutable once inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderRecord {
    pub hash: Bytes32,
    pub header: BlockHeader,
    pub height: u64,
    pub chain_work: U256,
    pub pow_hash: Bytes32,
    pub status: HeaderStatus,
    /// First-seen order; lower wins ties on equal work.
    pub sequence: u64,
    /// Retarget anchor that applies to this header's children.
    pub anchor: Option<AsertAnchor>,
}

impl HeaderRecord {
    pub fn prev_hash(&self) -> Bytes32 {
        self.header.prev_hash
    }

    pub fn time(&self) -> u32 {
        self.header.time
    }
}

/// A header with no known child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainTip {
    pub hash: Bytes32,
    pub height: u64,
    pub chain_work: U256,
    pub active: bool,
}

/// Hashes that failed validation, bounded with oldest-first eviction.
#[derive(Debug, Clone, Default)]
pub struct FailedHeaders {
    hashes: HashSet<Bytes32>,
    order: VecDeque<Bytes32>,
}

impl FailedHeaders {
    pub fn insert(&mut self, hash: Bytes32) {
        if !self.hashes.insert(hash) {
            return;
        }
        self.order.push_back(hash);
        while self.order.len() > MAX_FAILED_HEADERS {
            if let Some(oldest) = self.order.pop_front() {
                self.hashes.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, hash: &Bytes32) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// The header DAG with its tip set and active chain.
#[derive(Debug, Clone)]
pub struct Store {
    pub genesis_hash: Bytes32,
    pub asert_anchor_height: u64,
    /// Reorgs disconnecting at least this many blocks are refused; 0 disables.
    pub suspicious_reorg_depth: u64,

    pub records: HashMap<Bytes32, HeaderRecord>,
    pub tips: HashSet<Bytes32>,
    pub active_tip: Bytes32,
    /// Active chain hashes indexed by height.
    pub active_chain: Vec<Bytes32>,

    pub orphans: OrphanPool,
    pub failed: FailedHeaders,
    /// Tips already refused by the reorg guard, with the depth limit in force
    /// when they were refused.
    pub refused_tips: HashMap<Bytes32, u64>,

    pub next_sequence: u64,
    /// Bumped on every tip-set change; drives snapshot scheduling.
    pub revision: u64,
}

/// Initialize a store holding only the genesis header.
pub fn get_header_store(params: &ChainParams, genesis_pow_hash: Bytes32) -> Store {
    let genesis = params.genesis;
    let hash = genesis.hash();
    let record = HeaderRecord {
        hash,
        header: genesis,
        height: 0,
        chain_work: block_work(genesis.bits),
        pow_hash: genesis_pow_hash,
        status: HeaderStatus::ValidatedPoW,
        sequence: 0,
        anchor: anchor_for_child_of(params.asert_anchor_height, None, &genesis, 0),
    };

    Store {
        genesis_hash: hash,
        asert_anchor_height: params.asert_anchor_height,
        suspicious_reorg_depth: params.suspicious_reorg_depth,
        records: [(hash, record)].into(),
        tips: [hash].into(),
        active_tip: hash,
        active_chain: vec![hash],
        orphans: OrphanPool::new(),
        failed: FailedHeaders::default(),
        refused_tips: HashMap::new(),
        next_sequence: 1,
        revision: 0,
    }
}

/// Anchor inherited by the children of a header at `height`.
pub fn anchor_for_child_of(
    anchor_height: u64,
    parent_anchor: Option<AsertAnchor>,
    header: &BlockHeader,
    height: u64,
) -> Option<AsertAnchor> {
    if height < anchor_height {
        None
    } else if height == anchor_height {
        Some(AsertAnchor {
            height,
            bits: header.bits,
            time: header.time,
        })
    } else {
        parent_anchor
    }
}

impl Store {
    pub fn get(&self, hash: &Bytes32) -> Option<&HeaderRecord> {
        self.records.get(hash)
    }

    pub fn contains(&self, hash: &Bytes32) -> bool {
        self.records.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn active_record(&self) -> Result<&HeaderRecord, ChainError> {
        self.records.get(&self.active_tip).ok_or_else(|| {
            ChainError::Corrupted(format!("active tip {} has no record", self.active_tip))
        })
    }

    pub fn active_height(&self) -> u64 {
        self.active_chain.len().saturating_sub(1) as u64
    }

    pub fn is_on_active_chain(&self, record: &HeaderRecord) -> bool {
        self.active_chain
            .get(record.height as usize)
            .is_some_and(|hash| *hash == record.hash)
    }

    pub fn chain_tips(&self) -> Vec<ChainTip> {
        let mut tips: Vec<ChainTip> = self
            .tips
            .iter()
            .filter_map(|hash| self.records.get(hash))
            .map(|record| ChainTip {
                hash: record.hash,
                height: record.height,
                chain_work: record.chain_work,
                active: record.hash == self.active_tip,
            })
            .collect();
        tips.sort_by(|a, b| b.chain_work.cmp(&a.chain_work).then(a.hash.cmp(&b.hash)));
        tips
    }

    /// Structural checks run after every mutation.
    pub fn check_invariants(&self) -> Result<(), ChainError> {
        let active = self.active_record()?;
        if !self.tips.contains(&self.active_tip) {
            return Err(ChainError::Corrupted(format!(
                "active tip {} missing from tip set",
                self.active_tip
            )));
        }
        if self.active_chain.last() != Some(&self.active_tip)
            || self.active_chain.len() as u64 != active.height + 1
        {
            return Err(ChainError::Corrupted(format!(
                "active chain index out of step with tip {} at height {}",
                self.active_tip, active.height
            )));
        }
        if self.active_chain.first() != Some(&self.genesis_hash) {
            return Err(ChainError::Corrupted("active chain does not start at genesis".into()));
        }
        Ok(())
    }

    /// Full audit of the DAG. Linear in the number of records.
    pub fn audit(&self) -> Result<(), ChainError> {
        self.check_invariants()?;

        let mut parents: HashSet<Bytes32> = HashSet::new();
        for record in self.records.values() {
            if record.hash == self.genesis_hash {
                continue;
            }
            let parent = self.records.get(&record.prev_hash()).ok_or_else(|| {
                ChainError::Corrupted(format!("record {} has no parent", record.hash))
            })?;
            if record.height != parent.height + 1 || record.chain_work <= parent.chain_work {
                return Err(ChainError::Corrupted(format!(
                    "record {} does not extend its parent",
                    record.hash
                )));
            }
            parents.insert(parent.hash);
        }

        let leaves: HashSet<Bytes32> = self
            .records
            .keys()
            .filter(|hash| !parents.contains(*hash))
            .copied()
            .collect();
        if leaves != self.tips {
            return Err(ChainError::Corrupted("tip set differs from DAG leaves".into()));
        }

        for (height, hash) in self.active_chain.iter().enumerate() {
            match self.records.get(hash) {
                Some(record) if record.height == height as u64 => {}
                _ => {
                    return Err(ChainError::Corrupted(format!(
                        "active chain entry {height} is not a record at that height"
                    )))
                }
            }
        }
        Ok(())
    }
}
