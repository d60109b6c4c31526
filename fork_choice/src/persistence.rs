/// JSON snapshots of the full header DAG.
///
/// A snapshot is captured under the store lock and written outside it. The
/// file is replaced atomically: write a sibling temp file, fsync it, rename it
/// over the old snapshot, then fsync the directory. Readers ignore unknown
/// fields and missing optional fields take defaults, so newer writers stay
/// loadable by older readers and vice versa.
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chain::ChainParams;
use containers::{block_work, BlockHeader, Bytes32, H160, U256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::store::{anchor_for_child_of, HeaderRecord, HeaderStatus, Store};

pub const SNAPSHOT_VERSION: u32 = 1;
pub const SNAPSHOT_FILE_NAME: &str = "headers.json";

fn validated_status() -> HeaderStatus {
    HeaderStatus::ValidatedPoW
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub hash: Bytes32,
    pub prev_hash: Bytes32,
    pub height: u64,
    pub chain_work: U256,
    pub version: i32,
    pub miner_address: H160,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub randomx_hash: Bytes32,
    #[serde(default)]
    pub pow_hash: Bytes32,
    #[serde(default = "validated_status")]
    pub status: HeaderStatus,
    #[serde(default)]
    pub sequence: u64,
}

impl SnapshotEntry {
    fn from_record(record: &HeaderRecord) -> Self {
        let header = &record.header;
        Self {
            hash: record.hash,
            prev_hash: header.prev_hash,
            height: record.height,
            chain_work: record.chain_work,
            version: header.version,
            miner_address: header.miner_address,
            time: header.time,
            bits: header.bits,
            nonce: header.nonce,
            randomx_hash: header.randomx_hash,
            pow_hash: record.pow_hash,
            status: record.status,
            sequence: record.sequence,
        }
    }

    fn header(&self) -> BlockHeader {
        BlockHeader {
            version: self.version,
            prev_hash: self.prev_hash,
            miner_address: self.miner_address,
            time: self.time,
            bits: self.bits,
            nonce: self.nonce,
            randomx_hash: self.randomx_hash,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub header_count: u64,
    pub genesis_hash: Bytes32,
    pub active_tip: Bytes32,
    #[serde(default)]
    pub revision: u64,
    pub headers: Vec<SnapshotEntry>,
}

impl Snapshot {
    /// Point-in-time copy of the DAG. Call with the store lock held.
    pub fn capture(store: &Store) -> Self {
        let mut headers: Vec<SnapshotEntry> =
            store.records.values().map(SnapshotEntry::from_record).collect();
        headers.sort_by_key(|entry| (entry.height, entry.sequence));

        Self {
            version: SNAPSHOT_VERSION,
            header_count: headers.len() as u64,
            genesis_hash: store.genesis_hash,
            active_tip: store.active_tip,
            revision: store.revision,
            headers,
        }
    }

    /// Rebuilds a store, re-deriving and checking everything derivable.
    pub fn restore(&self, params: &ChainParams) -> Result<Store, PersistenceError> {
        if self.version == 0 {
            return Err(PersistenceError::UnsupportedVersion(self.version));
        }
        let expected = params.genesis_hash();
        if self.genesis_hash != expected {
            return Err(PersistenceError::GenesisMismatch {
                expected,
                found: self.genesis_hash,
            });
        }
        if self.header_count != self.headers.len() as u64 {
            return Err(inconsistent(format!(
                "header count {} but {} entries",
                self.header_count,
                self.headers.len()
            )));
        }

        let mut entries: Vec<&SnapshotEntry> = self.headers.iter().collect();
        entries.sort_by_key(|entry| (entry.height, entry.sequence));

        let genesis_entry = entries
            .first()
            .filter(|entry| entry.hash == expected && entry.height == 0)
            .ok_or_else(|| inconsistent("genesis entry missing".into()))?;

        let mut store = crate::store::get_header_store(params, genesis_entry.pow_hash);
        store.records.clear();
        store.tips.clear();
        store.active_chain.clear();

        let mut parents: HashSet<Bytes32> = HashSet::new();
        let mut max_sequence = 0;

        for entry in entries {
            let header = entry.header();
            if header.hash() != entry.hash {
                return Err(inconsistent(format!("entry {} hash mismatch", entry.hash)));
            }
            if entry.status != HeaderStatus::ValidatedPoW {
                return Err(inconsistent(format!(
                    "entry {} has status {:?}",
                    entry.hash, entry.status
                )));
            }
            if store.records.contains_key(&entry.hash) {
                return Err(inconsistent(format!("entry {} duplicated", entry.hash)));
            }

            let work = block_work(header.bits);
            let (height, chain_work, parent_anchor) = if entry.hash == expected {
                (0, work, None)
            } else {
                let parent = store.records.get(&entry.prev_hash).ok_or_else(|| {
                    inconsistent(format!("entry {} has no parent", entry.hash))
                })?;
                (parent.height + 1, parent.chain_work + work, parent.anchor)
            };
            if height != entry.height || chain_work != entry.chain_work {
                return Err(inconsistent(format!(
                    "entry {} height or work disagrees with its ancestry",
                    entry.hash
                )));
            }

            if height > 0 {
                parents.insert(entry.prev_hash);
            }
            max_sequence = max_sequence.max(entry.sequence);
            store.records.insert(
                entry.hash,
                HeaderRecord {
                    hash: entry.hash,
                    header,
                    height,
                    chain_work,
                    pow_hash: entry.pow_hash,
                    status: entry.status,
                    sequence: entry.sequence,
                    anchor: anchor_for_child_of(params.asert_anchor_height, parent_anchor, &header, height),
                },
            );
        }

        store.tips = store
            .records
            .keys()
            .filter(|hash| !parents.contains(*hash))
            .copied()
            .collect();

        if !store.tips.contains(&self.active_tip) {
            return Err(inconsistent(format!(
                "active tip {} is not a leaf of the DAG",
                self.active_tip
            )));
        }

        let mut chain = Vec::new();
        let mut cursor = store.records.get(&self.active_tip);
        while let Some(record) = cursor {
            chain.push(record.hash);
            cursor = if record.height == 0 {
                None
            } else {
                store.records.get(&record.prev_hash())
            };
        }
        chain.reverse();

        store.active_tip = self.active_tip;
        store.active_chain = chain;
        store.next_sequence = max_sequence + 1;
        store.revision = self.revision;

        store
            .check_invariants()
            .map_err(|err| inconsistent(err.to_string()))?;
        Ok(store)
    }
}

fn inconsistent(message: String) -> PersistenceError {
    PersistenceError::Inconsistent(message)
}

/// Durably replaces `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, PersistenceError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
    info!(
        path = %path.display(),
        headers = snapshot.header_count,
        active_tip = %snapshot.active_tip,
        "loaded header snapshot"
    );
    Ok(Some(snapshot))
}

/// Serializes snapshot writes and skips revisions already on disk.
#[derive(Debug)]
pub struct SnapshotWriter {
    path: PathBuf,
    written: Mutex<Option<u64>>,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: Mutex::new(None),
        }
    }

    /// Writer that treats `revision` as already persisted.
    pub fn resumed(path: impl Into<PathBuf>, revision: u64) -> Self {
        Self {
            path: path.into(),
            written: Mutex::new(Some(revision)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_current(&self, revision: u64) -> bool {
        self.written.lock().is_some_and(|written| written >= revision)
    }

    /// Returns whether anything was written. The recorded revision only
    /// advances after the write has durably completed.
    pub fn write(&self, snapshot: &Snapshot) -> Result<bool, PersistenceError> {
        let mut written = self.written.lock();
        if written.is_some_and(|done| done >= snapshot.revision) {
            return Ok(false);
        }

        let bytes = serde_json::to_vec(snapshot)?;
        write_atomic(&self.path, &bytes)?;
        *written = Some(snapshot.revision);

        debug!(
            path = %self.path.display(),
            revision = snapshot.revision,
            headers = snapshot.header_count,
            "header snapshot written"
        );
        Ok(true)
    }
}
