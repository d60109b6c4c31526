use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chain::ChainParams;
use containers::{block_work, BlockHeader, Bytes32, PeerId, U256};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use validator::HeaderValidator;

use crate::error::ChainError;
use crate::handlers::{commit_header, prepare_header, record_failure, AddOutcome, Prepared, RejectReason};
use crate::helpers::{self, update_active_tip, Selection};
use crate::persistence::{load_snapshot, Snapshot, SnapshotWriter};
use crate::store::{get_header_store, ChainTip, HeaderRecord, Store};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications about active-chain changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    TipUpdated {
        hash: Bytes32,
        height: u64,
        reorg_depth: u64,
    },
    ReorgRefused {
        candidate: Bytes32,
        depth: u64,
        threshold: u64,
    },
}

#[derive(Clone, Debug, Default)]
pub struct ChainStateConfig {
    /// Where the header snapshot lives. `None` keeps everything in memory.
    pub snapshot_path: Option<PathBuf>,
    /// Overrides the network default when set.
    pub suspicious_reorg_depth: Option<u64>,
}

/// An orphan that got processed because one of its ancestors arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReleasedOrphan {
    pub hash: Bytes32,
    pub origin: Option<PeerId>,
    pub outcome: AddOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderAcceptance {
    pub hash: Bytes32,
    pub outcome: AddOutcome,
    pub released: Vec<ReleasedOrphan>,
}

/// The header store behind its single lock.
///
/// Proof-of-work validation runs with the lock released; the store is only
/// held to look up the parent and to commit the result.
pub struct ChainState {
    store: Mutex<Store>,
    validator: HeaderValidator,
    writer: Option<SnapshotWriter>,
    ibd_finished: AtomicBool,
    events: broadcast::Sender<ChainEvent>,
}

impl ChainState {
    /// In-memory state holding only genesis.
    pub fn new(validator: HeaderValidator) -> Self {
        let store = fresh_store(&validator);
        Self::from_parts(store, validator, None)
    }

    /// Loads the snapshot at `config.snapshot_path` if there is one.
    pub fn open(validator: HeaderValidator, config: ChainStateConfig) -> Result<Self, ChainError> {
        let (mut store, writer) = match config.snapshot_path {
            Some(path) => match load_snapshot(&path)? {
                Some(snapshot) => {
                    let store = snapshot.restore(validator.params())?;
                    (store, Some(SnapshotWriter::resumed(path, snapshot.revision)))
                }
                None => {
                    info!(path = %path.display(), "no header snapshot, starting from genesis");
                    (fresh_store(&validator), Some(SnapshotWriter::new(path)))
                }
            },
            None => (fresh_store(&validator), None),
        };

        if let Some(depth) = config.suspicious_reorg_depth {
            store.suspicious_reorg_depth = depth;
        }
        store.audit()?;

        Ok(Self::from_parts(store, validator, writer))
    }

    fn from_parts(store: Store, validator: HeaderValidator, writer: Option<SnapshotWriter>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: Mutex::new(store),
            validator,
            writer,
            ibd_finished: AtomicBool::new(false),
            events,
        }
    }

    pub fn params(&self) -> &ChainParams {
        self.validator.params()
    }

    pub fn validator(&self) -> &HeaderValidator {
        &self.validator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Adds one header, then any buffered descendants it unblocks.
    pub fn add_header(
        &self,
        header: BlockHeader,
        origin: Option<PeerId>,
    ) -> Result<HeaderAcceptance, ChainError> {
        let hash = header.hash();
        let mut queue = VecDeque::new();
        let outcome = self.insert_one(&header, hash, origin, &mut queue)?;

        let mut released = Vec::new();
        while let Some((child, child_origin)) = queue.pop_front() {
            let child_hash = child.hash();
            let child_outcome = self.insert_one(&child, child_hash, child_origin, &mut queue)?;
            released.push(ReleasedOrphan {
                hash: child_hash,
                origin: child_origin,
                outcome: child_outcome,
            });
        }

        Ok(HeaderAcceptance {
            hash,
            outcome,
            released,
        })
    }

    fn insert_one(
        &self,
        header: &BlockHeader,
        hash: Bytes32,
        origin: Option<PeerId>,
        queue: &mut VecDeque<(BlockHeader, Option<PeerId>)>,
    ) -> Result<AddOutcome, ChainError> {
        let now = self.validator.now();
        let prepared = prepare_header(&mut self.store.lock(), header, hash, origin, now);
        let context = match prepared {
            Prepared::Done(outcome) => return Ok(outcome),
            Prepared::Validate(context) => context,
        };

        match self.validator.validate(header, &context) {
            Ok(validated) => {
                let committed = commit_header(&mut self.store.lock(), header, &validated)?;
                self.publish(&committed.selection);
                queue.extend(
                    committed
                        .released
                        .into_iter()
                        .map(|orphan| (orphan.header, orphan.origin)),
                );
                Ok(committed.outcome)
            }
            Err(err) => {
                let reason = RejectReason::from(err);
                debug!(hash = %hash, reason = %reason, "header rejected");
                if !reason.is_transient() {
                    let discarded = record_failure(&mut self.store.lock(), hash);
                    if !discarded.is_empty() {
                        debug!(hash = %hash, count = discarded.len(), "discarded orphans of invalid header");
                    }
                }
                Ok(AddOutcome::Rejected(reason))
            }
        }
    }

    fn publish(&self, selection: &Selection) {
        for refused in &selection.refused {
            // No subscribers is fine.
            self.events
                .send(ChainEvent::ReorgRefused {
                    candidate: refused.candidate,
                    depth: refused.depth,
                    threshold: refused.threshold,
                })
                .ok();
        }
        if let Some(switch) = selection.switched {
            self.events
                .send(ChainEvent::TipUpdated {
                    hash: switch.tip,
                    height: switch.height,
                    reorg_depth: switch.reorg_depth,
                })
                .ok();
        }
    }

    pub fn best_tip(&self) -> Result<ChainTip, ChainError> {
        let store = self.store.lock();
        let record = store.active_record()?;
        Ok(ChainTip {
            hash: record.hash,
            height: record.height,
            chain_work: record.chain_work,
            active: true,
        })
    }

    /// Every tip, heaviest first.
    pub fn tips(&self) -> Vec<ChainTip> {
        self.store.lock().chain_tips()
    }

    /// Every tip other than the active one: abandoned branches, stale
    /// siblings and refused reorgs alike.
    pub fn fork_candidates(&self) -> Vec<ChainTip> {
        self.store
            .lock()
            .chain_tips()
            .into_iter()
            .filter(|tip| !tip.active)
            .collect()
    }

    /// Tips with more work than the active one that the reorg guard held back.
    pub fn refused_candidates(&self) -> Vec<ChainTip> {
        let store = self.store.lock();
        let Ok(active) = store.active_record() else {
            return Vec::new();
        };
        let active_work = active.chain_work;
        store
            .chain_tips()
            .into_iter()
            .filter(|tip| !tip.active && tip.chain_work > active_work)
            .collect()
    }

    pub fn contains(&self, hash: &Bytes32) -> bool {
        self.store.lock().contains(hash)
    }

    pub fn record(&self, hash: &Bytes32) -> Option<HeaderRecord> {
        self.store.lock().get(hash).cloned()
    }

    pub fn header_count(&self) -> usize {
        self.store.lock().len()
    }

    pub fn orphan_count(&self) -> usize {
        self.store.lock().orphans.len()
    }

    pub fn locator(&self) -> Result<Vec<Bytes32>, ChainError> {
        helpers::get_locator(&self.store.lock())
    }

    /// Locator rooted at a stored header, used to continue a batch.
    pub fn locator_from(&self, hash: &Bytes32) -> Option<Vec<Bytes32>> {
        let store = self.store.lock();
        let record = store.get(hash)?;
        Some(helpers::locator_from(&store, record))
    }

    pub fn headers_after_locator(
        &self,
        locator: &[Bytes32],
        stop: &Bytes32,
        max: usize,
    ) -> Vec<BlockHeader> {
        helpers::headers_after_locator(&self.store.lock(), locator, stop, max)
    }

    /// Cumulative work the chain would have after `headers`, when the first
    /// one connects to a stored header.
    pub fn work_after(&self, headers: &[BlockHeader]) -> Option<U256> {
        let first = headers.first()?;
        let parent_work = self.store.lock().get(&first.prev_hash)?.chain_work;
        Some(
            headers
                .iter()
                .fold(parent_work, |work, header| work.saturating_add(block_work(header.bits))),
        )
    }

    pub fn suspicious_reorg_depth(&self) -> u64 {
        self.store.lock().suspicious_reorg_depth
    }

    /// Changes the reorg guard and re-evaluates the tip set under it.
    pub fn set_suspicious_reorg_depth(&self, depth: u64) -> Result<(), ChainError> {
        let selection = {
            let mut store = self.store.lock();
            store.suspicious_reorg_depth = depth;
            let selection = update_active_tip(&mut store)?;
            if selection.switched.is_some() {
                store.revision += 1;
            }
            selection
        };
        info!(depth, "suspicious reorg depth updated");
        self.publish(&selection);
        Ok(())
    }

    /// True until the active tip is recent and carries enough work. Once it
    /// turns false it stays false.
    pub fn is_initial_block_download(&self) -> bool {
        if self.ibd_finished.load(Ordering::Relaxed) {
            return false;
        }

        let params = self.validator.params();
        let now = self.validator.now();
        let still_syncing = {
            let store = self.store.lock();
            match store.active_record() {
                Ok(tip) => {
                    tip.height == 0
                        || i64::from(tip.time()) < now - params.max_tip_age
                        || tip.chain_work < params.minimum_chain_work
                }
                Err(_) => true,
            }
        };
        if still_syncing {
            return true;
        }

        if !self.ibd_finished.swap(true, Ordering::Relaxed) {
            info!("leaving initial block download");
        }
        false
    }

    /// Minimum cumulative work an unrequested-looking batch must reach before
    /// it is stored. Zero during initial block download.
    pub fn anti_dos_work_threshold(&self) -> U256 {
        if self.is_initial_block_download() {
            return U256::zero();
        }

        let params = self.validator.params();
        let store = self.store.lock();
        let Ok(tip) = store.active_record() else {
            return params.minimum_chain_work;
        };
        let buffer = block_work(tip.header.bits)
            .saturating_mul(U256::from(params.anti_dos_work_buffer_blocks));
        tip.chain_work
            .saturating_sub(buffer)
            .max(params.minimum_chain_work)
    }

    /// Drops the orphans a peer left behind.
    pub fn drop_peer_orphans(&self, peer: PeerId) -> usize {
        self.store.lock().orphans.remove_origin(peer)
    }

    /// Writes a snapshot if anything changed since the last one. The snapshot
    /// is captured under the lock and written after releasing it.
    pub fn flush(&self) -> Result<bool, ChainError> {
        let Some(writer) = &self.writer else {
            return Ok(false);
        };
        let snapshot = {
            let store = self.store.lock();
            if writer.is_current(store.revision) {
                return Ok(false);
            }
            Snapshot::capture(&store)
        };

        match writer.write(&snapshot) {
            Ok(written) => Ok(written),
            Err(err) => {
                warn!(path = %writer.path().display(), error = %err, "header snapshot write failed");
                Err(err.into())
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.store.lock())
    }

    pub fn audit(&self) -> Result<(), ChainError> {
        self.store.lock().audit()
    }
}

fn fresh_store(validator: &HeaderValidator) -> Store {
    let params = validator.params();
    let genesis_pow_hash = validator.pow_hash(&params.genesis);
    get_header_store(params, genesis_pow_hash)
}
