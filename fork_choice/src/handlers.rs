use containers::{BlockHeader, Bytes32, PeerId};
use thiserror::Error;
use tracing::debug;
use validator::{ValidatedHeader, ValidationContext, ValidationError};

use crate::error::ChainError;
use crate::helpers::{update_active_tip, validation_context, Selection};
use crate::orphans::OrphanEntry;
use crate::store::{anchor_for_child_of, HeaderRecord, HeaderStatus, Store};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("header has a null parent but is not our genesis")]
    BadGenesis,
    #[error("header previously failed validation")]
    KnownInvalid,
    #[error("header descends from an invalid header")]
    InvalidAncestor,
}

impl RejectReason {
    pub fn is_invalid_pow(&self) -> bool {
        matches!(self, RejectReason::Invalid(ValidationError::InvalidPoW))
    }

    /// Rejections that may clear up on their own and are not remembered.
    pub fn is_transient(&self) -> bool {
        matches!(self, RejectReason::Invalid(ValidationError::TimeTooNew { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Accepted,
    Duplicate,
    OrphanPending,
    Rejected(RejectReason),
}

/// First phase of an insertion, run under the store lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    /// Settled without validation.
    Done(AddOutcome),
    /// Parent known; validate against this context outside the lock.
    Validate(ValidationContext),
}

/// Second phase result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub outcome: AddOutcome,
    pub selection: Selection,
    /// Orphans whose parent is the freshly inserted header.
    pub released: Vec<OrphanEntry>,
}

#[inline]
pub fn prepare_header(
    store: &mut Store,
    header: &BlockHeader,
    hash: Bytes32,
    origin: Option<PeerId>,
    now: i64,
) -> Prepared {
    if store.contains(&hash) {
        return Prepared::Done(AddOutcome::Duplicate);
    }
    if store.failed.contains(&hash) {
        return Prepared::Done(AddOutcome::Rejected(RejectReason::KnownInvalid));
    }
    if header.is_genesis_shaped() {
        store.failed.insert(hash);
        return Prepared::Done(AddOutcome::Rejected(RejectReason::BadGenesis));
    }
    if store.failed.contains(&header.prev_hash) {
        store.failed.insert(hash);
        return Prepared::Done(AddOutcome::Rejected(RejectReason::InvalidAncestor));
    }

    let Some(parent) = store.get(&header.prev_hash) else {
        if store.orphans.insert(hash, *header, origin, now) {
            debug!(hash = %hash, parent = %header.prev_hash, "header parent unknown, buffered");
        }
        return Prepared::Done(AddOutcome::OrphanPending);
    };

    Prepared::Validate(validation_context(store, parent))
}

#[inline]
pub fn commit_header(
    store: &mut Store,
    header: &BlockHeader,
    validated: &ValidatedHeader,
) -> Result<Committed, ChainError> {
    let hash = validated.hash;
    if store.contains(&hash) {
        return Ok(Committed {
            outcome: AddOutcome::Duplicate,
            selection: Selection::default(),
            released: Vec::new(),
        });
    }

    let parent = store.get(&header.prev_hash).ok_or_else(|| {
        ChainError::Corrupted(format!("parent of validated header {hash} disappeared"))
    })?;
    if validated.chain_work <= parent.chain_work {
        return Err(ChainError::Corrupted(format!(
            "cumulative work of {hash} does not exceed its parent"
        )));
    }

    let height = parent.height + 1;
    let record = HeaderRecord {
        hash,
        header: *header,
        height,
        chain_work: validated.chain_work,
        pow_hash: validated.pow_hash,
        status: HeaderStatus::ValidatedPoW,
        sequence: store.next_sequence,
        anchor: anchor_for_child_of(store.asert_anchor_height, parent.anchor, header, height),
    };

    store.next_sequence += 1;
    store.records.insert(hash, record);
    store.tips.remove(&header.prev_hash);
    store.tips.insert(hash);
    store.revision += 1;

    debug!(hash = %hash, height, "header accepted");

    let selection = update_active_tip(store)?;
    store.check_invariants()?;

    let released = store.orphans.take_children(&hash);

    Ok(Committed {
        outcome: AddOutcome::Accepted,
        selection,
        released,
    })
}

/// Remembers a failed header and rejects everything buffered beneath it.
/// Returns the orphans that were discarded as a consequence.
pub fn record_failure(store: &mut Store, hash: Bytes32) -> Vec<OrphanEntry> {
    store.failed.insert(hash);

    let mut discarded = Vec::new();
    let mut pending = vec![hash];
    while let Some(parent) = pending.pop() {
        for orphan in store.orphans.take_children(&parent) {
            store.failed.insert(orphan.hash);
            pending.push(orphan.hash);
            discarded.push(orphan);
        }
    }
    discarded
}
