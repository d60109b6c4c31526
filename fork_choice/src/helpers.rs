use std::cmp::Ordering;

use chain::MEDIAN_TIME_SPAN;
use containers::{BlockHeader, Bytes32};
use tracing::{error, info, warn};
use validator::ValidationContext;

use crate::error::ChainError;
use crate::store::{HeaderRecord, Store};

/// Locator hashes after which the step between entries starts doubling.
const LOCATOR_DENSE_ENTRIES: usize = 10;

/// Active tip moved to a different header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TipSwitch {
    pub previous: Bytes32,
    pub tip: Bytes32,
    pub height: u64,
    pub fork_height: u64,
    /// Active blocks disconnected to reach the fork point; 0 when extending.
    pub reorg_depth: u64,
}

/// A heavier tip that was not adopted because the reorg was too deep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefusedReorg {
    pub candidate: Bytes32,
    pub candidate_height: u64,
    pub depth: u64,
    pub threshold: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    pub switched: Option<TipSwitch>,
    pub refused: Vec<RefusedReorg>,
}

pub fn parent_of<'a>(store: &'a Store, record: &HeaderRecord) -> Option<&'a HeaderRecord> {
    if record.height == 0 {
        return None;
    }
    store.get(&record.prev_hash())
}

/// Ancestor of `record` at `height`. Uses the active chain index once the walk
/// reaches it.
pub fn get_ancestor<'a>(
    store: &'a Store,
    record: &'a HeaderRecord,
    height: u64,
) -> Option<&'a HeaderRecord> {
    if height > record.height {
        return None;
    }
    let mut cursor = record;
    loop {
        if cursor.height == height {
            return Some(cursor);
        }
        if store.is_on_active_chain(cursor) {
            let hash = store.active_chain.get(height as usize)?;
            return store.get(hash);
        }
        cursor = parent_of(store, cursor)?;
    }
}

/// Median of the last `MEDIAN_TIME_SPAN` timestamps ending at `record`.
pub fn median_time_past(store: &Store, record: &HeaderRecord) -> i64 {
    let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
    let mut cursor = Some(record);
    while let Some(current) = cursor {
        if times.len() == MEDIAN_TIME_SPAN {
            break;
        }
        times.push(i64::from(current.time()));
        cursor = parent_of(store, current);
    }
    times.sort_unstable();
    times[times.len() / 2]
}

/// Everything the validator needs about `parent`, read under the store lock.
pub fn validation_context(store: &Store, parent: &HeaderRecord) -> ValidationContext {
    ValidationContext {
        parent_hash: parent.hash,
        parent_height: parent.height,
        parent_time: parent.time(),
        parent_work: parent.chain_work,
        median_time_past: median_time_past(store, parent),
        anchor: parent.anchor,
    }
}

/// Highest record shared by `record`'s chain and the active chain.
pub fn fork_point<'a>(store: &'a Store, record: &'a HeaderRecord) -> Option<&'a HeaderRecord> {
    let mut cursor = record;
    while !store.is_on_active_chain(cursor) {
        cursor = parent_of(store, cursor)?;
    }
    Some(cursor)
}

fn compare_candidates(a: &HeaderRecord, b: &HeaderRecord) -> Ordering {
    b.chain_work
        .cmp(&a.chain_work)
        .then(a.sequence.cmp(&b.sequence))
}

/// Re-evaluates the active tip.
///
/// Tips are tried heaviest first (earlier arrival first on equal work). Only
/// tips with strictly more work than the current active tip are considered.
/// A candidate whose reorg would disconnect `suspicious_reorg_depth` or more
/// active blocks is refused and stays in the tip set. A refusal is reported
/// once per tip and depth limit.
pub fn update_active_tip(store: &mut Store) -> Result<Selection, ChainError> {
    let current = store.active_record()?.clone();
    let threshold = store.suspicious_reorg_depth;

    let mut candidates: Vec<&HeaderRecord> = store
        .tips
        .iter()
        .filter_map(|hash| store.get(hash))
        .filter(|record| record.chain_work > current.chain_work)
        .collect();
    candidates.sort_by(|a, b| compare_candidates(a, b));

    let mut selection = Selection::default();
    let mut refused = Vec::new();
    let mut chosen = None;

    for candidate in candidates {
        let fork = fork_point(store, candidate).ok_or_else(|| {
            ChainError::Corrupted(format!("tip {} does not reach genesis", candidate.hash))
        })?;
        let depth = current.height - fork.height;

        if threshold > 0 && depth >= threshold {
            refused.push(candidate.hash);
            if store.refused_tips.get(&candidate.hash) == Some(&threshold) {
                continue;
            }
            error!(
                candidate = %candidate.hash,
                candidate_height = candidate.height,
                active_height = current.height,
                depth,
                threshold,
                "refusing suspiciously deep reorg"
            );
            selection.refused.push(RefusedReorg {
                candidate: candidate.hash,
                candidate_height: candidate.height,
                depth,
                threshold,
            });
            continue;
        }

        chosen = Some((candidate.hash, fork.height, depth));
        break;
    }

    let tips = &store.tips;
    store.refused_tips.retain(|hash, _| tips.contains(hash));
    store
        .refused_tips
        .extend(refused.into_iter().map(|hash| (hash, threshold)));

    if let Some((tip, fork_height, depth)) = chosen {
        let path = path_from_fork(store, &tip, fork_height)?;
        store.active_chain.truncate(fork_height as usize + 1);
        store.active_chain.extend(path);
        store.active_tip = tip;
        store.refused_tips.remove(&tip);

        let height = store.active_height();
        if depth > 0 {
            warn!(
                old_tip = %current.hash,
                new_tip = %tip,
                fork_height,
                depth,
                height,
                "chain reorganization"
            );
        } else {
            info!(tip = %tip, height, "new best header");
        }

        selection.switched = Some(TipSwitch {
            previous: current.hash,
            tip,
            height,
            fork_height,
            reorg_depth: depth,
        });
    }

    Ok(selection)
}

/// Hashes from just above `fork_height` up to `tip`, in ascending order.
fn path_from_fork(store: &Store, tip: &Bytes32, fork_height: u64) -> Result<Vec<Bytes32>, ChainError> {
    let mut path = Vec::new();
    let mut cursor = store
        .get(tip)
        .ok_or_else(|| ChainError::Corrupted(format!("tip {tip} has no record")))?;
    while cursor.height > fork_height {
        path.push(cursor.hash);
        cursor = parent_of(store, cursor).ok_or_else(|| {
            ChainError::Corrupted(format!("record {} lost its parent", cursor.hash))
        })?;
    }
    path.reverse();
    Ok(path)
}

/// Block locator starting at `record`: ten consecutive hashes, then
/// exponentially sparser, always ending with genesis.
pub fn locator_from(store: &Store, record: &HeaderRecord) -> Vec<Bytes32> {
    let mut hashes = Vec::new();
    let mut step = 1u64;
    let mut cursor = Some(record);

    while let Some(current) = cursor {
        hashes.push(current.hash);
        if current.height == 0 {
            break;
        }
        if hashes.len() >= LOCATOR_DENSE_ENTRIES {
            step *= 2;
        }
        let next_height = current.height.saturating_sub(step);
        cursor = get_ancestor(store, current, next_height);
    }

    if hashes.last() != Some(&store.genesis_hash) {
        hashes.push(store.genesis_hash);
    }
    hashes
}

/// Locator for a getheaders request, built from the active tip's parent so
/// that a peer on the same chain still answers with at least our tip.
pub fn get_locator(store: &Store) -> Result<Vec<Bytes32>, ChainError> {
    let tip = store.active_record()?;
    let start = parent_of(store, tip).unwrap_or(tip);
    Ok(locator_from(store, start))
}

/// Active-chain headers following the first locator entry we share, up to
/// `max` entries or `stop`, whichever comes first.
pub fn headers_after_locator(
    store: &Store,
    locator: &[Bytes32],
    stop: &Bytes32,
    max: usize,
) -> Vec<BlockHeader> {
    let fork_height = locator
        .iter()
        .filter_map(|hash| store.get(hash))
        .find(|record| store.is_on_active_chain(record))
        .map(|record| record.height)
        .unwrap_or(0);

    let mut headers = Vec::new();
    for hash in store.active_chain.iter().skip(fork_height as usize + 1) {
        let Some(record) = store.get(hash) else {
            break;
        };
        headers.push(record.header);
        if headers.len() >= max || hash == stop {
            break;
        }
    }
    headers
}
