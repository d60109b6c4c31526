/// Headers whose parent is not yet known.
///
/// Entries are indexed by their own hash and by the missing parent hash. The
/// pool is bounded globally and per originating peer; when either bound is
/// hit the oldest entry (globally, or of that peer) is evicted first.
/// Entries older than the expiry window are dropped on the next insertion.
use std::collections::{BTreeMap, HashMap};

use containers::{BlockHeader, Bytes32, PeerId};
use tracing::{debug, trace};

pub const MAX_ORPHAN_HEADERS: usize = 1000;
pub const MAX_ORPHANS_PER_PEER: usize = 50;
pub const ORPHAN_EXPIRE_SECS: i64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanEntry {
    pub hash: Bytes32,
    pub header: BlockHeader,
    pub origin: Option<PeerId>,
    pub received_at: i64,
    /// Arrival order within the pool.
    pub sequence: u64,
}

#[derive(Debug, Clone)]
pub struct OrphanPool {
    by_hash: HashMap<Bytes32, OrphanEntry>,
    by_parent: HashMap<Bytes32, Vec<Bytes32>>,
    /// Arrival sequence to hash, oldest first.
    arrivals: BTreeMap<u64, Bytes32>,
    next_sequence: u64,
    per_origin: HashMap<Option<PeerId>, usize>,
    max_total: usize,
    max_per_peer: usize,
    expire_after: i64,
}

impl Default for OrphanPool {
    fn default() -> Self {
        Self::with_limits(MAX_ORPHAN_HEADERS, MAX_ORPHANS_PER_PEER, ORPHAN_EXPIRE_SECS)
    }
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_total: usize, max_per_peer: usize, expire_after: i64) -> Self {
        Self {
            by_hash: HashMap::new(),
            by_parent: HashMap::new(),
            arrivals: BTreeMap::new(),
            next_sequence: 0,
            per_origin: HashMap::new(),
            max_total: max_total.max(1),
            max_per_peer: max_per_peer.max(1),
            expire_after,
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn contains(&self, hash: &Bytes32) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn count_for(&self, origin: Option<PeerId>) -> usize {
        self.per_origin.get(&origin).copied().unwrap_or(0)
    }

    /// Buffers a header. Returns false if it was already buffered.
    pub fn insert(
        &mut self,
        hash: Bytes32,
        header: BlockHeader,
        origin: Option<PeerId>,
        now: i64,
    ) -> bool {
        if self.by_hash.contains_key(&hash) {
            return false;
        }

        self.expire(now);

        while self.count_for(origin) >= self.max_per_peer {
            let Some(oldest) = self.oldest_from(origin) else {
                break;
            };
            debug!(hash = %oldest, "evicting oldest orphan of peer");
            self.remove(&oldest);
        }

        while self.by_hash.len() >= self.max_total {
            let Some((_, oldest)) = self.arrivals.first_key_value() else {
                break;
            };
            let oldest = *oldest;
            debug!(hash = %oldest, "evicting oldest orphan");
            self.remove(&oldest);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.by_parent.entry(header.prev_hash).or_default().push(hash);
        self.arrivals.insert(sequence, hash);
        *self.per_origin.entry(origin).or_insert(0) += 1;
        self.by_hash.insert(
            hash,
            OrphanEntry {
                hash,
                header,
                origin,
                received_at: now,
                sequence,
            },
        );

        trace!(hash = %hash, parent = %header.prev_hash, "buffered orphan header");
        true
    }

    /// Removes and returns every orphan waiting on `parent`, oldest first.
    pub fn take_children(&mut self, parent: &Bytes32) -> Vec<OrphanEntry> {
        let Some(children) = self.by_parent.remove(parent) else {
            return Vec::new();
        };

        children
            .into_iter()
            .filter_map(|hash| self.detach(&hash))
            .collect()
    }

    pub fn remove(&mut self, hash: &Bytes32) -> Option<OrphanEntry> {
        let entry = self.detach(hash)?;
        if let Some(siblings) = self.by_parent.get_mut(&entry.header.prev_hash) {
            siblings.retain(|sibling| sibling != hash);
            if siblings.is_empty() {
                self.by_parent.remove(&entry.header.prev_hash);
            }
        }
        Some(entry)
    }

    /// Drops everything a disconnected peer left behind.
    pub fn remove_origin(&mut self, origin: PeerId) -> usize {
        let hashes: Vec<Bytes32> = self
            .by_hash
            .values()
            .filter(|entry| entry.origin == Some(origin))
            .map(|entry| entry.hash)
            .collect();
        for hash in &hashes {
            self.remove(hash);
        }
        hashes.len()
    }

    fn expire(&mut self, now: i64) {
        let cutoff = now - self.expire_after;
        let expired: Vec<Bytes32> = self
            .by_hash
            .values()
            .filter(|entry| entry.received_at <= cutoff)
            .map(|entry| entry.hash)
            .collect();
        for hash in expired {
            debug!(hash = %hash, "orphan header expired");
            self.remove(&hash);
        }
    }

    fn oldest_from(&self, origin: Option<PeerId>) -> Option<Bytes32> {
        self.arrivals
            .values()
            .find(|hash| {
                self.by_hash
                    .get(*hash)
                    .is_some_and(|entry| entry.origin == origin)
            })
            .copied()
    }

    /// Removes the entry from every index except `by_parent`.
    fn detach(&mut self, hash: &Bytes32) -> Option<OrphanEntry> {
        let entry = self.by_hash.remove(hash)?;
        self.arrivals.remove(&entry.sequence);
        if let Some(count) = self.per_origin.get_mut(&entry.origin) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_origin.remove(&entry.origin);
            }
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan(parent: u8, nonce: u32) -> (Bytes32, BlockHeader) {
        let header = BlockHeader {
            prev_hash: Bytes32::from([parent; 32]),
            nonce,
            ..BlockHeader::default()
        };
        (header.hash(), header)
    }

    #[test]
    fn children_released_in_arrival_order() {
        let mut pool = OrphanPool::new();
        let (a, ha) = orphan(1, 1);
        let (b, hb) = orphan(1, 2);
        let (c, hc) = orphan(2, 3);
        assert!(pool.insert(a, ha, Some(PeerId(1)), 10));
        assert!(pool.insert(b, hb, Some(PeerId(2)), 11));
        assert!(pool.insert(c, hc, Some(PeerId(1)), 12));
        assert!(!pool.insert(a, ha, Some(PeerId(1)), 13));

        let released: Vec<_> = pool
            .take_children(&Bytes32::from([1; 32]))
            .into_iter()
            .map(|entry| entry.hash)
            .collect();
        assert_eq!(released, vec![a, b]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.count_for(Some(PeerId(1))), 1);
        assert!(pool.take_children(&Bytes32::from([1; 32])).is_empty());
    }

    #[test]
    fn per_peer_limit_evicts_that_peers_oldest() {
        let mut pool = OrphanPool::with_limits(100, 2, 600);
        let (a, ha) = orphan(1, 1);
        let (b, hb) = orphan(1, 2);
        let (c, hc) = orphan(1, 3);
        let (other, ho) = orphan(1, 4);
        pool.insert(other, ho, Some(PeerId(9)), 0);
        pool.insert(a, ha, Some(PeerId(1)), 1);
        pool.insert(b, hb, Some(PeerId(1)), 2);
        pool.insert(c, hc, Some(PeerId(1)), 3);

        assert!(!pool.contains(&a));
        assert!(pool.contains(&b) && pool.contains(&c) && pool.contains(&other));
        assert_eq!(pool.count_for(Some(PeerId(1))), 2);
    }

    #[test]
    fn global_limit_evicts_oldest_overall() {
        let mut pool = OrphanPool::with_limits(2, 10, 600);
        let (a, ha) = orphan(1, 1);
        let (b, hb) = orphan(2, 2);
        let (c, hc) = orphan(3, 3);
        pool.insert(a, ha, Some(PeerId(1)), 1);
        pool.insert(b, hb, Some(PeerId(2)), 2);
        pool.insert(c, hc, Some(PeerId(3)), 3);

        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&a));
        assert!(pool.take_children(&Bytes32::from([1; 32])).is_empty());
    }

    #[test]
    fn stale_entries_expire_on_insert() {
        let mut pool = OrphanPool::with_limits(10, 10, 600);
        let (a, ha) = orphan(1, 1);
        let (b, hb) = orphan(2, 2);
        pool.insert(a, ha, None, 0);
        pool.insert(b, hb, None, 600);
        assert!(!pool.contains(&a));
        assert!(pool.contains(&b));
    }

    #[test]
    fn remove_origin_drops_only_that_peer() {
        let mut pool = OrphanPool::new();
        let (a, ha) = orphan(1, 1);
        let (b, hb) = orphan(1, 2);
        pool.insert(a, ha, Some(PeerId(1)), 0);
        pool.insert(b, hb, Some(PeerId(2)), 0);
        assert_eq!(pool.remove_origin(PeerId(1)), 1);
        assert!(!pool.contains(&a));
        assert!(pool.contains(&b));
    }

    #[test]
    fn draining_keeps_indexes_in_step() {
        let mut pool = OrphanPool::with_limits(3, 10, 600);
        let entries: Vec<_> = (0..5).map(|nonce| orphan(1, nonce)).collect();
        for (hash, header) in &entries {
            pool.insert(*hash, *header, None, 0);
        }
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.arrivals.len(), 3);

        let released = pool.take_children(&Bytes32::from([1; 32]));
        let sequences: Vec<u64> = released.iter().map(|entry| entry.sequence).collect();
        assert_eq!(sequences, vec![2, 3, 4]);
        assert!(pool.arrivals.is_empty());
        assert_eq!(pool.count_for(None), 0);
    }
}
