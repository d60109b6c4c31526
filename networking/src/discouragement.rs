/// Time-decaying, probabilistic set of discouraged addresses.
///
/// Entries go into the newest of a small ring of bloom filter generations.
/// A generation is retired once everything in it is older than the decay
/// window, so an address stays flagged for at least `decay` seconds and at
/// most `decay + generation_span`. Each generation holds a bounded number of
/// entries and the ring has a fixed length, which keeps memory bounded no
/// matter how many addresses get flagged; under flooding the oldest
/// generation is retired early.
use std::collections::VecDeque;
use std::net::IpAddr;

use sha2::{Digest, Sha256};

/// Default time an address stays discouraged.
pub const DISCOURAGEMENT_DECAY_SECS: i64 = 24 * 60 * 60;

const ENTRIES_PER_GENERATION: usize = 12_500;
const FALSE_POSITIVE_RATE: f64 = 1e-6;
const MAX_GENERATIONS: usize = 8;
const MAX_HASH_FUNCS: u32 = 32;

#[derive(Debug, Clone)]
struct Generation {
    started_at: i64,
    entries: usize,
    bits: Vec<u64>,
}

impl Generation {
    fn new(started_at: i64, bit_count: usize) -> Self {
        Self {
            started_at,
            entries: 0,
            bits: vec![0; bit_count.div_ceil(64)],
        }
    }

    fn set(&mut self, index: usize) {
        self.bits[index / 64] |= 1 << (index % 64);
    }

    fn get(&self, index: usize) -> bool {
        self.bits[index / 64] & (1 << (index % 64)) != 0
    }
}

#[derive(Debug, Clone)]
pub struct DiscouragementFilter {
    generations: VecDeque<Generation>,
    decay: i64,
    generation_span: i64,
    bit_count: usize,
    hash_funcs: u32,
    tweak: u64,
}

impl Default for DiscouragementFilter {
    fn default() -> Self {
        Self::new(DISCOURAGEMENT_DECAY_SECS)
    }
}

impl DiscouragementFilter {
    pub fn new(decay: i64) -> Self {
        Self::with_tweak(decay, rand::random())
    }

    pub fn with_tweak(decay: i64, tweak: u64) -> Self {
        let ln2 = std::f64::consts::LN_2;
        let elements = ENTRIES_PER_GENERATION as f64;
        let bit_count = (-elements * FALSE_POSITIVE_RATE.ln() / (ln2 * ln2)).ceil() as usize;
        let hash_funcs = ((bit_count as f64 / elements) * ln2).ceil() as u32;

        let decay = decay.max(1);
        Self {
            generations: VecDeque::new(),
            decay,
            generation_span: (decay / (MAX_GENERATIONS as i64 / 2)).max(1),
            bit_count: bit_count.max(64),
            hash_funcs: hash_funcs.clamp(1, MAX_HASH_FUNCS),
            tweak,
        }
    }

    pub fn decay(&self) -> i64 {
        self.decay
    }

    pub fn insert(&mut self, item: &[u8], now: i64) {
        self.retire(now);

        let needs_generation = self.generations.back().map_or(true, |newest| {
            newest.entries >= ENTRIES_PER_GENERATION || now >= newest.started_at + self.generation_span
        });
        if needs_generation {
            if self.generations.len() >= MAX_GENERATIONS {
                self.generations.pop_front();
            }
            self.generations.push_back(Generation::new(now, self.bit_count));
        }

        let indexes = self.indexes(item);
        if let Some(newest) = self.generations.back_mut() {
            for index in indexes {
                newest.set(index);
            }
            newest.entries += 1;
        }
    }

    /// May report false positives; never false negatives within the decay
    /// window.
    pub fn contains(&self, item: &[u8], now: i64) -> bool {
        let indexes = self.indexes(item);
        self.generations
            .iter()
            .filter(|generation| !self.is_expired(generation, now))
            .any(|generation| indexes.iter().all(|index| generation.get(*index)))
    }

    pub fn insert_addr(&mut self, addr: IpAddr, now: i64) {
        self.insert(&addr_key(addr), now);
    }

    pub fn contains_addr(&self, addr: IpAddr, now: i64) -> bool {
        self.contains(&addr_key(addr), now)
    }

    pub fn clear(&mut self) {
        self.generations.clear();
    }

    pub fn generation_count(&self) -> usize {
        self.generations.len()
    }

    fn is_expired(&self, generation: &Generation, now: i64) -> bool {
        now >= generation.started_at + self.generation_span + self.decay
    }

    fn retire(&mut self, now: i64) {
        while let Some(oldest) = self.generations.front() {
            if !self.is_expired(oldest, now) {
                break;
            }
            self.generations.pop_front();
        }
    }

    /// Double hashing over one SHA-256 digest of the tweaked item.
    fn indexes(&self, item: &[u8]) -> Vec<usize> {
        let digest = Sha256::new()
            .chain_update(self.tweak.to_le_bytes())
            .chain_update(item)
            .finalize();

        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&digest[..8]);
        second.copy_from_slice(&digest[8..16]);
        let h1 = u64::from_le_bytes(first);
        let h2 = u64::from_le_bytes(second) | 1;

        let modulus = self.bit_count as u64;
        (0..u64::from(self.hash_funcs))
            .map(|i| (h1.wrapping_add(i.wrapping_mul(h2)) % modulus) as usize)
            .collect()
    }
}

/// IPv4-mapped addresses are flagged under their IPv4 form.
fn addr_key(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.octets().to_vec(),
            None => v6.octets().to_vec(),
        },
    }
}
