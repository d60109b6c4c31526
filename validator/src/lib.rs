// Header validation: difficulty, proof of work and timestamp rules.
use std::sync::Arc;

use chain::{ChainParams, MAX_FUTURE_BLOCK_TIME};
use containers::{block_work, target_from_compact, BlockHeader, Bytes32, U256};
use thiserror::Error;
use tracing::trace;

pub mod clock;
pub mod difficulty;
pub mod pow;

pub use clock::{Clock, MockableClock, SystemClock};
pub use difficulty::{calculate_asert, next_work_required, AsertAnchor};
pub use pow::{meets_target, CommitmentHasher, PowHasher};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("declared bits {declared:#010x} differ from expected {expected:#010x}")]
    BadDifficultyBits { expected: u32, declared: u32 },
    #[error("proof-of-work hash above target")]
    InvalidPoW,
    #[error("timestamp {time} not after median time past {median_time_past}")]
    TimeTooOld { time: i64, median_time_past: i64 },
    #[error("timestamp {time} exceeds limit {limit}")]
    TimeTooNew { time: i64, limit: i64 },
    #[error("obsolete header version {0}")]
    BadVersion(i32),
}

impl ValidationError {
    /// Short reason string used in logs and reject notices.
    pub fn reject_reason(&self) -> &'static str {
        match self {
            ValidationError::BadDifficultyBits { .. } => "bad-diffbits",
            ValidationError::InvalidPoW => "high-hash",
            ValidationError::TimeTooOld { .. } => "time-too-old",
            ValidationError::TimeTooNew { .. } => "time-too-new",
            ValidationError::BadVersion(_) => "bad-version",
        }
    }
}

/// What the validator needs to know about the parent of a candidate header.
/// Captured from the store, then validated without holding any lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationContext {
    pub parent_hash: Bytes32,
    pub parent_height: u64,
    pub parent_time: u32,
    pub parent_work: U256,
    /// Median of the last `MEDIAN_TIME_SPAN` timestamps ending at the parent.
    pub median_time_past: i64,
    pub anchor: Option<AsertAnchor>,
}

/// Result of a successful validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidatedHeader {
    pub hash: Bytes32,
    pub pow_hash: Bytes32,
    pub work: U256,
    pub chain_work: U256,
}

#[derive(Clone)]
pub struct HeaderValidator {
    params: Arc<ChainParams>,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn PowHasher>,
}

impl HeaderValidator {
    pub fn new(params: Arc<ChainParams>, clock: Arc<dyn Clock>) -> Self {
        Self::with_hasher(params, clock, Arc::new(CommitmentHasher))
    }

    pub fn with_hasher(
        params: Arc<ChainParams>,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn PowHasher>,
    ) -> Self {
        Self {
            params,
            clock,
            hasher,
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn pow_hash(&self, header: &BlockHeader) -> Bytes32 {
        self.hasher.pow_hash(header)
    }

    /// Checks, in order: declared difficulty, proof of work, median time
    /// past, future drift, version. Pure apart from reading the clock.
    pub fn validate(
        &self,
        header: &BlockHeader,
        context: &ValidationContext,
    ) -> Result<ValidatedHeader, ValidationError> {
        let hash = header.hash();

        let expected = next_work_required(
            &self.params,
            context.parent_height,
            context.parent_time,
            context.anchor.as_ref(),
        );
        if expected != Some(header.bits) {
            trace!(hash = %hash, bits = header.bits, ?expected, "difficulty mismatch");
            return Err(ValidationError::BadDifficultyBits {
                expected: expected.unwrap_or(0),
                declared: header.bits,
            });
        }

        let decoded = target_from_compact(header.bits);
        let pow_hash = self.hasher.pow_hash(header);
        if !decoded.is_usable()
            || decoded.target > self.params.pow_limit
            || !meets_target(&pow_hash, &decoded.target)
        {
            return Err(ValidationError::InvalidPoW);
        }

        let time = i64::from(header.time);
        if time <= context.median_time_past {
            return Err(ValidationError::TimeTooOld {
                time,
                median_time_past: context.median_time_past,
            });
        }

        let limit = self.clock.now() + MAX_FUTURE_BLOCK_TIME;
        if time > limit {
            return Err(ValidationError::TimeTooNew { time, limit });
        }

        if header.version < 1 {
            return Err(ValidationError::BadVersion(header.version));
        }

        let work = block_work(header.bits);
        Ok(ValidatedHeader {
            hash,
            pow_hash,
            work,
            chain_work: context.parent_work + work,
        })
    }
}
