/// Compact ("nBits") target encoding and per-block work.
use ethereum_types::U256;

/// Decoded compact target together with the encoding's error flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactTarget {
    pub target: U256,
    pub negative: bool,
    pub overflow: bool,
}

impl CompactTarget {
    pub fn is_usable(&self) -> bool {
        !self.negative && !self.overflow && !self.target.is_zero()
    }
}

pub fn target_from_compact(bits: u32) -> CompactTarget {
    let size = (bits >> 24) as usize;
    let word = bits & 0x007f_ffff;

    let negative = word != 0 && (bits & 0x0080_0000) != 0;
    let overflow = word != 0
        && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));

    let target = if overflow {
        U256::zero()
    } else if size <= 3 {
        U256::from(word >> (8 * (3 - size)))
    } else {
        U256::from(word) << (8 * (size - 3))
    };

    CompactTarget {
        target,
        negative,
        overflow,
    }
}

pub fn target_to_compact(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        target.low_u64() << (8 * (3 - size))
    } else {
        (target >> (8 * (size - 3))).low_u64()
    };

    // The sign bit is reserved; move one byte into the exponent instead.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    (compact as u32) | ((size as u32) << 24)
}

/// Expected number of hashes needed to meet `target`: 2^256 / (target + 1).
pub fn work_from_target(target: U256) -> U256 {
    if target.is_zero() {
        return U256::zero();
    }
    if target == U256::MAX {
        return U256::one();
    }
    (!target / (target + U256::one())) + U256::one()
}

/// Work contributed by a header declaring `bits`; zero for unusable encodings.
pub fn block_work(bits: u32) -> U256 {
    let decoded = target_from_compact(bits);
    if !decoded.is_usable() {
        return U256::zero();
    }
    work_from_target(decoded.target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x207f_ffff)]
    #[case(0x1f0f_ffff)]
    #[case(0x1f7f_ffff)]
    #[case(0x1e27_0fd8)]
    #[case(0x1d00_ffff)]
    fn canonical_encodings_survive_decoding(#[case] bits: u32) {
        let decoded = target_from_compact(bits);
        assert!(decoded.is_usable());
        assert_eq!(target_to_compact(decoded.target), bits);
    }

    #[test]
    fn regtest_limit_encodes_to_genesis_bits() {
        let limit = U256::MAX >> 1usize;
        assert_eq!(target_to_compact(limit), 0x207f_ffff);
    }

    #[test]
    fn flags_negative_and_overflowing_encodings() {
        assert!(target_from_compact(0x0492_3456).negative);
        assert!(target_from_compact(0xff12_3456).overflow);
        assert!(!target_from_compact(0x0000_0000).is_usable());
    }

    #[test]
    fn small_exponents_shift_right() {
        assert_eq!(target_from_compact(0x0112_3456).target, U256::from(0x12u64));
        assert_eq!(target_from_compact(0x0200_8000).target, U256::from(0x80u64));
        assert_eq!(target_from_compact(0x0100_3456).target, U256::zero());
    }

    #[test]
    fn sign_bit_moves_into_exponent() {
        assert_eq!(target_to_compact(U256::from(0x80u64)), 0x0200_8000);
    }

    #[test]
    fn work_is_inverse_of_target() {
        assert_eq!(block_work(0x207f_ffff), U256::from(2u64));
        assert_eq!(work_from_target(U256::zero()), U256::zero());
        assert!(block_work(0x1d00_ffff) > block_work(0x1f0f_ffff));
        assert_eq!(block_work(0x0492_3456), U256::zero());
    }
}
