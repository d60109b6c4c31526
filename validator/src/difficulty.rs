/// Per-block ASERT retargeting.
///
/// Every header's target is derived from the anchor block's target and how far
/// the parent is ahead of or behind the ideal schedule. Difficulty doubles or
/// halves for every half-life the chain drifts. All arithmetic is integer and
/// uses 512-bit intermediates so results are reproducible bit for bit.
use chain::ChainParams;
use containers::{target_from_compact, target_to_compact, U256, U512};

/// The block at the anchor height, whose target is the reference for ASERT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AsertAnchor {
    pub height: u64,
    pub bits: u32,
    pub time: u32,
}

/// `|exponent_base| * 65536` must fit in an i64.
const MAX_EXPONENT_BASE: i64 = (1 << 47) - 1;

fn widen(value: U256) -> U512 {
    let words = value.0;
    U512([words[0], words[1], words[2], words[3], 0, 0, 0, 0])
}

/// Caller guarantees `value` fits in 256 bits.
fn narrow(value: U512) -> U256 {
    let words = value.0;
    U256([words[0], words[1], words[2], words[3]])
}

pub fn calculate_asert(
    ref_target: U256,
    target_spacing: i64,
    time_diff: i64,
    height_diff: i64,
    pow_limit: U256,
    half_life: i64,
) -> U256 {
    debug_assert!(!ref_target.is_zero() && ref_target <= pow_limit);
    debug_assert!(height_diff >= 0);

    let exponent_base = (time_diff - target_spacing * (height_diff + 1))
        .clamp(-MAX_EXPONENT_BASE, MAX_EXPONENT_BASE);
    let exponent = (exponent_base * 65536) / half_life;

    // Arithmetic shift floors; the low 16 bits are the fractional part.
    let mut shifts = exponent >> 16;
    let frac = u128::from(exponent as u16);

    let polynomial = 195_766_423_245_049u128 * frac
        + 971_821_376u128 * frac * frac
        + 5_127u128 * frac * frac * frac
        + (1u128 << 47);
    let factor = 65_536u64 + (polynomial >> 48) as u64;

    let limit = widen(pow_limit);
    let mut next = widen(ref_target) * U512::from(factor);

    shifts -= 16;
    if shifts <= 0 {
        let shift = shifts.unsigned_abs() as usize;
        next = if shift >= 512 { U512::zero() } else { next >> shift };
    } else {
        let shift = shifts as usize;
        let shifted = if shift >= 512 { U512::zero() } else { next << shift };
        next = if shift >= 512 || (shifted >> shift) != next {
            limit
        } else {
            shifted
        };
    }

    if next > limit {
        next = limit;
    }

    let target = narrow(next);
    if target.is_zero() {
        U256::one()
    } else {
        target
    }
}

/// Compact target a child of the given parent must declare.
///
/// Returns `None` when the parent sits at or above the anchor height but no
/// anchor was supplied; such a header cannot be checked and is refused.
pub fn next_work_required(
    params: &ChainParams,
    parent_height: u64,
    parent_time: u32,
    anchor: Option<&AsertAnchor>,
) -> Option<u32> {
    let limit_bits = target_to_compact(params.pow_limit);

    if params.pow_no_retargeting || parent_height < params.asert_anchor_height {
        return Some(limit_bits);
    }

    let anchor = anchor?;
    let decoded = target_from_compact(anchor.bits);
    let ref_target = if decoded.is_usable() && decoded.target <= params.pow_limit {
        decoded.target
    } else {
        params.pow_limit
    };

    let time_diff = i64::from(parent_time) - i64::from(anchor.time);
    let height_diff = parent_height.saturating_sub(anchor.height) as i64;

    let target = calculate_asert(
        ref_target,
        params.target_spacing,
        time_diff,
        height_diff,
        params.pow_limit,
        params.asert_half_life,
    );
    Some(target_to_compact(target))
}
