use containers::{sha256d, BlockHeader, Bytes32, HEADER_SIZE, U256};

/// Computes the hash a header's proof of work is judged by.
pub trait PowHasher: Send + Sync {
    fn pow_hash(&self, header: &BlockHeader) -> Bytes32;
}

/// Light verification path: commits the header (with the RandomX field
/// cleared) to the claimed RandomX hash. Evaluating RandomX itself belongs to
/// the miner.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommitmentHasher;

impl PowHasher for CommitmentHasher {
    fn pow_hash(&self, header: &BlockHeader) -> Bytes32 {
        let mut stripped = *header;
        stripped.randomx_hash = Bytes32::zero();

        let mut preimage = Vec::with_capacity(HEADER_SIZE + 32);
        preimage.extend_from_slice(&stripped.to_bytes());
        preimage.extend_from_slice(header.randomx_hash.as_bytes());
        Bytes32::from(sha256d(&preimage))
    }
}

/// The hash is read as a big-endian integer.
pub fn meets_target(pow_hash: &Bytes32, target: &U256) -> bool {
    U256::from_big_endian(pow_hash.as_bytes()) <= *target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_depends_on_randomx_field() {
        let header = BlockHeader::default();
        let mut other = header;
        other.randomx_hash = Bytes32::from([7; 32]);
        assert_ne!(
            CommitmentHasher.pow_hash(&header),
            CommitmentHasher.pow_hash(&other)
        );
    }

    #[test]
    fn target_comparison_is_big_endian() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0xff;
        let low = Bytes32::from(bytes);
        assert!(meets_target(&low, &U256::from(0xffu64)));
        assert!(!meets_target(&low, &U256::from(0xfeu64)));

        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        assert!(!meets_target(&Bytes32::from(bytes), &U256::from(u64::MAX)));
    }
}
