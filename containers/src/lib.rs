pub mod header;
pub mod types;
pub mod work;

pub use header::{sha256d, BlockHeader, DecodeError, HEADER_SIZE};
pub use types::{Bytes32, PeerId};
pub use work::{block_work, target_from_compact, target_to_compact, work_from_target, CompactTarget};

pub use ethereum_types::{H160, H256, U256, U512};
