use containers::Bytes32;
use thiserror::Error;

/// Failures that escape the store. Anything here is process-level: per-peer
/// validation problems are reported through `AddOutcome::Rejected` instead.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("header store corrupted: {0}")]
    Corrupted(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("snapshot genesis {found} does not match network genesis {expected}")]
    GenesisMismatch { expected: Bytes32, found: Bytes32 },
    #[error("snapshot inconsistent: {0}")]
    Inconsistent(String),
}
