/// Header sync configuration constants.
///
/// Operational parameters for synchronization: batch sizes, timeouts, and limits.
use serde::{Deserialize, Serialize};

/// Maximum headers a peer may send in one `headers` message. A batch of
/// exactly this size means more follow.
pub const MAX_HEADERS_RESULTS: usize = 2000;

/// Seconds a peer may take to answer a getheaders request.
pub const HEADER_REQUEST_TIMEOUT_SECS: i64 = 120;

/// Interval between session timer checks (in seconds).
pub const SYNC_TICK_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_headers_per_batch: usize,
    pub header_request_timeout_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_headers_per_batch: MAX_HEADERS_RESULTS,
            header_request_timeout_secs: HEADER_REQUEST_TIMEOUT_SECS,
        }
    }
}
