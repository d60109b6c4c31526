/// Header sync for the node.
///
/// - **Header Sync**: per-peer state machine that downloads header batches,
///   checks their size and continuity and feeds them to the chain state
/// - **Peer Manager**: misbehavior scores, discouragement and bans
/// - **Sync Service**: shared handle that admits connections and hands out
///   per-peer sessions
///
/// ## State Machine
///
/// - **IDLE**: nothing outstanding
/// - **AWAITING_HEADERS**: locator request sent, no answer yet
/// - **RECEIVING_HEADERS**: processing batches, continuing after full ones
/// - **SYNCED**: peer reported no more headers
/// - **DISCONNECTED**: terminal
pub mod config;
pub mod header_sync;
pub mod misbehavior;
pub mod peer_manager;
pub mod service;
pub mod states;

pub use config::*;
pub use header_sync::{is_continuous, HeaderSync};
pub use misbehavior::{Misbehavior, DISCOURAGEMENT_THRESHOLD};
pub use peer_manager::{PeerManager, Refusal, SyncPeer, Verdict};
pub use service::{PeerSession, SyncService};
pub use states::SyncState;

#[cfg(test)]
mod tests;
