use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use containers::PeerId;
use serde::Serialize;
use tracing::{info, warn};
use validator::Clock;

use super::misbehavior::{Misbehavior, DISCOURAGEMENT_THRESHOLD};
use super::states::SyncState;
use crate::banlist::BanList;
use crate::discouragement::DiscouragementFilter;
use crate::types::{Direction, NetPermissions};

/// Per-connection bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPeer {
    pub peer_id: PeerId,
    pub address: SocketAddr,
    pub direction: Direction,
    pub permissions: NetPermissions,
    /// Only ever increases.
    pub score: u32,
    /// Set once the score crossed the threshold for a non-exempt peer.
    pub discouraged: bool,
    pub sync_state: SyncState,
    pub connected_at: i64,
}

impl SyncPeer {
    pub fn new(
        peer_id: PeerId,
        address: SocketAddr,
        direction: Direction,
        permissions: NetPermissions,
        connected_at: i64,
    ) -> Self {
        Self {
            peer_id,
            address,
            direction,
            permissions,
            score: 0,
            discouraged: false,
            sync_state: SyncState::Idle,
            connected_at,
        }
    }

    pub fn should_disconnect(&self) -> bool {
        self.discouraged
    }
}

/// Outcome of recording a misbehavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub score: u32,
    pub disconnect: bool,
}

/// Why a connection was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    Banned,
    Discouraged,
}

/// Peer manager for sync operations.
///
/// Tracks connected peers, scores their misbehavior and decides who may
/// connect.
#[derive(Debug)]
pub struct PeerManager {
    peers: HashMap<PeerId, SyncPeer>,
    discouraged: DiscouragementFilter,
    banned: BanList,
    clock: Arc<dyn Clock>,
    next_peer_id: u64,
}

impl PeerManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_lists(clock, DiscouragementFilter::default(), BanList::in_memory())
    }

    pub fn with_lists(
        clock: Arc<dyn Clock>,
        discouraged: DiscouragementFilter,
        banned: BanList,
    ) -> Self {
        Self {
            peers: HashMap::new(),
            discouraged,
            banned,
            clock,
            next_peer_id: 1,
        }
    }

    fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Whether a connection to or from `address` may proceed. Operator
    /// configured outbound connections bypass discouragement but not bans.
    pub fn check_admission(
        &self,
        address: IpAddr,
        direction: Direction,
        permissions: NetPermissions,
    ) -> Result<(), Refusal> {
        let now = self.now();
        if self.banned.is_banned(&address, now) && !permissions.no_ban {
            return Err(Refusal::Banned);
        }
        let operator_dial = permissions.manual && direction == Direction::Outbound;
        if !operator_dial && !permissions.no_ban && self.discouraged.contains_addr(address, now) {
            return Err(Refusal::Discouraged);
        }
        Ok(())
    }

    /// Registers a connection and assigns its id.
    pub fn add_peer(
        &mut self,
        address: SocketAddr,
        direction: Direction,
        permissions: NetPermissions,
    ) -> PeerId {
        let peer_id = PeerId(self.next_peer_id);
        self.next_peer_id += 1;
        let connected_at = self.now();
        self.peers.insert(
            peer_id,
            SyncPeer::new(peer_id, address, direction, permissions, connected_at),
        );
        peer_id
    }

    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Option<SyncPeer> {
        self.peers.remove(peer_id)
    }

    pub fn get_peer(&self, peer_id: &PeerId) -> Option<&SyncPeer> {
        self.peers.get(peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peers(&self) -> impl Iterator<Item = &SyncPeer> {
        self.peers.values()
    }

    pub fn set_sync_state(&mut self, peer_id: &PeerId, state: SyncState) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.sync_state = state;
        }
    }

    /// Adds the misbehavior's penalty to the peer's score. Crossing the
    /// threshold discourages the address and asks for a disconnect, unless
    /// the peer is exempt. Unknown peers are ignored.
    pub fn misbehaving(&mut self, peer_id: &PeerId, misbehavior: Misbehavior) -> Verdict {
        let now = self.now();
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return Verdict {
                score: 0,
                disconnect: false,
            };
        };

        peer.score = peer.score.saturating_add(misbehavior.penalty());
        warn!(
            peer = %peer_id,
            reason = misbehavior.reason(),
            penalty = misbehavior.penalty(),
            score = peer.score,
            "peer misbehaving"
        );

        if peer.score < DISCOURAGEMENT_THRESHOLD {
            return Verdict {
                score: peer.score,
                disconnect: false,
            };
        }

        if peer.permissions.is_exempt() {
            info!(peer = %peer_id, score = peer.score, "threshold reached by exempt peer, keeping connection");
            return Verdict {
                score: peer.score,
                disconnect: false,
            };
        }

        if !peer.discouraged {
            peer.discouraged = true;
            let address = peer.address.ip();
            self.discouraged.insert_addr(address, now);
            info!(peer = %peer_id, %address, "discouraging peer address");
        }
        Verdict {
            score: peer.score,
            disconnect: true,
        }
    }

    pub fn is_discouraged(&self, address: IpAddr) -> bool {
        self.discouraged.contains_addr(address, self.now())
    }

    pub fn clear_discouraged(&mut self) {
        self.discouraged.clear();
    }

    pub fn ban(&mut self, address: IpAddr, duration: i64) {
        let now = self.now();
        self.banned.ban(address, duration, now);
    }

    pub fn unban(&mut self, address: &IpAddr) -> bool {
        self.banned.unban(address)
    }

    pub fn is_banned(&self, address: &IpAddr) -> bool {
        self.banned.is_banned(address, self.now())
    }

    /// Connected peers whose address is banned; the caller disconnects them.
    pub fn banned_peers(&self) -> Vec<PeerId> {
        let now = self.now();
        self.peers
            .values()
            .filter(|peer| !peer.permissions.no_ban && self.banned.is_banned(&peer.address.ip(), now))
            .map(|peer| peer.peer_id)
            .collect()
    }

    pub fn save_bans(&mut self) -> anyhow::Result<()> {
        let now = self.now();
        self.banned.save(now)
    }
}
