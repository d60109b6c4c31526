use std::net::SocketAddr;
use std::sync::Arc;

use containers::{BlockHeader, Bytes32, PeerId};
use fork_choice::{ChainError, ChainState};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{
    config::SyncConfig,
    header_sync::HeaderSync,
    peer_manager::{PeerManager, Refusal, SyncPeer},
    states::SyncState,
};
use crate::types::{Direction, NetPermissions, SyncAction};

/// Sync service shared by all connections.
///
/// Holds the chain and the peer manager; every admitted connection gets a
/// `PeerSession` that owns that peer's `HeaderSync`.
#[derive(Clone)]
pub struct SyncService {
    chain: Arc<ChainState>,
    peer_manager: Arc<Mutex<PeerManager>>,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(chain: Arc<ChainState>, peer_manager: PeerManager, config: SyncConfig) -> Self {
        Self {
            chain,
            peer_manager: Arc::new(Mutex::new(peer_manager)),
            config,
        }
    }

    pub fn chain(&self) -> &Arc<ChainState> {
        &self.chain
    }

    pub fn peer_manager(&self) -> &Arc<Mutex<PeerManager>> {
        &self.peer_manager
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    fn now(&self) -> i64 {
        self.chain.validator().now()
    }

    pub fn peer_count(&self) -> usize {
        self.peer_manager.lock().peer_count()
    }

    /// Score, discouragement, permissions and sync phase of a connection.
    pub fn peer_info(&self, peer_id: &PeerId) -> Option<SyncPeer> {
        self.peer_manager.lock().get_peer(peer_id).cloned()
    }

    pub fn peers(&self) -> Vec<SyncPeer> {
        self.peer_manager.lock().peers().cloned().collect()
    }

    /// Admits a connection, or refuses it when its address is banned or
    /// discouraged.
    pub fn connect(
        &self,
        address: SocketAddr,
        direction: Direction,
        permissions: NetPermissions,
    ) -> Result<PeerSession, Refusal> {
        let peer_id = {
            let mut peers = self.peer_manager.lock();
            peers.check_admission(address.ip(), direction, permissions)?;
            peers.add_peer(address, direction, permissions)
        };
        info!(peer = %peer_id, %address, ?direction, "Peer added to sync service");

        Ok(PeerSession {
            service: self.clone(),
            sync: HeaderSync::new(peer_id, self.config),
        })
    }
}

/// One connection's view of the sync service. Dropping it removes the peer
/// and whatever orphans it left behind.
pub struct PeerSession {
    service: SyncService,
    sync: HeaderSync,
}

impl PeerSession {
    pub fn peer_id(&self) -> PeerId {
        self.sync.peer()
    }

    pub fn state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn info(&self) -> Option<SyncPeer> {
        self.service.peer_info(&self.peer_id())
    }

    fn publish_state(&self) {
        self.service
            .peer_manager
            .lock()
            .set_sync_state(&self.peer_id(), self.sync.state());
    }

    pub fn start(&mut self) -> Result<Vec<SyncAction>, ChainError> {
        let actions = self.sync.start(&self.service.chain, self.service.now())?;
        self.publish_state();
        Ok(actions)
    }

    pub fn on_headers(&mut self, headers: Vec<BlockHeader>) -> Result<Vec<SyncAction>, ChainError> {
        let now = self.service.now();
        let actions = self.sync.on_headers(
            &self.service.chain,
            &self.service.peer_manager,
            headers,
            now,
        )?;
        self.publish_state();
        Ok(actions)
    }

    pub fn on_get_headers(&self, locator: &[Bytes32], stop: &Bytes32) -> Vec<SyncAction> {
        self.sync.on_get_headers(&self.service.chain, locator, stop)
    }

    /// Timer hook. Also ends the session once the peer got discouraged by a
    /// header another connection's delivery unblocked.
    pub fn tick(&mut self) -> Result<Vec<SyncAction>, ChainError> {
        let discouraged = self.info().is_some_and(|peer| peer.should_disconnect());
        let actions = if discouraged {
            self.sync.on_discouraged()
        } else {
            self.sync.tick(&self.service.chain, self.service.now())?
        };
        self.publish_state();
        Ok(actions)
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        let peer_id = self.peer_id();
        self.sync.on_disconnect();
        self.service.peer_manager.lock().remove_peer(&peer_id);
        let dropped = self.service.chain.drop_peer_orphans(peer_id);
        debug!(peer = %peer_id, dropped_orphans = dropped, "Peer removed from sync service");
    }
}
