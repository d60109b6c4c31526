/// Per-peer header download.
///
/// One `HeaderSync` exists per connection. It never touches the socket: it
/// consumes what the peer sent and returns the `SyncAction`s the network layer
/// should perform. Headers go through the shared `ChainState`; violations go
/// to the `PeerManager`.
use containers::{block_work, BlockHeader, Bytes32, PeerId, U256};
use fork_choice::{AddOutcome, ChainError, ChainState, HeaderAcceptance, RejectReason};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::config::SyncConfig;
use super::misbehavior::Misbehavior;
use super::peer_manager::PeerManager;
use super::states::SyncState;
use crate::types::{DisconnectReason, OutboundRequest, SyncAction};

/// Low-work headers seen from a peer that were not stored. Lets a long chain
/// accumulate enough work across batches before any of it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Presync {
    last: Bytes32,
    work: U256,
}

#[derive(Debug)]
pub struct HeaderSync {
    peer: PeerId,
    config: SyncConfig,
    state: SyncState,
    /// When the outstanding getheaders was sent, if any.
    request_sent_at: Option<i64>,
    last_accepted: Option<Bytes32>,
    presync: Option<Presync>,
    /// The peer has shown a chain above the anti-DoS threshold; its batches
    /// are stored without the low-work check until it reports being done.
    work_proven: bool,
}

enum BatchEnd {
    Complete,
    Aborted,
}

impl HeaderSync {
    pub fn new(peer: PeerId, config: SyncConfig) -> Self {
        Self {
            peer,
            config,
            state: SyncState::Idle,
            request_sent_at: None,
            last_accepted: None,
            presync: None,
            work_proven: false,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn last_accepted(&self) -> Option<Bytes32> {
        self.last_accepted
    }

    pub fn has_request_in_flight(&self) -> bool {
        self.request_sent_at.is_some()
    }

    fn transition(&mut self, target: SyncState) {
        if self.state == target {
            return;
        }
        if !self.state.can_transition_to(target) {
            debug!(peer = %self.peer, from = ?self.state, to = ?target, "ignoring invalid sync transition");
            return;
        }
        trace!(peer = %self.peer, from = ?self.state, to = ?target, "sync state change");
        self.state = target;
    }

    /// Starts (or restarts) a download from our best chain.
    pub fn start(&mut self, chain: &ChainState, now: i64) -> Result<Vec<SyncAction>, ChainError> {
        let mut actions = Vec::new();
        if self.state.is_terminal() {
            return Ok(actions);
        }
        let locator = chain.locator()?;
        self.transition(SyncState::AwaitingHeaders);
        self.send_request(locator, now, &mut actions);
        Ok(actions)
    }

    fn send_request(&mut self, locator: Vec<Bytes32>, now: i64, actions: &mut Vec<SyncAction>) {
        debug!(peer = %self.peer, locator_len = locator.len(), first = ?locator.first(), "requesting headers");
        self.request_sent_at = Some(now);
        actions.push(SyncAction::Send(OutboundRequest::GetHeaders {
            locator,
            stop: Bytes32::zero(),
        }));
    }

    fn disconnect(&mut self, reason: DisconnectReason, actions: &mut Vec<SyncAction>) {
        info!(peer = %self.peer, %reason, "disconnecting peer");
        self.transition(SyncState::Disconnected);
        self.request_sent_at = None;
        actions.push(SyncAction::Disconnect(reason));
    }

    /// Scores the peer. Returns true when the session is over.
    fn punish(
        &mut self,
        peers: &Mutex<PeerManager>,
        misbehavior: Misbehavior,
        actions: &mut Vec<SyncAction>,
    ) -> bool {
        let verdict = peers.lock().misbehaving(&self.peer, misbehavior);
        if verdict.disconnect {
            self.disconnect(DisconnectReason::Misbehavior, actions);
            return true;
        }
        false
    }

    /// Charges the senders of buffered headers that failed validation once
    /// their parent arrived. Returns true when this session is over.
    fn score_released(
        &mut self,
        peers: &Mutex<PeerManager>,
        acceptance: &HeaderAcceptance,
        actions: &mut Vec<SyncAction>,
    ) -> bool {
        for orphan in &acceptance.released {
            let (Some(origin), AddOutcome::Rejected(reason)) = (orphan.origin, orphan.outcome) else {
                continue;
            };
            if reason.is_transient() {
                continue;
            }
            debug!(peer = %origin, hash = %orphan.hash, %reason, "buffered header failed validation");
            if origin == self.peer && !self.state.is_terminal() {
                self.punish(peers, misbehavior_for(reason), actions);
            } else {
                // Its own session notices the discouragement on the next tick.
                peers.lock().misbehaving(&origin, misbehavior_for(reason));
            }
        }
        self.state.is_terminal()
    }

    /// Violation that discards the whole batch and returns to `Idle`.
    fn reject_batch(
        &mut self,
        peers: &Mutex<PeerManager>,
        misbehavior: Misbehavior,
        actions: &mut Vec<SyncAction>,
    ) {
        self.presync = None;
        if !self.punish(peers, misbehavior, actions) {
            self.transition(SyncState::Idle);
        }
    }

    /// Handles a `headers` message.
    pub fn on_headers(
        &mut self,
        chain: &ChainState,
        peers: &Mutex<PeerManager>,
        headers: Vec<BlockHeader>,
        now: i64,
    ) -> Result<Vec<SyncAction>, ChainError> {
        let mut actions = Vec::new();
        if self.state.is_terminal() {
            return Ok(actions);
        }

        let solicited = self.request_sent_at.take().is_some();
        if solicited {
            self.transition(SyncState::ReceivingHeaders);
        }
        trace!(peer = %self.peer, count = headers.len(), solicited, "received headers");

        if headers.len() > self.config.max_headers_per_batch {
            self.reject_batch(peers, Misbehavior::OversizedHeaders, &mut actions);
            return Ok(actions);
        }

        let (Some(first), Some(last)) = (headers.first(), headers.last()) else {
            if solicited {
                self.finish();
            }
            return Ok(actions);
        };
        let full = headers.len() == self.config.max_headers_per_batch;

        if !is_continuous(&headers) {
            self.reject_batch(peers, Misbehavior::NonContinuousHeaders, &mut actions);
            return Ok(actions);
        }

        let presync = self.presync.filter(|presync| presync.last == first.prev_hash);
        let connects = chain.contains(&first.prev_hash);

        if !connects && presync.is_none() {
            if solicited {
                self.reject_batch(peers, Misbehavior::NonContinuousHeaders, &mut actions);
            } else {
                // An announcement we cannot connect yet: keep it and ask for
                // the headers in between.
                for header in &headers {
                    let acceptance = chain.add_header(*header, Some(self.peer))?;
                    if self.score_released(peers, &acceptance, &mut actions) {
                        return Ok(actions);
                    }
                }
                debug!(peer = %self.peer, count = headers.len(), "unconnected announcement, requesting path");
                let locator = chain.locator()?;
                self.transition(SyncState::AwaitingHeaders);
                self.send_request(locator, now, &mut actions);
            }
            return Ok(actions);
        }

        if !self.work_proven && !chain.is_initial_block_download() && !chain.contains(&last.hash()) {
            let threshold = chain.anti_dos_work_threshold();
            let work = match presync {
                Some(presync) if !connects => Some(
                    headers
                        .iter()
                        .fold(presync.work, |work, header| work.saturating_add(block_work(header.bits))),
                ),
                _ => chain.work_after(&headers),
            };

            if let Some(work) = work {
                if work < threshold {
                    if full {
                        debug!(peer = %self.peer, %work, %threshold, "low-work batch, continuing without storing");
                        self.presync = Some(Presync {
                            last: last.hash(),
                            work,
                        });
                        let mut locator = vec![last.hash()];
                        locator.extend(chain.locator()?);
                        self.transition(SyncState::ReceivingHeaders);
                        self.send_request(locator, now, &mut actions);
                    } else {
                        self.reject_batch(peers, Misbehavior::LowWorkHeaders, &mut actions);
                    }
                    return Ok(actions);
                }

                if !connects {
                    // Enough work shown, but the earlier batches were dropped.
                    // Fetch the chain again from our side and store it this time.
                    info!(peer = %self.peer, %work, "peer chain reached minimum work, downloading it");
                    self.presync = None;
                    self.work_proven = true;
                    let locator = chain.locator()?;
                    self.transition(SyncState::ReceivingHeaders);
                    self.send_request(locator, now, &mut actions);
                    return Ok(actions);
                }
            }
        }
        self.presync = None;

        match self.store_batch(chain, peers, &headers, &mut actions)? {
            BatchEnd::Aborted => {
                if !self.state.is_terminal() {
                    self.transition(SyncState::Idle);
                }
            }
            BatchEnd::Complete if full => {
                let locator = match self.last_accepted.and_then(|hash| chain.locator_from(&hash)) {
                    Some(locator) => locator,
                    None => chain.locator()?,
                };
                self.transition(SyncState::ReceivingHeaders);
                self.send_request(locator, now, &mut actions);
            }
            BatchEnd::Complete => {
                if solicited {
                    self.finish();
                }
            }
        }
        Ok(actions)
    }

    fn finish(&mut self) {
        self.work_proven = false;
        self.presync = None;
        self.transition(SyncState::Synced);
        debug!(peer = %self.peer, last = ?self.last_accepted, "peer has no more headers");
    }

    fn store_batch(
        &mut self,
        chain: &ChainState,
        peers: &Mutex<PeerManager>,
        headers: &[BlockHeader],
        actions: &mut Vec<SyncAction>,
    ) -> Result<BatchEnd, ChainError> {
        for header in headers {
            let acceptance = chain.add_header(*header, Some(self.peer))?;
            if self.score_released(peers, &acceptance, actions) {
                return Ok(BatchEnd::Aborted);
            }
            match acceptance.outcome {
                AddOutcome::Accepted | AddOutcome::Duplicate => {
                    self.last_accepted = Some(acceptance.hash);
                }
                AddOutcome::OrphanPending => {
                    debug!(peer = %self.peer, hash = %acceptance.hash, "batch header lost its parent");
                    return Ok(BatchEnd::Aborted);
                }
                AddOutcome::Rejected(reason) if reason.is_transient() => {
                    debug!(peer = %self.peer, hash = %acceptance.hash, %reason, "header not yet acceptable, dropping batch");
                    return Ok(BatchEnd::Aborted);
                }
                AddOutcome::Rejected(reason) => {
                    debug!(peer = %self.peer, hash = %acceptance.hash, %reason, "invalid header in batch");
                    self.punish(peers, misbehavior_for(reason), actions);
                    return Ok(BatchEnd::Aborted);
                }
            }
        }
        Ok(BatchEnd::Complete)
    }

    /// Serves a `getheaders` request from our active chain.
    pub fn on_get_headers(
        &self,
        chain: &ChainState,
        locator: &[Bytes32],
        stop: &Bytes32,
    ) -> Vec<SyncAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        let headers = chain.headers_after_locator(locator, stop, self.config.max_headers_per_batch);
        trace!(peer = %self.peer, count = headers.len(), "serving headers");
        vec![SyncAction::Send(OutboundRequest::Headers(headers))]
    }

    /// Timer hook: disconnects stalled peers and restarts idle ones.
    pub fn tick(&mut self, chain: &ChainState, now: i64) -> Result<Vec<SyncAction>, ChainError> {
        let mut actions = Vec::new();
        if let Some(sent_at) = self.request_sent_at {
            if now - sent_at >= self.config.header_request_timeout_secs {
                self.disconnect(DisconnectReason::Stalled, &mut actions);
            }
            return Ok(actions);
        }
        if self.state == SyncState::Idle {
            return self.start(chain, now);
        }
        Ok(actions)
    }

    /// The peer crossed the discouragement threshold outside this session,
    /// through headers it had left in the orphan buffer.
    pub fn on_discouraged(&mut self) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        if !self.state.is_terminal() {
            self.disconnect(DisconnectReason::Misbehavior, &mut actions);
        }
        actions
    }

    /// The connection went away.
    pub fn on_disconnect(&mut self) {
        self.request_sent_at = None;
        self.presync = None;
        self.transition(SyncState::Disconnected);
    }
}

fn misbehavior_for(reason: RejectReason) -> Misbehavior {
    if reason.is_invalid_pow() {
        Misbehavior::InvalidPow
    } else {
        Misbehavior::InvalidHeader
    }
}

/// Every header after the first must build on the one before it.
pub fn is_continuous(headers: &[BlockHeader]) -> bool {
    headers
        .windows(2)
        .all(|pair| pair[1].prev_hash == pair[0].hash())
}
