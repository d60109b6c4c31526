use std::collections::VecDeque;
use std::sync::Arc;

use containers::BlockHeader;
use validator::MockableClock;

use super::support::*;
use crate::sync::{Misbehavior, PeerSession, Refusal, SyncConfig, SyncService, SyncState};
use crate::types::{DisconnectReason, Direction, NetPermissions, OutboundRequest, SyncAction};

fn node(clock: &Arc<MockableClock>, headers: &[BlockHeader], config: SyncConfig) -> SyncService {
    let chain = chain(clock.clone());
    populate(&chain, headers);
    service(chain, config)
}

/// Both ends of one in-process connection.
struct Link {
    dialer: PeerSession,
    listener: PeerSession,
}

impl Link {
    fn new(dialer: &SyncService, listener: &SyncService, octet: u8) -> Self {
        Self {
            dialer: dialer
                .connect(addr(octet), Direction::Outbound, NetPermissions::default())
                .unwrap(),
            listener: listener
                .connect(addr(octet + 100), Direction::Inbound, NetPermissions::default())
                .unwrap(),
        }
    }

    /// Starts both sides and shuttles messages until neither has anything
    /// left to say.
    fn exchange(&mut self) {
        let mut queue: VecDeque<(bool, SyncAction)> = VecDeque::new();
        queue.extend(self.dialer.start().unwrap().into_iter().map(|action| (true, action)));
        queue.extend(self.listener.start().unwrap().into_iter().map(|action| (false, action)));

        while let Some((from_dialer, action)) = queue.pop_front() {
            let target = if from_dialer {
                &mut self.listener
            } else {
                &mut self.dialer
            };
            let replies = deliver(target, action);
            queue.extend(replies.into_iter().map(|reply| (!from_dialer, reply)));
        }
    }
}

fn deliver(target: &mut PeerSession, action: SyncAction) -> Vec<SyncAction> {
    match action {
        SyncAction::Send(OutboundRequest::GetHeaders { locator, stop }) => {
            target.on_get_headers(&locator, &stop)
        }
        SyncAction::Send(OutboundRequest::Headers(headers)) => target.on_headers(headers).unwrap(),
        SyncAction::Disconnect(reason) => panic!("unexpected disconnect: {reason}"),
    }
}

#[test]
fn three_nodes_converge_on_most_work() {
    let clock = clock();
    let config = SyncConfig {
        max_headers_per_batch: 4,
        ..SyncConfig::default()
    };
    let short = build_chain(&genesis(), 5, 1);
    let middle = build_chain(&genesis(), 10, 2);
    let long = build_chain(&genesis(), 15, 3);

    let a = node(&clock, &short, config);
    let b = node(&clock, &middle, config);
    let c = node(&clock, &long, config);

    for (dialer, listener, octet) in [(&a, &b, 1), (&b, &c, 2), (&a, &c, 3)] {
        let mut link = Link::new(dialer, listener, octet);
        link.exchange();
        assert_eq!(link.dialer.state(), SyncState::Synced);
        assert_eq!(link.listener.state(), SyncState::Synced);
        assert_eq!(link.dialer.info().unwrap().score, 0);
        assert_eq!(link.listener.info().unwrap().score, 0);
    }

    let expected = long[14].hash();
    for node in [&a, &b, &c] {
        let tip = node.chain().best_tip().unwrap();
        assert_eq!(tip.hash, expected);
        assert_eq!(tip.height, 15);
        assert_eq!(node.chain().orphan_count(), 0);
        node.chain().audit().unwrap();
    }
    assert_eq!(a.chain().header_count(), 1 + 5 + 10 + 15);
}

#[test]
fn session_publishes_sync_state() {
    let clock = clock();
    let node = node(&clock, &[], SyncConfig::default());
    let mut session = node
        .connect(addr(1), Direction::Inbound, NetPermissions::default())
        .unwrap();

    assert_eq!(session.info().unwrap().sync_state, SyncState::Idle);
    session.start().unwrap();
    assert_eq!(
        node.peer_info(&session.peer_id()).unwrap().sync_state,
        SyncState::AwaitingHeaders
    );
    session.on_headers(Vec::new()).unwrap();
    assert_eq!(session.info().unwrap().sync_state, SyncState::Synced);
    assert_eq!(node.peers().len(), 1);
}

#[test]
fn dropping_session_forgets_peer_and_its_orphans() {
    let clock = clock();
    let node = node(&clock, &[], SyncConfig::default());
    let source = build_chain(&genesis(), 3, 1);

    let mut session = node
        .connect(addr(1), Direction::Inbound, NetPermissions::default())
        .unwrap();
    session.on_headers(source[2..].to_vec()).unwrap();
    assert_eq!(node.chain().orphan_count(), 1);
    assert_eq!(node.peer_count(), 1);

    drop(session);
    assert_eq!(node.peer_count(), 0);
    assert_eq!(node.chain().orphan_count(), 0);
}

#[test]
fn discouraged_address_cannot_reconnect() {
    let clock = clock();
    let node = node(&clock, &[], SyncConfig::default());

    let session = node
        .connect(addr(7), Direction::Inbound, NetPermissions::default())
        .unwrap();
    let verdict = node
        .peer_manager()
        .lock()
        .misbehaving(&session.peer_id(), Misbehavior::InvalidPow);
    assert!(verdict.disconnect);
    drop(session);

    assert!(matches!(
        node.connect(addr(7), Direction::Inbound, NetPermissions::default()),
        Err(Refusal::Discouraged)
    ));
    assert!(node
        .connect(addr(7), Direction::Outbound, NetPermissions::MANUAL)
        .is_ok());
}

#[test]
fn sender_of_invalid_orphan_is_dropped_on_next_tick() {
    let clock = clock();
    let node = node(&clock, &[], SyncConfig::default());
    let parent = mine_child(&genesis(), 1);
    let bad = unmined_child(&parent, 1);

    let mut announcer = node
        .connect(addr(1), Direction::Inbound, NetPermissions::default())
        .unwrap();
    let mut honest = node
        .connect(addr(2), Direction::Inbound, NetPermissions::default())
        .unwrap();

    announcer.on_headers(vec![bad]).unwrap();
    honest.start().unwrap();
    honest.on_headers(vec![parent]).unwrap();

    assert_eq!(honest.info().unwrap().score, 0);
    assert_eq!(announcer.info().unwrap().score, 100);
    assert_eq!(
        announcer.tick().unwrap(),
        vec![SyncAction::Disconnect(DisconnectReason::Misbehavior)]
    );
    assert_eq!(announcer.state(), SyncState::Disconnected);
    assert!(!honest.tick().unwrap().iter().any(SyncAction::is_disconnect));
}
