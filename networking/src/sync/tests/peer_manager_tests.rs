use pretty_assertions::assert_eq;
use rstest::rstest;

use super::support::*;
use crate::sync::{Misbehavior, Refusal, SyncState, Verdict, DISCOURAGEMENT_THRESHOLD};
use crate::types::{Direction, NetPermissions};
use containers::PeerId;

#[test]
fn peers_get_sequential_ids() {
    let peers = peer_manager(clock());
    let mut peers = peers.lock();
    let first = peers.add_peer(addr(1), Direction::Inbound, NetPermissions::default());
    let second = peers.add_peer(addr(2), Direction::Outbound, NetPermissions::default());

    assert_ne!(first, second);
    assert_eq!(peers.peer_count(), 2);

    let peer = peers.get_peer(&second).unwrap();
    assert_eq!(peer.address, addr(2));
    assert_eq!(peer.direction, Direction::Outbound);
    assert_eq!(peer.score, 0);
    assert_eq!(peer.sync_state, SyncState::Idle);
    assert_eq!(peer.connected_at, NOW);

    assert!(peers.remove_peer(&first).is_some());
    assert!(peers.get_peer(&first).is_none());
    assert_eq!(peers.peer_count(), 1);
}

#[rstest]
#[case::oversized(Misbehavior::OversizedHeaders, 20)]
#[case::non_continuous(Misbehavior::NonContinuousHeaders, 20)]
#[case::invalid_pow(Misbehavior::InvalidPow, 100)]
#[case::invalid_header(Misbehavior::InvalidHeader, 100)]
#[case::low_work(Misbehavior::LowWorkHeaders, 10)]
fn penalties(#[case] misbehavior: Misbehavior, #[case] penalty: u32) {
    assert_eq!(misbehavior.penalty(), penalty);

    let peers = peer_manager(clock());
    let mut peers = peers.lock();
    let peer = peers.add_peer(addr(1), Direction::Inbound, NetPermissions::default());
    let verdict = peers.misbehaving(&peer, misbehavior);
    assert_eq!(verdict.score, penalty);
    assert_eq!(verdict.disconnect, penalty >= DISCOURAGEMENT_THRESHOLD);
}

#[test]
fn score_accumulates_to_threshold() {
    let peers = peer_manager(clock());
    let mut peers = peers.lock();
    let peer = peers.add_peer(addr(1), Direction::Inbound, NetPermissions::default());

    for expected in [20, 40, 60, 80] {
        let verdict = peers.misbehaving(&peer, Misbehavior::NonContinuousHeaders);
        assert_eq!(
            verdict,
            Verdict {
                score: expected,
                disconnect: false
            }
        );
    }
    assert!(!peers.is_discouraged(addr(1).ip()));

    let verdict = peers.misbehaving(&peer, Misbehavior::NonContinuousHeaders);
    assert_eq!(
        verdict,
        Verdict {
            score: 100,
            disconnect: true
        }
    );
    assert!(peers.get_peer(&peer).unwrap().discouraged);
    assert!(peers.is_discouraged(addr(1).ip()));

    // Scores never go down, and every later violation keeps asking to disconnect.
    let verdict = peers.misbehaving(&peer, Misbehavior::LowWorkHeaders);
    assert_eq!(verdict.score, 110);
    assert!(verdict.disconnect);
}

#[rstest]
#[case::manual(NetPermissions::MANUAL)]
#[case::no_ban(NetPermissions::NO_BAN)]
fn exempt_peers_keep_connection(#[case] permissions: NetPermissions) {
    let peers = peer_manager(clock());
    let mut peers = peers.lock();
    let peer = peers.add_peer(addr(1), Direction::Outbound, permissions);

    let verdict = peers.misbehaving(&peer, Misbehavior::InvalidPow);
    assert_eq!(verdict.score, 100);
    assert!(!verdict.disconnect);
    assert!(!peers.get_peer(&peer).unwrap().discouraged);
    assert!(!peers.is_discouraged(addr(1).ip()));
}

#[test]
fn unknown_peer_is_ignored() {
    let peers = peer_manager(clock());
    let verdict = peers.lock().misbehaving(&PeerId(42), Misbehavior::InvalidPow);
    assert_eq!(
        verdict,
        Verdict {
            score: 0,
            disconnect: false
        }
    );
}

#[test]
fn discouraged_address_refused_except_for_operator_dials() {
    let peers = peer_manager(clock());
    let mut peers = peers.lock();
    let peer = peers.add_peer(addr(1), Direction::Inbound, NetPermissions::default());
    peers.misbehaving(&peer, Misbehavior::InvalidHeader);
    let ip = addr(1).ip();

    assert_eq!(
        peers.check_admission(ip, Direction::Inbound, NetPermissions::default()),
        Err(Refusal::Discouraged)
    );
    assert_eq!(
        peers.check_admission(ip, Direction::Outbound, NetPermissions::default()),
        Err(Refusal::Discouraged)
    );
    // A manual flag on an inbound connection does not help.
    assert_eq!(
        peers.check_admission(ip, Direction::Inbound, NetPermissions::MANUAL),
        Err(Refusal::Discouraged)
    );
    assert_eq!(
        peers.check_admission(ip, Direction::Outbound, NetPermissions::MANUAL),
        Ok(())
    );
    assert_eq!(
        peers.check_admission(ip, Direction::Inbound, NetPermissions::NO_BAN),
        Ok(())
    );
    assert_eq!(
        peers.check_admission(addr(2).ip(), Direction::Inbound, NetPermissions::default()),
        Ok(())
    );

    peers.clear_discouraged();
    assert_eq!(
        peers.check_admission(ip, Direction::Inbound, NetPermissions::default()),
        Ok(())
    );
}

#[test]
fn discouragement_decays() {
    let clock = clock();
    let peers = peer_manager(clock.clone());
    let mut peers = peers.lock();
    let peer = peers.add_peer(addr(1), Direction::Inbound, NetPermissions::default());
    peers.misbehaving(&peer, Misbehavior::InvalidPow);
    assert!(peers.is_discouraged(addr(1).ip()));

    clock.set(NOW + 24 * 60 * 60 + 6 * 60 * 60);
    assert!(!peers.is_discouraged(addr(1).ip()));
}

#[test]
fn bans_refuse_everyone_but_no_ban() {
    let clock = clock();
    let peers = peer_manager(clock.clone());
    let mut peers = peers.lock();
    let ip = addr(3).ip();
    let connected = peers.add_peer(addr(3), Direction::Inbound, NetPermissions::default());
    let exempt = peers.add_peer(addr(3), Direction::Inbound, NetPermissions::NO_BAN);

    peers.ban(ip, 3600);
    assert!(peers.is_banned(&ip));
    assert_eq!(
        peers.check_admission(ip, Direction::Outbound, NetPermissions::MANUAL),
        Err(Refusal::Banned)
    );
    assert_eq!(
        peers.check_admission(ip, Direction::Inbound, NetPermissions::NO_BAN),
        Ok(())
    );
    assert_eq!(peers.banned_peers(), vec![connected]);
    assert!(!peers.banned_peers().contains(&exempt));

    clock.set(NOW + 3600);
    assert!(!peers.is_banned(&ip));

    peers.ban(ip, 0);
    assert!(peers.unban(&ip));
    assert!(!peers.is_banned(&ip));
}

#[test]
fn sync_state_is_tracked() {
    let peers = peer_manager(clock());
    let mut peers = peers.lock();
    let peer = peers.add_peer(addr(1), Direction::Inbound, NetPermissions::default());
    peers.set_sync_state(&peer, SyncState::Synced);
    assert_eq!(peers.get_peer(&peer).unwrap().sync_state, SyncState::Synced);
}

#[test]
fn state_transitions() {
    use SyncState::*;

    assert!(Idle.can_transition_to(AwaitingHeaders));
    assert!(AwaitingHeaders.can_transition_to(ReceivingHeaders));
    assert!(ReceivingHeaders.can_transition_to(ReceivingHeaders));
    assert!(ReceivingHeaders.can_transition_to(Synced));
    assert!(Synced.can_transition_to(AwaitingHeaders));
    assert!(!Idle.can_transition_to(Synced));
    assert!(!AwaitingHeaders.can_transition_to(Synced));
    for target in [Idle, AwaitingHeaders, ReceivingHeaders, Synced, Disconnected] {
        assert!(!Disconnected.can_transition_to(target));
    }
    assert!(Disconnected.is_terminal());
}
