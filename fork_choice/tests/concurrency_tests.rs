mod common;

use std::thread;

use common::*;
use containers::PeerId;
use fork_choice::AddOutcome;
use pretty_assertions::assert_eq;

#[test]
fn ten_peers_deliver_the_same_chain_concurrently() {
    let (state, _) = regtest_state();
    let chain = build_chain(&genesis(), 50, 1);

    thread::scope(|scope| {
        for peer in 0..10u64 {
            let state = &state;
            let chain = &chain;
            scope.spawn(move || {
                // Odd peers deliver back to front to exercise the orphan path.
                let ordered: Vec<_> = if peer % 2 == 0 {
                    chain.clone()
                } else {
                    chain.iter().rev().copied().collect()
                };
                for header in ordered {
                    let outcome = state.add_header(header, Some(PeerId(peer))).unwrap().outcome;
                    assert!(!matches!(outcome, AddOutcome::Rejected(_)), "{outcome:?}");
                }
            });
        }
    });

    let tip = state.best_tip().unwrap();
    assert_eq!(tip.height, 50);
    assert_eq!(tip.hash, chain[49].hash());
    assert_eq!(state.header_count(), 51);
    assert_eq!(state.tips().len(), 1);
    assert_eq!(state.orphan_count(), 0);
    state.audit().unwrap();
}

#[test]
fn competing_forks_from_many_threads_pick_heaviest() {
    let (state, _) = regtest_state();
    let forks: Vec<_> = (1..=6u8)
        .map(|tag| build_chain(&genesis(), 10 + tag as usize, tag))
        .collect();

    thread::scope(|scope| {
        for fork in &forks {
            let state = &state;
            scope.spawn(move || {
                for header in fork {
                    state.add_header(*header, None).unwrap();
                }
            });
        }
    });

    let heaviest = forks.last().unwrap();
    assert_eq!(state.best_tip().unwrap().hash, heaviest.last().unwrap().hash());
    assert_eq!(state.tips().len(), forks.len());
    state.audit().unwrap();
}
