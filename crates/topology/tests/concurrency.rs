//! Picks racing reconciliations and handle state reports across threads.
//!
//! Reader threads pick from whatever generation is current while one thread
//! reconciles address lists and another flips handle states. Every generation
//! a reader observes must be internally consistent, and once the writers stop
//! the published generation must match the handles that are Ready.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use inferadb_ledger_topology::{
    ConnectionManager, ConnectivityState, RankedAddress, mock::MockConnectionFactory,
};

const POOL: usize = 8;
const READERS: usize = 4;
const ROUNDS: usize = 2_000;

fn address(i: usize) -> String {
    format!("node{i}:5000")
}

/// A rotating window over the pool, ranked in window order.
fn window(round: usize) -> Vec<RankedAddress> {
    let len = 1 + round % POOL;
    (0..len)
        .map(|offset| address((round + offset) % POOL))
        .enumerate()
        .map(|(rank, address)| RankedAddress::new(address, rank))
        .collect()
}

fn hammer(manager: &ConnectionManager<MockConnectionFactory>, factory: &MockConnectionFactory) {
    let stop = AtomicBool::new(false);
    let picks = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..READERS {
            scope.spawn(|| {
                while !stop.load(Ordering::Acquire) {
                    let generation = manager.load_picker();
                    let addresses: Vec<&str> =
                        generation.iter().map(|handle| handle.address()).collect();
                    let distinct: HashSet<&str> = addresses.iter().copied().collect();
                    assert_eq!(distinct.len(), addresses.len(), "duplicates in {addresses:?}");
                    assert!(addresses.len() <= POOL);

                    if let Ok(handle) = generation.pick() {
                        assert!(distinct.contains(handle.address()));
                        picks.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }

        let flipper = scope.spawn(|| {
            for round in 0..ROUNDS {
                let state = if round % 3 == 0 {
                    ConnectivityState::Failing
                } else {
                    ConnectivityState::Ready
                };
                factory.set_state(&address(round % POOL), state);
            }
        });
        let reconciler = scope.spawn(|| {
            for round in 0..ROUNDS {
                manager.update_addresses(&window(round));
            }
        });

        let flipped = flipper.join();
        let reconciled = reconciler.join();
        stop.store(true, Ordering::Release);
        assert!(flipped.is_ok() && reconciled.is_ok(), "writer thread panicked");
    });

    assert!(picks.load(Ordering::Relaxed) > 0);
}

#[test]
fn test_concurrent_picks_reconciles_and_state_reports() {
    let factory = MockConnectionFactory::auto_ready();
    let manager = ConnectionManager::new(factory.clone());
    let (done_tx, done_rx) = mpsc::channel();

    let worker = {
        let manager = manager.clone();
        let factory = factory.clone();
        thread::spawn(move || {
            hammer(&manager, &factory);
            let _ = done_tx.send(());
        })
    };

    assert!(done_rx.recv_timeout(Duration::from_secs(60)).is_ok(), "threads deadlocked");
    worker.join().unwrap();

    // Final mutation: every address present, even nodes Ready, odd nodes Failing.
    let full: Vec<RankedAddress> =
        (0..POOL).map(|i| RankedAddress::new(address(i), i)).collect();
    manager.update_addresses(&full);
    for i in 0..POOL {
        let state =
            if i % 2 == 0 { ConnectivityState::Ready } else { ConnectivityState::Failing };
        assert!(factory.set_state(&address(i), state));
    }

    let expected: Vec<String> = (0..POOL).step_by(2).map(address).collect();
    let ready: Vec<String> = (0..POOL)
        .filter(|i| manager.handle_state(&address(*i)) == Some(ConnectivityState::Ready))
        .map(address)
        .collect();
    let published: Vec<String> =
        manager.load_picker().iter().map(|handle| handle.address().to_owned()).collect();

    assert_eq!(ready, expected);
    assert_eq!(published, expected);
    assert_eq!(manager.handle_count(), POOL);
    assert_eq!(manager.connectivity(), ConnectivityState::Ready);
}

#[test]
fn test_old_generation_stays_valid_after_shutdown() {
    let factory = MockConnectionFactory::auto_ready();
    let manager = ConnectionManager::new(factory.clone());
    manager.update_addresses(&window(POOL - 1));
    let held = manager.load_picker();

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..10_000 {
                held.pick().unwrap();
            }
        });
        scope.spawn(|| manager.shutdown());
    });

    assert_eq!(held.len(), POOL);
    assert_eq!(held.picks(), 10_000);
    assert!(manager.load_picker().is_empty());
    assert_eq!(factory.shut_down().len(), POOL);
}

#[test]
fn test_stale_reports_race_with_removal() {
    let factory = MockConnectionFactory::new();
    let manager = ConnectionManager::new(factory.clone());
    let all: Vec<RankedAddress> = (0..POOL).map(|i| RankedAddress::new(address(i), i)).collect();
    manager.update_addresses(&all);
    let stale: Vec<_> = (0..POOL).map(|i| factory.handle(&address(i)).unwrap()).collect();

    let reports = Arc::new(AtomicUsize::new(0));
    thread::scope(|scope| {
        for handle in &stale {
            let reports = Arc::clone(&reports);
            scope.spawn(move || {
                for _ in 0..500 {
                    handle.report(ConnectivityState::Ready);
                    handle.report(ConnectivityState::Connecting);
                    reports.fetch_add(2, Ordering::Relaxed);
                }
            });
        }
        scope.spawn(|| manager.update_addresses(&[]));
    });

    assert_eq!(reports.load(Ordering::Relaxed), POOL * 1_000);
    assert_eq!(manager.handle_count(), 0);
    assert!(manager.load_picker().is_empty());

    // Re-adding the addresses creates fresh handles; the old ones stay ignored.
    manager.update_addresses(&all);
    for handle in &stale {
        handle.report(ConnectivityState::Ready);
    }
    assert_eq!(manager.handle_count(), POOL);
    assert_eq!(manager.connectivity(), ConnectivityState::Failing);
    assert!(manager.load_picker().is_empty());
}
