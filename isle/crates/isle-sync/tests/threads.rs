//! Spawning, joining and shutting down

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use isle_sync::{CoreId, Fabric, FabricConfig, SyncError};

#[test]
fn test_spawn_round_robin_skips_caller() {
    let fabric = common::fabric(3);
    let main = common::core(&fabric, 0, 0);

    let placed: Vec<CoreId> = (0..4)
        .map(|_| {
            let handle = main.spawn(|_| {}).unwrap();
            let core = handle.core();
            handle.join().unwrap();
            core
        })
        .collect();

    assert!(placed.iter().all(|c| *c != main.id()));
    assert_eq!(placed[0], CoreId::new(0, 1));
    assert_eq!(placed[1], CoreId::new(0, 2));
    assert_eq!(fabric.stats().spawns, 4);
}

#[test]
fn test_spawned_thread_runs_on_its_core() {
    let fabric = common::fabric(2);
    let main = common::core(&fabric, 0, 0);
    let seen = Arc::new(AtomicU32::new(u32::MAX));

    let handle = {
        let seen = seen.clone();
        main.spawn(move |core| seen.store(core.id().owner_code(), Ordering::SeqCst))
            .unwrap()
    };
    let placed = handle.core();
    handle.join().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), placed.owner_code());
}

#[test]
fn test_disabled_islands_get_no_threads() {
    let config = FabricConfig {
        islands: 2,
        cores_per_island: 2,
        managers: 1,
        disabled_islands: vec![1],
        ..FabricConfig::single_island(2)
    };
    let fabric = Fabric::new(config).unwrap();
    let main = common::core(&fabric, 0, 0);
    for _ in 0..4 {
        let handle = main.spawn(|_| {}).unwrap();
        assert_eq!(handle.core(), CoreId::new(0, 1));
        handle.join().unwrap();
    }
}

#[test]
fn test_join_reports_panic() {
    let fabric = common::fabric(2);
    let main = common::core(&fabric, 0, 0);
    let handle = main.spawn(|_| panic!("boom")).unwrap();
    let thread = handle.thread();
    assert!(matches!(handle.join(), Err(SyncError::ThreadPanicked(t)) if t == thread));
}

#[test]
fn test_nested_spawn() {
    let fabric = common::fabric(3);
    let main = common::core(&fabric, 0, 0);
    let count = Arc::new(AtomicU32::new(0));

    let outer = {
        let count = count.clone();
        main.spawn(move |core| {
            let inner = {
                let count = count.clone();
                core.spawn(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            };
            inner.join().unwrap();
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
    };
    outer.join().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_shutdown_stops_new_work() {
    let fabric = common::fabric(2);
    let main = common::core(&fabric, 0, 0);
    fabric.shutdown();
    fabric.shutdown();

    assert!(matches!(main.spawn(|_| {}), Err(SyncError::Disconnected(_))));
    assert!(matches!(
        main.request(isle_sync::OpCode::RwWrite, 1),
        Err(SyncError::Disconnected(_))
    ));
}
