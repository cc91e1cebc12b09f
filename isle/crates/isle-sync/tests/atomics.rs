//! Atomics updated concurrently from spawned threads

mod common;

use std::sync::Arc;

use isle_sync::{AtomicInteger2, AtomicReference, SpawnHandle};

const THREADS: usize = 6;
const ROUNDS: i32 = 40;

#[test]
fn test_concurrent_increments() {
    let fabric = common::fabric(4);
    let main = common::core(&fabric, 0, 0);
    let counter = Arc::new(AtomicInteger2::new(0));

    let spawned: Vec<SpawnHandle> = (0..THREADS)
        .map(|_| {
            let counter = counter.clone();
            main.spawn(move |core| {
                for _ in 0..ROUNDS {
                    counter.increment_and_get(&core).unwrap();
                }
            })
            .unwrap()
        })
        .collect();
    for handle in spawned {
        handle.join().unwrap();
    }

    assert_eq!(counter.get(&main).unwrap(), THREADS as i32 * ROUNDS);
}

#[test]
fn test_compare_and_set_loop_loses_no_update() {
    let fabric = common::two_islands(2);
    let main = common::core(&fabric, 0, 0);
    let counter = Arc::new(AtomicInteger2::new(100));

    let spawned: Vec<SpawnHandle> = (0..THREADS)
        .map(|_| {
            let counter = counter.clone();
            main.spawn(move |core| {
                for _ in 0..ROUNDS {
                    loop {
                        let seen = counter.get(&core).unwrap();
                        if counter.compare_and_set(&core, seen, seen - 1).unwrap() {
                            break;
                        }
                    }
                }
            })
            .unwrap()
        })
        .collect();
    for handle in spawned {
        handle.join().unwrap();
    }

    assert_eq!(counter.get(&main).unwrap(), 100 - THREADS as i32 * ROUNDS);
}

#[test]
fn test_reference_swaps_are_linear() {
    let fabric = common::fabric(3);
    let main = common::core(&fabric, 0, 0);
    let slot = Arc::new(AtomicReference::new(Vec::<u32>::new()));

    let spawned: Vec<SpawnHandle> = (0..3u32)
        .map(|id| {
            let slot = slot.clone();
            main.spawn(move |core| {
                for round in 0..10 {
                    loop {
                        let seen = slot.get(&core).unwrap();
                        let mut next = seen.clone();
                        next.push(id * 100 + round);
                        if slot.compare_and_set(&core, &seen, next).unwrap() {
                            break;
                        }
                    }
                }
            })
            .unwrap()
        })
        .collect();
    for handle in spawned {
        handle.join().unwrap();
    }

    let mut all = slot.get(&main).unwrap();
    assert_eq!(all.len(), 30);
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 30);
}
