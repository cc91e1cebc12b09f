//! GC Hazard Tests - Collections During Relocation
//!
//! Relocation runs on a buffer the collector may move. These tests force
//! collections at safepoints and check the loader notices and retries.

mod common;

use common::{bootstrap, config, LoaderFixture, BOOTSTRAP_SIZE, WORD};
use isle_mem::address::Address;
use isle_mem::heap::{BufferId, MemorySpace, SimulatedHeap};
use isle_mem::{ErrorCategory, MemError, ObjectMemoryLoader, Result, BOOTSTRAP_URI};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Heap that collects at the first safepoint of the first `moves` loads
struct MovingHeap {
    inner: SimulatedHeap,
    moves: AtomicUsize,
    armed: AtomicBool,
}

impl MemorySpace for MovingHeap {
    fn allocate(&self, size: usize) -> Result<BufferId> {
        if self
            .moves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.armed.store(true, Ordering::SeqCst);
        }
        self.inner.allocate(size)
    }
    fn address_of(&self, buffer: BufferId) -> Result<Address> {
        self.inner.address_of(buffer)
    }
    fn free(&self, buffer: BufferId) {
        self.inner.free(buffer)
    }
    fn pin(&self, buffer: BufferId) -> Result<Address> {
        self.inner.pin(buffer)
    }
    fn unpin(&self, buffer: BufferId) {
        self.inner.unpin(buffer)
    }
    fn allocate_read_only(&self, size: usize) -> Result<Address> {
        self.inner.allocate_read_only(size)
    }
    fn free_read_only(&self, address: Address, size: usize) {
        self.inner.free_read_only(address, size)
    }
    fn collect_garbage(&self) {
        self.inner.collect_garbage()
    }
    fn request_collection(&self) {
        self.inner.request_collection()
    }
    fn safepoint(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.inner.collect_garbage();
        }
        self.inner.safepoint()
    }
    fn collections(&self) -> u64 {
        self.inner.collections()
    }
}

fn moving_loader(moves: usize, retries: u32) -> ObjectMemoryLoader {
    moving_heap_loader(moves, retries).0
}

fn moving_heap_loader(moves: usize, retries: u32) -> (ObjectMemoryLoader, Arc<MovingHeap>) {
    let mut config = config();
    config.gc_retry_limit = retries;
    let heap = Arc::new(MovingHeap {
        inner: SimulatedHeap::new(&config).unwrap(),
        moves: AtomicUsize::new(moves),
        armed: AtomicBool::new(false),
    });
    let loader = ObjectMemoryLoader::with_space(config, heap.clone()).unwrap();
    loader
        .resolver()
        .register(BOOTSTRAP_URI, bootstrap().to_bytes().unwrap())
        .unwrap();
    (loader, heap)
}

#[test]
fn test_stress_mode_detects_movement() {
    let fixture = LoaderFixture::with(|c| c.gc_stress = true);
    fixture.register(BOOTSTRAP_URI, &bootstrap());

    let err = fixture.loader.load_uri(BOOTSTRAP_URI, false).unwrap_err();
    assert!(matches!(err, MemError::GcDuringRelocation { .. }), "{:?}", err);
    assert_eq!(err.category(), ErrorCategory::ConcurrencyHazard);
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("garbage collection occurred"));
}

#[test]
fn test_stress_mode_checks_read_only_loads() {
    let fixture = LoaderFixture::with(|c| c.gc_stress = true);
    fixture.register(BOOTSTRAP_URI, &bootstrap());

    let err = fixture.loader.load_uri(BOOTSTRAP_URI, true).unwrap_err();
    assert!(matches!(err, MemError::GcDuringRelocation { .. }));
    assert!(fixture.loader.registry().is_empty());
}

#[test]
fn test_no_retry_by_default() {
    let loader = moving_loader(1, 0);
    let err = loader.load_uri(BOOTSTRAP_URI, false).unwrap_err();
    assert!(matches!(err, MemError::GcDuringRelocation { .. }));
}

#[test]
fn test_retry_after_movement() {
    let loader = moving_loader(1, 1);
    let file = loader.load_uri(BOOTSTRAP_URI, false).unwrap();
    let memory = file.memory().unwrap();
    assert_eq!(memory.read_word(0), Some(memory.start().to_u64() + 2 * WORD as u64));
}

#[test]
fn test_retries_exhausted() {
    let (loader, heap) = moving_heap_loader(3, 2);
    let err = loader.load_uri(BOOTSTRAP_URI, true).unwrap_err();
    assert!(matches!(err, MemError::GcDuringRelocation { .. }));
    // three aborted attempts, no read-only memory left behind
    assert_eq!(heap.inner.read_only_used(), 0);
    assert_eq!(heap.inner.live_buffers(), 0);
}

#[test]
fn test_read_only_retry_keeps_one_copy() {
    let (loader, heap) = moving_heap_loader(2, 2);
    let file = loader.load_uri(BOOTSTRAP_URI, true).unwrap();
    let memory = file.memory().unwrap();
    assert!(memory.is_read_only());
    assert_eq!(heap.inner.read_only_used(), BOOTSTRAP_SIZE);
    assert_eq!(heap.inner.live_buffers(), 0);
    assert_eq!(heap.inner.pinned_buffers(), 0);
}

#[test]
fn test_failed_load_releases_buffer() {
    let mut config = config();
    config.gc_stress = true;
    let heap = Arc::new(SimulatedHeap::new(&config).unwrap());
    let loader = ObjectMemoryLoader::with_space(config, heap.clone()).unwrap();
    loader
        .resolver()
        .register(BOOTSTRAP_URI, bootstrap().to_bytes().unwrap())
        .unwrap();

    assert!(loader.load_uri(BOOTSTRAP_URI, false).is_err());
    assert_eq!(heap.live_buffers(), 0);
    assert_eq!(heap.pinned_buffers(), 0);
    assert_eq!(heap.read_only_used(), 0);
}

#[test]
fn test_failed_read_only_loads_release_target() {
    let mut config = config();
    config.gc_stress = true;
    let heap = Arc::new(SimulatedHeap::new(&config).unwrap());
    let loader = ObjectMemoryLoader::with_space(config, heap.clone()).unwrap();
    loader
        .resolver()
        .register(BOOTSTRAP_URI, bootstrap().to_bytes().unwrap())
        .unwrap();

    for _ in 0..3 {
        let err = loader.load_uri(BOOTSTRAP_URI, true).unwrap_err();
        assert!(matches!(err, MemError::GcDuringRelocation { .. }));
    }
    assert_eq!(heap.read_only_used(), 0);
    assert_eq!(heap.live_buffers(), 0);
}

#[test]
fn test_dropped_memory_unpins_buffer() {
    let config = config();
    let heap = Arc::new(SimulatedHeap::new(&config).unwrap());
    let loader = ObjectMemoryLoader::with_space(config, heap.clone()).unwrap();
    loader
        .resolver()
        .register(BOOTSTRAP_URI, bootstrap().to_bytes().unwrap())
        .unwrap();

    let first = loader.load_uri(BOOTSTRAP_URI, false).unwrap();
    let second = loader.load_uri(BOOTSTRAP_URI, false).unwrap();
    assert!(first.memory().unwrap().pinned().is_some());
    assert_eq!(heap.pinned_buffers(), 2);

    drop(first);
    assert_eq!(heap.pinned_buffers(), 1);
    drop(second);
    assert_eq!(heap.pinned_buffers(), 0);
    assert_eq!(heap.live_buffers(), 0);
}

#[test]
fn test_pinned_buffer_survives_collections() {
    let fixture = LoaderFixture::new();
    fixture.register(BOOTSTRAP_URI, &bootstrap());
    let file = fixture.loader.load_uri(BOOTSTRAP_URI, false).unwrap();
    let memory = file.memory().unwrap();

    let space = fixture.loader.memory_space();
    let before = space.collections();
    space.collect_garbage();
    space.collect_garbage();
    assert_eq!(space.collections(), before + 2);

    // a new allocation never lands on the pinned memory
    let other = space.allocate(BOOTSTRAP_SIZE).unwrap();
    let at = space.address_of(other).unwrap();
    assert!(!memory.contains(at));
    assert!(at.add_bytes(BOOTSTRAP_SIZE) <= memory.start() || at >= memory.end());
}
