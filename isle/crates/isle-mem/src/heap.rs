//! Heap Module - Target Memory Spaces
//!
//! The loader needs three things from the target's memory system: a movable
//! RAM buffer to relocate in, a way to force and observe collections, and
//! read-only memory to publish into. [`MemorySpace`] is that seam.
//!
//! [`SimulatedHeap`] models it on the host:
//!
//! ```text
//! RAM:        [ semispace 0 ][ semispace 1 ]     copying collector
//!                 ^ pinned buffers stay where they are, allocation skips them
//! read-only:  [ bump allocated, never collected ]
//! ```
//!
//! A pinned buffer stays put until its [`PinnedBuffer`] handle is dropped.
//! Read-only memory is only handed back for loads that failed before
//! publishing it.
//!
//! Every collection copies each live movable buffer into the other
//! semispace, so a buffer's address changes at every collection. A
//! relocator that polls [`MemorySpace::safepoint`] can therefore observe a
//! collection requested by another thread, or forced by GC stress mode.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::address::Address;
use crate::config::LoaderConfig;
use crate::error::{MemError, MemorySpaceKind, Result};

/// Handle to a movable RAM buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

/// Memory services used by the loader
pub trait MemorySpace: Send + Sync {
    /// Allocate a movable RAM buffer of `size` bytes
    fn allocate(&self, size: usize) -> Result<BufferId>;

    /// Current address of a movable buffer
    fn address_of(&self, buffer: BufferId) -> Result<Address>;

    /// Release a movable buffer
    fn free(&self, buffer: BufferId);

    /// Fix a buffer at its current address until it is unpinned
    ///
    /// After this the collector treats it as a zero-length object it never
    /// moves. Returns the final address.
    fn pin(&self, buffer: BufferId) -> Result<Address>;

    /// Release a pinned buffer
    fn unpin(&self, buffer: BufferId);

    /// Allocate `size` bytes of read-only memory
    fn allocate_read_only(&self, size: usize) -> Result<Address>;

    /// Hand back read-only memory that was never published
    fn free_read_only(&self, address: Address, size: usize);

    /// Run a full collection now
    fn collect_garbage(&self);

    /// Ask for a collection at the next safepoint
    fn request_collection(&self);

    /// Service a pending collection, if any
    fn safepoint(&self);

    /// Collections run so far
    fn collections(&self) -> u64;
}

/// Pinned RAM owned by a loaded memory, unpinned on drop
pub struct PinnedBuffer {
    space: Arc<dyn MemorySpace>,
    buffer: BufferId,
}

impl PinnedBuffer {
    pub fn new(space: Arc<dyn MemorySpace>, buffer: BufferId) -> Self {
        Self { space, buffer }
    }

    pub fn id(&self) -> BufferId {
        self.buffer
    }
}

impl Drop for PinnedBuffer {
    fn drop(&mut self) {
        self.space.unpin(self.buffer);
    }
}

impl fmt::Debug for PinnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PinnedBuffer").field(&self.buffer).finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    address: u64,
    size: usize,
}

struct RamState {
    spaces: [(u64, u64); 2],
    current: usize,
    top: u64,
    live: IndexMap<BufferId, Placement>,
    pinned: Vec<(BufferId, u64, u64)>,
    next_id: u64,
}

impl RamState {
    /// First address at or after `from` where `size` bytes fit below `end`
    /// without touching a pinned range
    fn place(&self, from: u64, size: usize, end: u64, alignment: u64) -> Option<u64> {
        let mut at = align_up(from, alignment);
        loop {
            let limit = at.checked_add(size as u64)?;
            if limit > end {
                return None;
            }
            match self
                .pinned
                .iter()
                .find(|(_, start, stop)| at < *stop && *start < limit.max(at + 1))
            {
                Some((_, _, stop)) => at = align_up(*stop, alignment),
                None => return Some(at),
            }
        }
    }

    fn available(&self) -> usize {
        let (_, end) = self.spaces[self.current];
        end.saturating_sub(self.top) as usize
    }
}

/// Host model of the target heap and read-only memory
pub struct SimulatedHeap {
    ram: Mutex<RamState>,
    read_only: ReadOnlyAllocator,
    alignment: u64,
    stress: bool,
    pending: AtomicBool,
    collections: AtomicU64,
}

impl SimulatedHeap {
    pub fn new(config: &LoaderConfig) -> Result<Self> {
        let half = config.ram_size as u64;
        let first = (config.ram_base, config.ram_base + half);
        let second = (config.ram_base + half, config.ram_base + 2 * half);
        Ok(Self {
            ram: Mutex::new(RamState {
                spaces: [first, second],
                current: 0,
                top: config.ram_base,
                live: IndexMap::new(),
                pinned: Vec::new(),
                next_id: 1,
            }),
            read_only: ReadOnlyAllocator::new(
                config.read_only_base,
                config.read_only_base + config.read_only_size as u64,
                config.bytes_per_word as u64,
            )?,
            alignment: config.bytes_per_word as u64,
            stress: config.gc_stress,
            pending: AtomicBool::new(false),
            collections: AtomicU64::new(0),
        })
    }

    /// Number of live movable buffers
    pub fn live_buffers(&self) -> usize {
        self.ram.lock().live.len()
    }

    /// Bytes still free in the current semispace
    pub fn ram_available(&self) -> usize {
        self.ram.lock().available()
    }

    /// Number of pinned buffers
    pub fn pinned_buffers(&self) -> usize {
        self.ram.lock().pinned.len()
    }

    pub fn read_only_used(&self) -> usize {
        self.read_only.used()
    }

    fn flip(&self, ram: &mut RamState) {
        let target = 1 - ram.current;
        let (start, end) = ram.spaces[target];
        let mut top = start;
        let mut moved = IndexMap::with_capacity(ram.live.len());
        for (id, placement) in &ram.live {
            match ram.place(top, placement.size, end, self.alignment) {
                Some(at) => {
                    top = at + placement.size as u64;
                    moved.insert(
                        *id,
                        Placement {
                            address: at,
                            size: placement.size,
                        },
                    );
                },
                None => {
                    // To-space exhausted: leave the heap as it was.
                    log::warn!("collection abandoned, to-space cannot hold {} bytes", placement.size);
                    return;
                },
            }
        }
        ram.live = moved;
        ram.current = target;
        ram.top = top;
        self.collections.fetch_add(1, Ordering::SeqCst);
        log::debug!("collection {} moved {} buffers", self.collections(), ram.live.len());
    }
}

impl MemorySpace for SimulatedHeap {
    fn allocate(&self, size: usize) -> Result<BufferId> {
        let mut ram = self.ram.lock();
        let (_, end) = ram.spaces[ram.current];
        let at = ram
            .place(ram.top, size, end, self.alignment)
            .ok_or(MemError::OutOfMemory {
                space: MemorySpaceKind::Ram,
                requested: size,
                available: ram.available(),
            })?;
        let id = BufferId(ram.next_id);
        ram.next_id += 1;
        ram.top = at + size as u64;
        ram.live.insert(id, Placement { address: at, size });
        Ok(id)
    }

    fn address_of(&self, buffer: BufferId) -> Result<Address> {
        let ram = self.ram.lock();
        let placement = ram
            .live
            .get(&buffer)
            .ok_or_else(|| MemError::Internal(format!("unknown buffer {:?}", buffer)))?;
        Address::from_u64(placement.address)
            .ok_or_else(|| MemError::Internal(format!("buffer address {:#x} out of range", placement.address)))
    }

    fn free(&self, buffer: BufferId) {
        self.ram.lock().live.shift_remove(&buffer);
    }

    fn pin(&self, buffer: BufferId) -> Result<Address> {
        let mut ram = self.ram.lock();
        let placement = ram
            .live
            .shift_remove(&buffer)
            .ok_or_else(|| MemError::Internal(format!("unknown buffer {:?}", buffer)))?;
        let pinned = (buffer, placement.address, placement.address + placement.size as u64);
        let index = ram.pinned.partition_point(|(_, start, _)| *start < pinned.1);
        ram.pinned.insert(index, pinned);
        Address::from_u64(placement.address)
            .ok_or_else(|| MemError::Internal(format!("buffer address {:#x} out of range", placement.address)))
    }

    fn unpin(&self, buffer: BufferId) {
        self.ram.lock().pinned.retain(|(id, _, _)| *id != buffer);
    }

    fn allocate_read_only(&self, size: usize) -> Result<Address> {
        let at = self.read_only.allocate(size)?;
        Address::from_u64(at)
            .ok_or_else(|| MemError::Internal(format!("read-only address {:#x} out of range", at)))
    }

    fn free_read_only(&self, address: Address, size: usize) {
        self.read_only.release(address.to_u64(), size);
    }

    fn collect_garbage(&self) {
        self.pending.store(false, Ordering::SeqCst);
        let mut ram = self.ram.lock();
        self.flip(&mut ram);
    }

    fn request_collection(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    fn safepoint(&self) {
        if self.stress || self.pending.swap(false, Ordering::SeqCst) {
            let mut ram = self.ram.lock();
            self.flip(&mut ram);
        }
    }

    fn collections(&self) -> u64 {
        self.collections.load(Ordering::SeqCst)
    }
}

/// Bump allocator for read-only memory
///
/// Read-only memory is never collected. Space released by a failed load
/// rolls `top` back when it is the newest allocation, and is otherwise
/// kept as a hole for the next allocation that fits.
pub struct ReadOnlyAllocator {
    start: u64,
    top: AtomicU64,
    end: u64,
    alignment: u64,
    holes: Mutex<Vec<(u64, u64)>>,
}

impl ReadOnlyAllocator {
    pub fn new(start: u64, end: u64, alignment: u64) -> Result<Self> {
        if start >= end {
            return Err(MemError::InvalidArgument(format!(
                "start ({:#x}) must be less than end ({:#x})",
                start, end
            )));
        }
        if !alignment.is_power_of_two() {
            return Err(MemError::InvalidArgument(format!(
                "alignment ({}) must be a power of two",
                alignment
            )));
        }
        Ok(Self {
            start,
            top: AtomicU64::new(start),
            end,
            alignment,
            holes: Mutex::new(Vec::new()),
        })
    }

    pub fn allocate(&self, size: usize) -> Result<u64> {
        let aligned = align_up(size as u64, self.alignment);
        if let Some(at) = self.take_hole(aligned) {
            return Ok(at);
        }
        let mut current = self.top.load(Ordering::Relaxed);
        loop {
            let new_top = current
                .checked_add(aligned)
                .filter(|top| *top <= self.end)
                .ok_or(MemError::OutOfMemory {
                    space: MemorySpaceKind::ReadOnly,
                    requested: size,
                    available: self.end.saturating_sub(current) as usize,
                })?;

            match self
                .top
                .compare_exchange_weak(current, new_top, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return Ok(current),
                Err(actual) => current = actual,
            }
        }
    }

    /// Give back `size` bytes at `at` from an allocation never published
    pub fn release(&self, at: u64, size: usize) {
        let aligned = align_up(size as u64, self.alignment);
        let mut holes = self.holes.lock();
        if self
            .top
            .compare_exchange(at + aligned, at, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            holes.push((at, aligned));
            return;
        }
        // holes now touching the top go back to the bump region
        loop {
            let top = self.top.load(Ordering::SeqCst);
            let Some(index) = holes.iter().position(|(start, len)| start + len == top) else {
                break;
            };
            let (start, len) = holes.swap_remove(index);
            if self
                .top
                .compare_exchange(top, start, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                holes.push((start, len));
                break;
            }
        }
    }

    fn take_hole(&self, aligned: u64) -> Option<u64> {
        let mut holes = self.holes.lock();
        let index = holes.iter().position(|(_, len)| *len >= aligned)?;
        let (start, len) = holes[index];
        if len == aligned {
            holes.swap_remove(index);
        } else {
            holes[index] = (start + aligned, len - aligned);
        }
        Some(start)
    }

    pub fn used(&self) -> usize {
        let holes: u64 = self.holes.lock().iter().map(|(_, len)| len).sum();
        (self.top.load(Ordering::Relaxed) - self.start - holes) as usize
    }

    pub fn remaining(&self) -> usize {
        (self.end - self.top.load(Ordering::Relaxed)) as usize
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}
