//! RwLock - Reader/Writer Lock Arbitrated by a Manager Core
//!
//! The lock is only a hash code on the calling side: its state lives with
//! the arbiter of the manager core the hash maps to. Each operation sends a
//! request and, except for unlocks, blocks for the reply.
//!
//! Per core and thread the lock tracks where the latest request stands:
//!
//! ```text
//! Idle -> RequestSent -> Granted -> Held -> Unlocking -> Idle
//!                     -> Denied  -> Idle
//! ```
//!
//! A blocking request never returns `Denied`; it waits in the arbiter's
//! queue until granted, with no timeout.

use std::fmt;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{LockKind, Result, SyncError};
use crate::fabric::CoreHandle;
use crate::hash::next_hash_code;
use crate::ops::{CoreId, OpCode};

/// Where a thread's dealings with a lock stand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPhase {
    Idle,
    RequestSent,
    Granted,
    Denied,
    Held,
    Unlocking,
}

impl fmt::Display for LockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockPhase::Idle => "idle",
            LockPhase::RequestSent => "request sent",
            LockPhase::Granted => "granted",
            LockPhase::Denied => "denied",
            LockPhase::Held => "held",
            LockPhase::Unlocking => "unlocking",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Hold {
    phase: LockPhase,
    reads: u32,
    write: bool,
}

impl Default for Hold {
    fn default() -> Self {
        Self {
            phase: LockPhase::Idle,
            reads: 0,
            write: false,
        }
    }
}

impl Hold {
    fn resting(&self) -> LockPhase {
        if self.reads > 0 || self.write {
            LockPhase::Held
        } else {
            LockPhase::Idle
        }
    }
}

/// Reader/writer lock shared across cores
pub struct RwLock {
    hash: u32,
    holds: Mutex<FxHashMap<(CoreId, u32), Hold>>,
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLock {
    pub fn new() -> Self {
        Self::with_hash(next_hash_code())
    }

    /// Lock identified by an existing hash code
    pub fn with_hash(hash: u32) -> Self {
        Self {
            hash,
            holds: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Phase of the calling thread's latest request
    pub fn phase(&self, core: &CoreHandle) -> LockPhase {
        self.holds
            .lock()
            .get(&key(core))
            .map_or(LockPhase::Idle, |h| h.phase)
    }

    /// Block until a read lock is granted
    pub fn read_lock(&self, core: &CoreHandle) -> Result<()> {
        self.acquire(core, LockKind::Read, false).map(|_| ())
    }

    /// Block until the write lock is granted
    pub fn write_lock(&self, core: &CoreHandle) -> Result<()> {
        self.acquire(core, LockKind::Write, false).map(|_| ())
    }

    /// Ask once for a read lock; false if the arbiter refused
    pub fn try_read_lock(&self, core: &CoreHandle) -> Result<bool> {
        self.acquire(core, LockKind::Read, true)
    }

    /// Ask once for the write lock; false if the arbiter refused
    pub fn try_write_lock(&self, core: &CoreHandle) -> Result<bool> {
        self.acquire(core, LockKind::Write, true)
    }

    pub fn read_unlock(&self, core: &CoreHandle) -> Result<()> {
        self.release(core, LockKind::Read)
    }

    pub fn write_unlock(&self, core: &CoreHandle) -> Result<()> {
        self.release(core, LockKind::Write)
    }

    /// Read lock released when the guard drops
    pub fn read<'a>(&'a self, core: &'a CoreHandle) -> Result<ReadGuard<'a>> {
        self.read_lock(core)?;
        Ok(ReadGuard { lock: self, core })
    }

    /// Write lock released when the guard drops
    pub fn write<'a>(&'a self, core: &'a CoreHandle) -> Result<WriteGuard<'a>> {
        self.write_lock(core)?;
        Ok(WriteGuard { lock: self, core })
    }

    pub fn try_read<'a>(&'a self, core: &'a CoreHandle) -> Result<Option<ReadGuard<'a>>> {
        Ok(self.try_read_lock(core)?.then_some(ReadGuard { lock: self, core }))
    }

    pub fn try_write<'a>(&'a self, core: &'a CoreHandle) -> Result<Option<WriteGuard<'a>>> {
        Ok(self.try_write_lock(core)?.then_some(WriteGuard { lock: self, core }))
    }

    fn acquire(&self, core: &CoreHandle, kind: LockKind, is_try: bool) -> Result<bool> {
        let (request, granted, denied) = match (kind, is_try) {
            (LockKind::Read, false) => (OpCode::RwRead, OpCode::RwReadAck, None),
            (LockKind::Read, true) => (OpCode::RwReadTry, OpCode::RwReadAck, Some(OpCode::RwReadNack)),
            (LockKind::Write, false) => (OpCode::RwWrite, OpCode::RwWriteAck, None),
            (LockKind::Write, true) => (OpCode::RwWriteTry, OpCode::RwWriteAck, Some(OpCode::RwWriteNack)),
        };

        self.transition(core, LockPhase::RequestSent);
        let reply = match core.request(request, self.hash) {
            Ok(reply) => reply,
            Err(e) => {
                self.settle(core, |_| {});
                return Err(e);
            },
        };

        if reply.op == granted {
            self.transition(core, LockPhase::Granted);
            self.settle(core, |hold| match kind {
                LockKind::Read => hold.reads += 1,
                LockKind::Write => hold.write = true,
            });
            Ok(true)
        } else if Some(reply.op) == denied {
            self.transition(core, LockPhase::Denied);
            self.settle(core, |_| {});
            Ok(false)
        } else {
            self.settle(core, |_| {});
            Err(SyncError::Protocol { request, reply: reply.op })
        }
    }

    fn release(&self, core: &CoreHandle, kind: LockKind) -> Result<()> {
        let held = {
            let holds = self.holds.lock();
            let hold = holds.get(&key(core)).copied().unwrap_or_default();
            match kind {
                LockKind::Read => hold.reads > 0,
                LockKind::Write => hold.write,
            }
        };
        if !held {
            return Err(SyncError::NotHeld {
                hash: self.hash,
                kind,
                core: core.id(),
                thread: core.thread(),
            });
        }

        self.transition(core, LockPhase::Unlocking);
        let op = match kind {
            LockKind::Read => OpCode::RwReadUnlock,
            LockKind::Write => OpCode::RwWriteUnlock,
        };
        let sent = core.send(op, self.hash);
        self.settle(core, |hold| match kind {
            LockKind::Read => hold.reads -= 1,
            LockKind::Write => hold.write = false,
        });
        sent
    }

    fn transition(&self, core: &CoreHandle, to: LockPhase) {
        let mut holds = self.holds.lock();
        let hold = holds.entry(key(core)).or_default();
        log::trace!(
            "lock {:#x} {} thread {}: {} -> {}",
            self.hash,
            core.id(),
            core.thread(),
            hold.phase,
            to
        );
        hold.phase = to;
    }

    /// Apply `update` and return to `Held` or `Idle`
    fn settle(&self, core: &CoreHandle, update: impl FnOnce(&mut Hold)) {
        let mut holds = self.holds.lock();
        let hold = holds.entry(key(core)).or_default();
        update(hold);
        let to = hold.resting();
        log::trace!("lock {:#x} {} thread {}: {} -> {}", self.hash, core.id(), core.thread(), hold.phase, to);
        if to == LockPhase::Idle {
            holds.remove(&key(core));
        } else {
            hold.phase = to;
        }
    }
}

impl fmt::Debug for RwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock")
            .field("hash", &format_args!("{:#x}", self.hash))
            .field("holders", &self.holds.lock().len())
            .finish()
    }
}

fn key(core: &CoreHandle) -> (CoreId, u32) {
    (core.id(), core.thread())
}

/// Read access to an [`RwLock`]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a RwLock,
    core: &'a CoreHandle,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.read_unlock(self.core) {
            log::error!("releasing read lock {:#x}: {}", self.lock.hash, e);
        }
    }
}

/// Write access to an [`RwLock`]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a RwLock,
    core: &'a CoreHandle,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.write_unlock(self.core) {
            log::error!("releasing write lock {:#x}: {}", self.lock.hash, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FabricConfig;
    use crate::fabric::Fabric;

    fn fabric() -> Fabric {
        Fabric::new(FabricConfig::single_island(3)).unwrap()
    }

    #[test]
    fn test_phases() {
        let fabric = fabric();
        let core = fabric.core(CoreId::new(0, 1)).unwrap();
        let lock = RwLock::new();

        assert_eq!(lock.phase(&core), LockPhase::Idle);
        lock.write_lock(&core).unwrap();
        assert_eq!(lock.phase(&core), LockPhase::Held);
        lock.write_unlock(&core).unwrap();
        assert_eq!(lock.phase(&core), LockPhase::Idle);
    }

    #[test]
    fn test_try_write_denied_while_read_held() {
        let fabric = fabric();
        let reader = fabric.core(CoreId::new(0, 1)).unwrap();
        let writer = fabric.core(CoreId::new(0, 2)).unwrap();
        let lock = RwLock::new();

        let guard = lock.read(&reader).unwrap();
        assert!(!lock.try_write_lock(&writer).unwrap());
        assert_eq!(lock.phase(&writer), LockPhase::Idle);
        assert!(lock.try_read_lock(&writer).unwrap());
        lock.read_unlock(&writer).unwrap();
        drop(guard);

        let guard = lock.try_write(&writer).unwrap();
        assert!(guard.is_some());
    }

    #[test]
    fn test_unlock_without_lock() {
        let fabric = fabric();
        let core = fabric.core(CoreId::new(0, 0)).unwrap();
        let lock = RwLock::new();
        let err = lock.write_unlock(&core).unwrap_err();
        assert!(matches!(err, SyncError::NotHeld { kind: LockKind::Write, .. }));

        lock.read_lock(&core).unwrap();
        assert!(lock.write_unlock(&core).is_err());
        lock.read_unlock(&core).unwrap();
    }

    #[test]
    fn test_nested_reads() {
        let fabric = fabric();
        let core = fabric.core(CoreId::new(0, 2)).unwrap();
        let lock = RwLock::new();
        let a = lock.read(&core).unwrap();
        let b = lock.read(&core).unwrap();
        drop(a);
        assert_eq!(lock.phase(&core), LockPhase::Held);
        drop(b);
        assert_eq!(lock.phase(&core), LockPhase::Idle);
    }
}
