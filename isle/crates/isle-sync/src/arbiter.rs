//! Lock Arbiter - Reader/Writer Lock State on a Manager Core
//!
//! The arbiter owns the state of every lock whose hash maps to its manager
//! core. It turns request messages into replies:
//!
//! - `RW_READ` / `RW_WRITE` are granted at once or queued in FIFO order
//! - `RW_READ_TRY` / `RW_WRITE_TRY` are always answered, ACK or NACK
//! - `RW_READ_UNLOCK` / `RW_WRITE_UNLOCK` release and regrant from the queue head
//!
//! A queued writer blocks readers that arrive after it, except readers that
//! already hold the lock. Write locks are not reentrant.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::error::LockKind;
use crate::ops::{CoreId, Message, OpCode};
use crate::stats::ManagerStats;

/// A thread on a core that sends requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Requester {
    pub core: CoreId,
    pub thread: u32,
}

impl Requester {
    pub fn of(message: &Message) -> Self {
        Self {
            core: message.from,
            thread: message.thread,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Blocked {
    requester: Requester,
    kind: LockKind,
    ticket: u32,
}

#[derive(Debug, Default)]
struct LockState {
    readers: IndexMap<Requester, u32>,
    writer: Option<Requester>,
    queue: VecDeque<Blocked>,
}

impl LockState {
    fn grantable(&self, kind: LockKind) -> bool {
        match kind {
            LockKind::Read => self.writer.is_none(),
            LockKind::Write => self.writer.is_none() && self.readers.is_empty(),
        }
    }

    /// Grantable without overtaking the queue
    fn admits(&self, kind: LockKind, requester: Requester) -> bool {
        self.grantable(kind) && (self.queue.is_empty() || (kind == LockKind::Read && self.readers.contains_key(&requester)))
    }

    fn grant(&mut self, kind: LockKind, requester: Requester) {
        match kind {
            LockKind::Read => *self.readers.entry(requester).or_insert(0) += 1,
            LockKind::Write => self.writer = Some(requester),
        }
    }

    fn is_idle(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none() && self.queue.is_empty()
    }
}

/// Replies produced by the arbiter, with their destination core
pub type Outgoing = Vec<(CoreId, Message)>;

/// Arbitrates the reader/writer locks of one manager core
pub struct LockArbiter {
    manager: CoreId,
    locks: FxHashMap<u32, LockState>,
    stats: Arc<ManagerStats>,
}

impl LockArbiter {
    pub fn new(manager: CoreId, stats: Arc<ManagerStats>) -> Self {
        Self {
            manager,
            locks: FxHashMap::default(),
            stats,
        }
    }

    pub fn manager(&self) -> CoreId {
        self.manager
    }

    /// Process one request and return the replies it causes
    pub fn handle(&mut self, request: &Message) -> Outgoing {
        let requester = Requester::of(request);
        let mut out = Vec::new();
        match request.op {
            OpCode::RwRead => self.acquire(request, requester, LockKind::Read, false, &mut out),
            OpCode::RwWrite => self.acquire(request, requester, LockKind::Write, false, &mut out),
            OpCode::RwReadTry => self.acquire(request, requester, LockKind::Read, true, &mut out),
            OpCode::RwWriteTry => self.acquire(request, requester, LockKind::Write, true, &mut out),
            OpCode::RwReadUnlock => self.release(request.hash, requester, LockKind::Read, &mut out),
            OpCode::RwWriteUnlock => self.release(request.hash, requester, LockKind::Write, &mut out),
            other => log::warn!("arbiter {}: ignoring {} from {}", self.manager, other, request.from),
        }
        out
    }

    fn acquire(&mut self, request: &Message, requester: Requester, kind: LockKind, is_try: bool, out: &mut Outgoing) {
        self.stats.record_lock_request();
        let state = self.locks.entry(request.hash).or_default();

        if state.admits(kind, requester) {
            state.grant(kind, requester);
            self.stats.record_lock_grant();
            out.push((requester.core, request.reply(ack(kind), self.manager)));
        } else if is_try {
            self.stats.record_lock_denial();
            out.push((requester.core, request.reply(nack(kind), self.manager)));
        } else {
            self.stats.record_lock_queued();
            log::trace!(
                "arbiter {}: {} lock {:#x} queued for {} thread {}",
                self.manager,
                kind,
                request.hash,
                requester.core,
                requester.thread
            );
            state.queue.push_back(Blocked {
                requester,
                kind,
                ticket: request.ticket,
            });
        }

        if state.is_idle() {
            self.locks.remove(&request.hash);
        }
    }

    fn release(&mut self, hash: u32, requester: Requester, kind: LockKind, out: &mut Outgoing) {
        let Some(state) = self.locks.get_mut(&hash) else {
            stray(&self.stats, self.manager, hash, requester, kind);
            return;
        };

        let released = match kind {
            LockKind::Read => match state.readers.get_mut(&requester) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    true
                },
                Some(_) => {
                    state.readers.shift_remove(&requester);
                    true
                },
                None => false,
            },
            LockKind::Write => {
                if state.writer == Some(requester) {
                    state.writer = None;
                    true
                } else {
                    false
                }
            },
        };
        if !released {
            stray(&self.stats, self.manager, hash, requester, kind);
            return;
        }
        self.stats.record_lock_release();

        while let Some(next) = state.queue.front().copied() {
            if !state.grantable(next.kind) {
                break;
            }
            state.queue.pop_front();
            state.grant(next.kind, next.requester);
            self.stats.record_lock_grant();
            out.push((
                next.requester.core,
                Message {
                    op: ack(next.kind),
                    from: self.manager,
                    thread: next.requester.thread,
                    hash,
                    ticket: next.ticket,
                },
            ));
        }

        if state.is_idle() {
            self.locks.remove(&hash);
        }
    }

    /// Read holds on `hash`, summed over requesters
    pub fn readers(&self, hash: u32) -> u32 {
        self.locks.get(&hash).map_or(0, |s| s.readers.values().sum())
    }

    pub fn writer(&self, hash: u32) -> Option<Requester> {
        self.locks.get(&hash).and_then(|s| s.writer)
    }

    pub fn queued(&self, hash: u32) -> usize {
        self.locks.get(&hash).map_or(0, |s| s.queue.len())
    }

    /// Locks that are held or have waiters
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }
}

fn stray(stats: &ManagerStats, manager: CoreId, hash: u32, requester: Requester, kind: LockKind) {
    stats.record_stray_release();
    log::warn!(
        "arbiter {}: {} unlock of {:#x} by {} thread {} which does not hold it",
        manager,
        kind,
        hash,
        requester.core,
        requester.thread
    );
}

fn ack(kind: LockKind) -> OpCode {
    match kind {
        LockKind::Read => OpCode::RwReadAck,
        LockKind::Write => OpCode::RwWriteAck,
    }
}

fn nack(kind: LockKind) -> OpCode {
    match kind {
        LockKind::Read => OpCode::RwReadNack,
        LockKind::Write => OpCode::RwWriteNack,
    }
}
