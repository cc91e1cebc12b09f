//! Monitors - Reentrant Enter/Exit with Wait and Notify
//!
//! [`MonitorManager`] runs on a manager core next to the lock arbiter and
//! keeps, per monitor hash, the owner and its recursion depth, the queue of
//! threads waiting to enter and the wait set. [`Monitor`] is the client side
//! used by threads.
//!
//! A waiter gives up the monitor entirely and is moved to the entry queue by
//! a notify; it gets the monitor back with its old recursion depth and is
//! woken with `MNTR_NOTIFICATION` or `MNTR_NOTIFICATION_ALL`.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::arbiter::{Outgoing, Requester};
use crate::error::{Result, SyncError};
use crate::fabric::CoreHandle;
use crate::hash::next_hash_code;
use crate::ops::{CoreId, Message, OpCode};
use crate::stats::ManagerStats;

#[derive(Debug, Clone, Copy)]
struct Entrant {
    requester: Requester,
    ticket: u32,
    depth: u32,
    wake: OpCode,
}

#[derive(Debug, Default)]
struct MonitorState {
    owner: Option<Requester>,
    depth: u32,
    entry: VecDeque<Entrant>,
    waiters: VecDeque<Entrant>,
}

impl MonitorState {
    fn is_idle(&self) -> bool {
        self.owner.is_none() && self.entry.is_empty() && self.waiters.is_empty()
    }
}

/// Monitor state of one manager core
pub struct MonitorManager {
    manager: CoreId,
    monitors: FxHashMap<u32, MonitorState>,
    stats: Arc<ManagerStats>,
}

impl MonitorManager {
    pub fn new(manager: CoreId, stats: Arc<ManagerStats>) -> Self {
        Self {
            manager,
            monitors: FxHashMap::default(),
            stats,
        }
    }

    /// Process one monitor request and return the replies it causes
    pub fn handle(&mut self, request: &Message) -> Outgoing {
        let requester = Requester::of(request);
        let mut out = Vec::new();
        let manager = self.manager;
        let state = self.monitors.entry(request.hash).or_default();

        match request.op {
            OpCode::MonitorEnter => {
                self.stats.record_monitor_enter();
                if state.owner.is_none() {
                    state.owner = Some(requester);
                    state.depth = 1;
                    out.push((requester.core, request.reply(OpCode::MonitorAck, manager)));
                } else if state.owner == Some(requester) {
                    state.depth += 1;
                    out.push((requester.core, request.reply(OpCode::MonitorAck, manager)));
                } else {
                    self.stats.record_monitor_contended();
                    state.entry.push_back(Entrant {
                        requester,
                        ticket: request.ticket,
                        depth: 1,
                        wake: OpCode::MonitorAck,
                    });
                }
            },
            op if state.owner != Some(requester) => {
                self.stats.record_monitor_error();
                log::debug!(
                    "monitor {:#x}: {} by {} thread {} which does not own it",
                    request.hash,
                    op,
                    requester.core,
                    requester.thread
                );
                out.push((requester.core, request.reply(OpCode::Nop, manager)));
            },
            OpCode::MonitorExit => {
                state.depth -= 1;
                if state.depth == 0 {
                    state.owner = None;
                    hand_off(state, request.hash, manager, &mut out);
                }
                out.push((requester.core, request.reply(OpCode::MonitorAck, manager)));
            },
            OpCode::MonitorWait => {
                self.stats.record_monitor_wait();
                state.waiters.push_back(Entrant {
                    requester,
                    ticket: request.ticket,
                    depth: state.depth,
                    wake: OpCode::MonitorNotify,
                });
                state.owner = None;
                state.depth = 0;
                hand_off(state, request.hash, manager, &mut out);
            },
            OpCode::MonitorSignal => {
                self.stats.record_monitor_notify();
                if let Some(mut waiter) = state.waiters.pop_front() {
                    waiter.wake = OpCode::MonitorNotify;
                    state.entry.push_back(waiter);
                }
                out.push((requester.core, request.reply(OpCode::MonitorAck, manager)));
            },
            OpCode::MonitorBroadcast => {
                self.stats.record_monitor_notify();
                while let Some(mut waiter) = state.waiters.pop_front() {
                    waiter.wake = OpCode::MonitorNotifyAll;
                    state.entry.push_back(waiter);
                }
                out.push((requester.core, request.reply(OpCode::MonitorAck, manager)));
            },
            other => log::warn!("monitor manager {}: ignoring {}", manager, other),
        }

        if state.is_idle() {
            self.monitors.remove(&request.hash);
        }
        out
    }

    pub fn owner(&self, hash: u32) -> Option<(Requester, u32)> {
        self.monitors
            .get(&hash)
            .and_then(|s| s.owner.map(|o| (o, s.depth)))
    }

    /// Owner as `(island << 3) | core`
    pub fn owner_code(&self, hash: u32) -> Option<u32> {
        self.owner(hash).map(|(o, _)| o.core.owner_code())
    }

    pub fn waiting(&self, hash: u32) -> usize {
        self.monitors.get(&hash).map_or(0, |s| s.waiters.len())
    }

    pub fn entering(&self, hash: u32) -> usize {
        self.monitors.get(&hash).map_or(0, |s| s.entry.len())
    }
}

fn hand_off(state: &mut MonitorState, hash: u32, manager: CoreId, out: &mut Outgoing) {
    if let Some(next) = state.entry.pop_front() {
        state.owner = Some(next.requester);
        state.depth = next.depth;
        out.push((
            next.requester.core,
            Message {
                op: next.wake,
                from: manager,
                thread: next.requester.thread,
                hash,
                ticket: next.ticket,
            },
        ));
    }
}

/// Client side of a monitor
#[derive(Debug)]
pub struct Monitor {
    hash: u32,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            hash: next_hash_code(),
        }
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Block until the calling thread owns the monitor
    pub fn enter(&self, core: &CoreHandle) -> Result<()> {
        self.call(core, OpCode::MonitorEnter).map(|_| ())
    }

    pub fn exit(&self, core: &CoreHandle) -> Result<()> {
        self.call(core, OpCode::MonitorExit).map(|_| ())
    }

    /// Release the monitor and block until notified and owner again
    ///
    /// Returns the wake-up kind, `MonitorNotify` or `MonitorNotifyAll`.
    pub fn wait(&self, core: &CoreHandle) -> Result<OpCode> {
        self.call(core, OpCode::MonitorWait)
    }

    pub fn notify(&self, core: &CoreHandle) -> Result<()> {
        self.call(core, OpCode::MonitorSignal).map(|_| ())
    }

    pub fn notify_all(&self, core: &CoreHandle) -> Result<()> {
        self.call(core, OpCode::MonitorBroadcast).map(|_| ())
    }

    /// Enter the monitor, exiting again when the guard is dropped
    pub fn lock<'a>(&'a self, core: &'a CoreHandle) -> Result<MonitorGuard<'a>> {
        self.enter(core)?;
        Ok(MonitorGuard { monitor: self, core })
    }

    /// Run `f` while owning the monitor
    ///
    /// The monitor is exited even if `f` panics.
    pub fn synchronized<T>(&self, core: &CoreHandle, f: impl FnOnce() -> T) -> Result<T> {
        let guard = self.lock(core)?;
        let value = f();
        guard.release()?;
        Ok(value)
    }

    fn call(&self, core: &CoreHandle, op: OpCode) -> Result<OpCode> {
        let reply = core.request(op, self.hash)?;
        match (op, reply.op) {
            (_, OpCode::Nop) => Err(SyncError::NotOwner {
                hash: self.hash,
                core: core.id(),
                thread: core.thread(),
            }),
            (OpCode::MonitorWait, OpCode::MonitorNotify | OpCode::MonitorNotifyAll) => Ok(reply.op),
            (OpCode::MonitorWait, _) => Err(SyncError::Protocol { request: op, reply: reply.op }),
            (_, OpCode::MonitorAck) => Ok(reply.op),
            _ => Err(SyncError::Protocol { request: op, reply: reply.op }),
        }
    }
}

/// Ownership of a [`Monitor`]
#[must_use = "the monitor is exited as soon as the guard is dropped"]
pub struct MonitorGuard<'a> {
    monitor: &'a Monitor,
    core: &'a CoreHandle,
}

impl MonitorGuard<'_> {
    /// Exit now, reporting a failed exit instead of logging it
    pub fn release(self) -> Result<()> {
        let result = self.monitor.exit(self.core);
        std::mem::forget(self);
        result
    }
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.monitor.exit(self.core) {
            log::error!("exiting monitor {:#x}: {}", self.monitor.hash, e);
        }
    }
}
