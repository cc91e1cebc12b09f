//! Fabric - Mailboxes and Pump Threads
//!
//! Each simulated core has a mailbox (an unbounded crossbeam channel) and a
//! pump thread that drains it:
//!
//! - lock and monitor requests are handed to the core's arbiter and monitor
//!   manager, and their replies posted to the requesters' mailboxes
//! - `TH_SPAWN` starts the named closure as a thread on this core
//! - any other message is a reply, routed by ticket to the thread blocked on it
//!
//! A thread that sends a request blocks on a one-slot channel until its
//! reply arrives. There is no timeout.
//!
//! ```text
//!   thread ──request──▶ mailbox(manager) ──pump──▶ LockArbiter
//!      ▲                                              │
//!      └──ticket── pump ◀── mailbox(requester) ◀──reply┘
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::arbiter::{LockArbiter, Outgoing};
use crate::config::FabricConfig;
use crate::error::{Result, SyncError};
use crate::hash::manager_index;
use crate::monitor::MonitorManager;
use crate::ops::{CoreId, Message, OpCode};
use crate::spawn::{RoundRobin, SpawnHandle};
use crate::stats::{ManagerStats, StatsSnapshot};

type Body = Box<dyn FnOnce(CoreHandle) + Send + 'static>;

struct Shared {
    config: FabricConfig,
    mailboxes: Vec<Sender<Message>>,
    managers: Vec<CoreId>,
    stats: Vec<Arc<ManagerStats>>,
    pending: Mutex<FxHashMap<u32, Sender<Message>>>,
    bodies: Mutex<FxHashMap<u32, Body>>,
    scheduler: RoundRobin,
    next_ticket: AtomicU32,
    next_thread: AtomicU32,
    shutdown: AtomicBool,
}

impl Shared {
    fn index(&self, core: CoreId) -> Option<usize> {
        let in_range = (core.island as usize) < self.config.islands && (core.core as usize) < self.config.cores_per_island;
        in_range.then(|| core.index(self.config.cores_per_island))
    }

    fn manager_for(&self, hash: u32) -> CoreId {
        self.managers[manager_index(hash, self.managers.len())]
    }

    fn ticket(&self) -> u32 {
        loop {
            let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
            if ticket != 0 {
                return ticket;
            }
        }
    }

    fn post(&self, to: CoreId, message: Message) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SyncError::Disconnected(to));
        }
        let index = self.index(to).ok_or(SyncError::Disconnected(to))?;
        if self.config.trace {
            log::trace!("{} -> {}: {} hash {:#x} ticket {}", message.from, to, message.op, message.hash, message.ticket);
        }
        self.mailboxes[index]
            .send(message)
            .map_err(|_| SyncError::Disconnected(to))
    }

    fn dispatch(&self, out: Outgoing) {
        for (to, reply) in out {
            if let Err(e) = self.post(to, reply) {
                log::warn!("dropping {} for {}: {}", reply.op, to, e);
            }
        }
    }

    fn deliver(&self, reply: Message) {
        match self.pending.lock().remove(&reply.ticket) {
            // the waiter may have given up after a shutdown
            Some(waiter) => {
                let _ = waiter.send(reply);
            },
            None => log::warn!("reply {} with unknown ticket {} from {}", reply.op, reply.ticket, reply.from),
        }
    }
}

fn pump(shared: Arc<Shared>, core: CoreId, inbox: Receiver<Message>) {
    let stats = match shared.index(core) {
        Some(index) => shared.stats[index].clone(),
        None => return,
    };
    let mut arbiter = LockArbiter::new(core, stats.clone());
    let mut monitors = MonitorManager::new(core, stats.clone());

    while let Ok(message) = inbox.recv() {
        match message.op {
            OpCode::Nop if message.ticket == 0 => {
                if shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
            },
            op if op.is_lock_request() => shared.dispatch(arbiter.handle(&message)),
            op if op.is_monitor_request() => shared.dispatch(monitors.handle(&message)),
            OpCode::ThreadSpawn => {
                stats.record_spawn();
                start_thread(&shared, core, &message);
            },
            _ => shared.deliver(message),
        }
    }
    log::debug!("core {}: pump stopped", core);
}

fn start_thread(shared: &Arc<Shared>, core: CoreId, message: &Message) {
    let Some(body) = shared.bodies.lock().remove(&message.hash) else {
        log::warn!("core {}: no closure {} to spawn", core, message.hash);
        return;
    };
    let handle = CoreHandle {
        shared: shared.clone(),
        core,
        thread: message.thread,
    };
    let started = thread::Builder::new()
        .name(format!("isle-{}-{}-t{}", core.island, core.core, message.thread))
        .spawn(move || body(handle));
    if let Err(e) = started {
        log::error!("core {}: failed to start thread {}: {}", core, message.thread, e);
    }
}

/// A running fabric of cores
///
/// Dropping the fabric shuts it down.
pub struct Fabric {
    shared: Arc<Shared>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Fabric {
    pub fn new(config: FabricConfig) -> Result<Self> {
        config.validate()?;

        let cores: Vec<CoreId> = config.cores().collect();
        let (senders, receivers): (Vec<_>, Vec<_>) = cores.iter().map(|_| channel::unbounded()).unzip();
        let shared = Arc::new(Shared {
            managers: config.manager_cores(),
            scheduler: RoundRobin::new(config.enabled_cores()),
            stats: cores.iter().map(|_| Arc::new(ManagerStats::new())).collect(),
            mailboxes: senders,
            pending: Mutex::new(FxHashMap::default()),
            bodies: Mutex::new(FxHashMap::default()),
            next_ticket: AtomicU32::new(1),
            next_thread: AtomicU32::new(1),
            shutdown: AtomicBool::new(false),
            config,
        });

        let fabric = Fabric {
            shared: shared.clone(),
            pumps: Mutex::new(Vec::with_capacity(cores.len())),
        };
        for (core, inbox) in cores.into_iter().zip(receivers) {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("core-{}-{}", core.island, core.core))
                .spawn(move || pump(shared, core, inbox))
                .map_err(|e| SyncError::Spawn(e.to_string()))?;
            fabric.pumps.lock().push(handle);
        }
        log::debug!(
            "fabric up: {} islands x {} cores, managers {:?}",
            fabric.shared.config.islands,
            fabric.shared.config.cores_per_island,
            fabric.shared.managers
        );
        Ok(fabric)
    }

    pub fn config(&self) -> &FabricConfig {
        &self.shared.config
    }

    /// A new thread on `core`
    pub fn core(&self, core: CoreId) -> Result<CoreHandle> {
        self.shared.index(core).ok_or_else(|| {
            SyncError::Configuration(format!("core {} is not part of the fabric", core))
        })?;
        Ok(CoreHandle {
            shared: self.shared.clone(),
            core,
            thread: self.shared.next_thread.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn cores(&self) -> Vec<CoreId> {
        self.shared.config.cores().collect()
    }

    pub fn managers(&self) -> &[CoreId] {
        &self.shared.managers
    }

    /// Manager core arbitrating the lock or monitor with `hash`
    pub fn manager_for(&self, hash: u32) -> CoreId {
        self.shared.manager_for(hash)
    }

    /// Counters of one core
    pub fn core_stats(&self, core: CoreId) -> Option<StatsSnapshot> {
        self.shared.index(core).map(|i| self.shared.stats[i].snapshot())
    }

    /// Counters summed over all cores
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.iter().map(|s| s.snapshot()).sum()
    }

    pub fn reset_stats(&self) {
        self.shared.stats.iter().for_each(|s| s.reset());
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop every pump thread
    ///
    /// Threads blocked on a request get `Disconnected`.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.pending.lock().clear();
        self.shared.bodies.lock().clear();
        for (core, mailbox) in self.cores().into_iter().zip(&self.shared.mailboxes) {
            let poke = Message {
                op: OpCode::Nop,
                from: core,
                thread: 0,
                hash: 0,
                ticket: 0,
            };
            let _ = mailbox.send(poke);
        }
        for pump in self.pumps.lock().drain(..) {
            if pump.join().is_err() {
                log::error!("pump thread panicked");
            }
        }
        log::debug!("fabric down");
    }
}

impl Drop for Fabric {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A thread running on a core
///
/// Every lock, atomic and monitor operation takes the handle of the calling
/// thread: it names the requesting core and thread in the messages.
pub struct CoreHandle {
    shared: Arc<Shared>,
    core: CoreId,
    thread: u32,
}

impl CoreHandle {
    pub fn id(&self) -> CoreId {
        self.core
    }

    pub fn thread(&self) -> u32 {
        self.thread
    }

    /// Another thread on the same core
    pub fn new_thread(&self) -> CoreHandle {
        CoreHandle {
            shared: self.shared.clone(),
            core: self.core,
            thread: self.shared.next_thread.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn manager_for(&self, hash: u32) -> CoreId {
        self.shared.manager_for(hash)
    }

    fn message(&self, op: OpCode, hash: u32, ticket: u32) -> Message {
        Message {
            op,
            from: self.core,
            thread: self.thread,
            hash,
            ticket,
        }
    }

    /// Send a request to the manager of `hash` and block for the reply
    pub fn request(&self, op: OpCode, hash: u32) -> Result<Message> {
        let manager = self.shared.manager_for(hash);
        let ticket = self.shared.ticket();
        let (tx, rx) = channel::bounded(1);
        self.shared.pending.lock().insert(ticket, tx);

        if let Err(e) = self.shared.post(manager, self.message(op, hash, ticket)) {
            self.shared.pending.lock().remove(&ticket);
            return Err(e);
        }
        rx.recv().map_err(|_| SyncError::Disconnected(manager))
    }

    /// Send a message to the manager of `hash` without waiting
    pub fn send(&self, op: OpCode, hash: u32) -> Result<()> {
        let manager = self.shared.manager_for(hash);
        self.shared.post(manager, self.message(op, hash, 0))
    }

    /// Run `body` as a new thread on another core
    ///
    /// Cores are picked round robin, skipping this core and disabled islands.
    pub fn spawn<F>(&self, body: F) -> Result<SpawnHandle>
    where
        F: FnOnce(CoreHandle) + Send + 'static,
    {
        let target = self.shared.scheduler.pick(self.core);
        let thread = self.shared.next_thread.fetch_add(1, Ordering::Relaxed);
        let id = self.shared.ticket();
        let (done_tx, done_rx) = channel::bounded(1);

        let body: Body = Box::new(move |handle: CoreHandle| {
            let panicked = std::panic::catch_unwind(AssertUnwindSafe(|| body(handle))).is_err();
            let _ = done_tx.send(panicked);
        });
        self.shared.bodies.lock().insert(id, body);

        let message = Message {
            op: OpCode::ThreadSpawn,
            from: self.core,
            thread,
            hash: id,
            ticket: 0,
        };
        if let Err(e) = self.shared.post(target, message) {
            self.shared.bodies.lock().remove(&id);
            return Err(e);
        }
        log::debug!("{} thread {}: spawned thread {} on {}", self.core, self.thread, thread, target);
        Ok(SpawnHandle::new(thread, target, done_rx))
    }

    /// Suspend the calling thread
    pub fn sleep(&self, duration: Duration) {
        log::trace!("{} thread {}: sleep {:?}", self.core, self.thread, duration);
        thread::sleep(duration);
    }
}

impl std::fmt::Debug for CoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreHandle")
            .field("core", &self.core)
            .field("thread", &self.thread)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fabric(cores: usize) -> Fabric {
        Fabric::new(FabricConfig::single_island(cores)).unwrap()
    }

    #[test]
    fn test_request_reply_round_trip() {
        let fabric = fabric(2);
        let core = fabric.core(CoreId::new(0, 1)).unwrap();
        let reply = core.request(OpCode::RwWriteTry, 99).unwrap();
        assert_eq!(reply.op, OpCode::RwWriteAck);
        assert_eq!(reply.from, CoreId::new(0, 0));
        assert_eq!(reply.thread, core.thread());

        core.send(OpCode::RwWriteUnlock, 99).unwrap();
        let reply = core.request(OpCode::RwReadTry, 99).unwrap();
        assert_eq!(reply.op, OpCode::RwReadAck);
    }

    #[test]
    fn test_unknown_core() {
        let fabric = fabric(2);
        assert!(fabric.core(CoreId::new(0, 5)).is_err());
        assert!(fabric.core(CoreId::new(1, 0)).is_err());
    }

    #[test]
    fn test_requests_after_shutdown_fail() {
        let fabric = fabric(2);
        let core = fabric.core(CoreId::new(0, 1)).unwrap();
        fabric.shutdown();
        assert!(fabric.is_shut_down());
        assert!(matches!(core.request(OpCode::RwRead, 1), Err(SyncError::Disconnected(_))));
    }

    #[test]
    fn test_stats_count_requests() {
        let fabric = fabric(1);
        let core = fabric.core(CoreId::new(0, 0)).unwrap();
        core.request(OpCode::RwReadTry, 5).unwrap();
        core.request(OpCode::RwWriteTry, 5).unwrap();
        let stats = fabric.stats();
        assert_eq!(stats.lock_requests, 2);
        assert_eq!(stats.lock_grants, 1);
        assert_eq!(stats.lock_denials, 1);

        fabric.reset_stats();
        assert_eq!(fabric.stats(), StatsSnapshot::default());
    }
}
