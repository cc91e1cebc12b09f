//! Thread Spawn - Placing Threads on Cores
//!
//! A spawning thread picks a core round robin and mails it a `TH_SPAWN`
//! message naming the closure to run. The target core's pump starts the
//! thread; `join` waits for it to finish.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::channel::Receiver;

use crate::error::{Result, SyncError};
use crate::ops::CoreId;

/// Round-robin choice over the enabled cores
#[derive(Debug)]
pub struct RoundRobin {
    cores: Vec<CoreId>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(cores: Vec<CoreId>) -> Self {
        Self {
            cores,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next core other than `caller`; `caller` itself if it is the only core
    pub fn pick(&self, caller: CoreId) -> CoreId {
        for _ in 0..self.cores.len() {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.cores.len();
            if self.cores[index] != caller {
                return self.cores[index];
            }
        }
        caller
    }
}

/// Handle to a spawned thread
#[derive(Debug)]
pub struct SpawnHandle {
    thread: u32,
    core: CoreId,
    done: Receiver<bool>,
}

impl SpawnHandle {
    pub(crate) fn new(thread: u32, core: CoreId, done: Receiver<bool>) -> Self {
        Self { thread, core, done }
    }

    pub fn thread(&self) -> u32 {
        self.thread
    }

    /// Core the thread was placed on
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Block until the thread finishes
    pub fn join(self) -> Result<()> {
        match self.done.recv() {
            Ok(false) => Ok(()),
            Ok(true) => Err(SyncError::ThreadPanicked(self.thread)),
            Err(_) => Err(SyncError::Spawn(format!("thread {} was never started on {}", self.thread, self.core))),
        }
    }

    pub fn is_finished(&self) -> bool {
        !self.done.is_empty()
    }
}
