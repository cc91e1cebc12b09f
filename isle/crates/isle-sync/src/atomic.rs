//! Atomic values built on [`RwLock`]
//!
//! Every operation is a critical section arbitrated by a manager core:
//! reads take the read lock, mutators hold the write lock for the whole
//! read-modify-write. Compare-and-set takes the write lock once and reports
//! a failed expectation immediately, it never retries.

use std::fmt;

use parking_lot::Mutex;

use crate::error::Result;
use crate::fabric::CoreHandle;
use crate::rwlock::RwLock;

/// 32-bit integer whose updates wrap like two's complement arithmetic
pub struct AtomicInteger2 {
    lock: RwLock,
    value: Mutex<i32>,
}

impl AtomicInteger2 {
    pub fn new(value: i32) -> Self {
        Self {
            lock: RwLock::new(),
            value: Mutex::new(value),
        }
    }

    /// Hash code of the guarding lock
    pub fn hash(&self) -> u32 {
        self.lock.hash()
    }

    pub fn get(&self, core: &CoreHandle) -> Result<i32> {
        let _guard = self.lock.read(core)?;
        Ok(*self.value.lock())
    }

    pub fn set(&self, core: &CoreHandle, value: i32) -> Result<()> {
        self.update(core, |_| value).map(|_| ())
    }

    pub fn get_and_set(&self, core: &CoreHandle, value: i32) -> Result<i32> {
        self.update(core, |_| value)
    }

    /// Store `update` if the current value equals `expect`
    pub fn compare_and_set(&self, core: &CoreHandle, expect: i32, update: i32) -> Result<bool> {
        let _guard = self.lock.write(core)?;
        Ok(swap_if(&mut *self.value.lock(), &expect, update))
    }

    /// Like [`compare_and_set`](Self::compare_and_set), but gives up when
    /// the write lock is not available at once
    pub fn weak_compare_and_set(&self, core: &CoreHandle, expect: i32, update: i32) -> Result<bool> {
        match self.lock.try_write(core)? {
            Some(_guard) => Ok(swap_if(&mut *self.value.lock(), &expect, update)),
            None => Ok(false),
        }
    }

    pub fn get_and_add(&self, core: &CoreHandle, delta: i32) -> Result<i32> {
        self.update(core, |v| v.wrapping_add(delta))
    }

    pub fn add_and_get(&self, core: &CoreHandle, delta: i32) -> Result<i32> {
        self.update(core, |v| v.wrapping_add(delta)).map(|v| v.wrapping_add(delta))
    }

    pub fn increment_and_get(&self, core: &CoreHandle) -> Result<i32> {
        self.add_and_get(core, 1)
    }

    pub fn decrement_and_get(&self, core: &CoreHandle) -> Result<i32> {
        self.add_and_get(core, -1)
    }

    pub fn get_and_increment(&self, core: &CoreHandle) -> Result<i32> {
        self.get_and_add(core, 1)
    }

    pub fn get_and_decrement(&self, core: &CoreHandle) -> Result<i32> {
        self.get_and_add(core, -1)
    }

    /// Apply `f` under the write lock, returning the previous value
    fn update(&self, core: &CoreHandle, f: impl FnOnce(i32) -> i32) -> Result<i32> {
        let _guard = self.lock.write(core)?;
        let mut value = self.value.lock();
        let previous = *value;
        *value = f(previous);
        Ok(previous)
    }
}

impl Default for AtomicInteger2 {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for AtomicInteger2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicInteger2")
            .field("hash", &format_args!("{:#x}", self.hash()))
            .finish_non_exhaustive()
    }
}

/// Shared reference cell compared by value
pub struct AtomicReference<V> {
    lock: RwLock,
    value: Mutex<V>,
}

impl<V: Clone + PartialEq + Send> AtomicReference<V> {
    pub fn new(value: V) -> Self {
        Self {
            lock: RwLock::new(),
            value: Mutex::new(value),
        }
    }

    pub fn hash(&self) -> u32 {
        self.lock.hash()
    }

    pub fn get(&self, core: &CoreHandle) -> Result<V> {
        let _guard = self.lock.read(core)?;
        Ok(self.value.lock().clone())
    }

    pub fn set(&self, core: &CoreHandle, value: V) -> Result<()> {
        let _guard = self.lock.write(core)?;
        *self.value.lock() = value;
        Ok(())
    }

    pub fn get_and_set(&self, core: &CoreHandle, value: V) -> Result<V> {
        let _guard = self.lock.write(core)?;
        Ok(std::mem::replace(&mut *self.value.lock(), value))
    }

    pub fn compare_and_set(&self, core: &CoreHandle, expect: &V, update: V) -> Result<bool> {
        let _guard = self.lock.write(core)?;
        Ok(swap_if(&mut *self.value.lock(), expect, update))
    }

    pub fn weak_compare_and_set(&self, core: &CoreHandle, expect: &V, update: V) -> Result<bool> {
        match self.lock.try_write(core)? {
            Some(_guard) => Ok(swap_if(&mut *self.value.lock(), expect, update)),
            None => Ok(false),
        }
    }
}

impl<V> fmt::Debug for AtomicReference<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicReference")
            .field("hash", &format_args!("{:#x}", self.lock.hash()))
            .finish_non_exhaustive()
    }
}

fn swap_if<V: PartialEq>(slot: &mut V, expect: &V, update: V) -> bool {
    if *slot == *expect {
        *slot = update;
        true
    } else {
        false
    }
}
