//! Error Module - Synchronization Error Types
//!
//! # Error Categories
//!
//! ## Usage Errors
//! - `NotHeld` - releasing a lock the caller does not hold
//! - `NotOwner` - monitor operation without owning the monitor
//!
//! ## Fabric Errors
//! - `Disconnected` - a core's mailbox is gone (fabric shut down)
//! - `Protocol` - a reply with an unexpected op code
//! - `ThreadPanicked` - a spawned thread panicked before `join`
//!
//! ## Configuration Errors
//! - `Configuration` - invalid fabric layout
//!
//! There is no timeout error: a request to an arbiter that never answers
//! blocks the caller.

use crate::ops::{CoreId, OpCode};
use thiserror::Error;

/// Which side of a reader/writer lock an operation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKind::Read => write!(f, "read"),
            LockKind::Write => write!(f, "write"),
        }
    }
}

/// Main error type for synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Unlock of a lock the calling thread does not hold
    ///
    /// **When returned:** `read_unlock`/`write_unlock` without a matching
    /// successful lock on the same core and thread
    ///
    /// **Recovery strategy:** Caller bug - fix the lock pairing
    #[error("{kind} lock {hash:#x} is not held by {core} thread {thread}")]
    NotHeld {
        hash: u32,
        kind: LockKind,
        core: CoreId,
        thread: u32,
    },

    /// Monitor exit, wait or notify without owning the monitor
    #[error("monitor {hash:#x} is not owned by {core} thread {thread}")]
    NotOwner { hash: u32, core: CoreId, thread: u32 },

    /// Mailbox of a core is closed
    ///
    /// **When returned:** The fabric was shut down while a request was
    /// outstanding, or a message was sent after shutdown
    #[error("mailbox of core {0} is closed")]
    Disconnected(CoreId),

    /// Reply does not match the request
    #[error("protocol error: {request} answered with {reply}")]
    Protocol { request: OpCode, reply: OpCode },

    /// Spawned thread panicked
    #[error("thread {0} panicked")]
    ThreadPanicked(u32),

    /// Host thread could not be started
    #[error("failed to start thread: {0}")]
    Spawn(String),

    /// Invalid fabric configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Errors that come from misuse rather than from the fabric
    pub fn is_usage_error(&self) -> bool {
        matches!(self, SyncError::NotHeld { .. } | SyncError::NotOwner { .. })
    }

    /// Fabric-level failures the caller cannot fix by retrying
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Disconnected(_) | SyncError::Protocol { .. } | SyncError::Spawn(_)
        )
    }
}

/// Result type alias for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;
