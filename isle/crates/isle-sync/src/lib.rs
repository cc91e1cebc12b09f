//! # isle-sync - Cross-Core Synchronization for the Isle VM
//!
//! Cores share no coherent memory. Every lock, atomic and monitor operation
//! is a message to the manager core that arbitrates it, and the calling
//! thread blocks until the reply arrives.
//!
//! ## Overview
//!
//! - **Fabric**: islands of cores, one mailbox and pump thread per core
//! - **Reader/writer locks**: FIFO arbitration on the manager core, try variants always answered
//! - **Atomics**: `AtomicInteger2` and `AtomicReference` as write-locked critical sections
//! - **Monitors**: reentrant enter/exit with wait and notify
//! - **Threads**: round-robin spawn onto other cores, join and sleep
//!
//! ## Quick Start
//!
//! ```rust
//! use isle_sync::{AtomicInteger2, CoreId, Fabric, FabricConfig};
//!
//! let fabric = Fabric::new(FabricConfig::single_island(2))?;
//! let core = fabric.core(CoreId::new(0, 1))?;
//!
//! let counter = AtomicInteger2::new(0);
//! counter.increment_and_get(&core)?;
//! assert_eq!(counter.get(&core)?, 1);
//! # Ok::<(), isle_sync::SyncError>(())
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! ┌──────────┐  RW_WRITE   ┌───────────────┐
//! │ core 0:1 │────────────▶│ manager 0:0   │
//! │ thread 4 │             │ LockArbiter   │
//! │ (blocks) │◀────────────│ MonitorManager│
//! └──────────┘ RW_WRITE_ACK└───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`ops`]: opcodes, core ids and the message header encoding
//! - [`fabric`]: mailboxes, pump threads and core handles
//! - [`arbiter`]: reader/writer lock state on a manager core
//! - [`monitor`]: monitor state and the client-side [`Monitor`]
//! - [`rwlock`]: the client-side [`RwLock`]
//! - [`atomic`]: atomic values built on `RwLock`

pub mod arbiter;
pub mod atomic;
pub mod config;
pub mod error;
pub mod fabric;
pub mod hash;
pub mod monitor;
pub mod ops;
pub mod rwlock;
pub mod spawn;
pub mod stats;

pub use atomic::{AtomicInteger2, AtomicReference};
pub use config::FabricConfig;
pub use error::{LockKind, Result, SyncError};
pub use fabric::{CoreHandle, Fabric};
pub use monitor::{Monitor, MonitorGuard};
pub use ops::{CoreId, Message, OpCode};
pub use rwlock::{LockPhase, ReadGuard, RwLock, WriteGuard};
pub use spawn::SpawnHandle;
pub use stats::StatsSnapshot;

/// isle-sync version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
