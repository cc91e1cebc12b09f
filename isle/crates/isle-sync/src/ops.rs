//! Mailbox Message Protocol
//!
//! Every cross-core interaction is a message tagged with a small op code.
//! Requests go to the core that manages the lock or monitor; replies come
//! back to the requesting core carrying the request's ticket.
//!
//! Monitor replies: `MNTR_ACK` grants an enter or confirms an exit or
//! signal, `MNTR_NOTIFICATION`/`MNTR_NOTIFICATION_ALL` wake a waiter, and a
//! `NOP` reply means the requester does not own the monitor.
//!
//! ```text
//! header word:  | island (13) | core (3) | op (16) |
//!                 31       19   18    16   15     0
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bits of the header word that hold the op code
pub const OP_BITS: u32 = 16;
/// Bits of the header word that hold the core within its island
pub const CORE_BITS: u32 = 3;
/// Largest number of cores per island
pub const MAX_CORES_PER_ISLAND: usize = 1 << CORE_BITS;
/// Largest number of islands
pub const MAX_ISLANDS: usize = 1 << (32 - OP_BITS - CORE_BITS);

/// Message kinds understood by the fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum OpCode {
    Nop = 0,
    ThreadSpawn = 1,
    MonitorAck = 2,
    MonitorNotify = 3,
    MonitorNotifyAll = 4,
    MonitorEnter = 5,
    MonitorExit = 6,
    MonitorWait = 7,
    MonitorSignal = 8,
    MonitorBroadcast = 9,
    CasAck = 18,
    CasNack = 28,
    RwWrite = 30,
    RwWriteTry = 31,
    RwWriteAck = 32,
    RwWriteNack = 33,
    RwWriteUnlock = 34,
    RwRead = 35,
    RwReadTry = 36,
    RwReadAck = 37,
    RwReadNack = 38,
    RwReadUnlock = 39,
}

impl OpCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => OpCode::Nop,
            1 => OpCode::ThreadSpawn,
            2 => OpCode::MonitorAck,
            3 => OpCode::MonitorNotify,
            4 => OpCode::MonitorNotifyAll,
            5 => OpCode::MonitorEnter,
            6 => OpCode::MonitorExit,
            7 => OpCode::MonitorWait,
            8 => OpCode::MonitorSignal,
            9 => OpCode::MonitorBroadcast,
            18 => OpCode::CasAck,
            28 => OpCode::CasNack,
            30 => OpCode::RwWrite,
            31 => OpCode::RwWriteTry,
            32 => OpCode::RwWriteAck,
            33 => OpCode::RwWriteNack,
            34 => OpCode::RwWriteUnlock,
            35 => OpCode::RwRead,
            36 => OpCode::RwReadTry,
            37 => OpCode::RwReadAck,
            38 => OpCode::RwReadNack,
            39 => OpCode::RwReadUnlock,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Requests handled by a lock arbiter
    pub fn is_lock_request(self) -> bool {
        matches!(
            self,
            OpCode::RwWrite
                | OpCode::RwWriteTry
                | OpCode::RwWriteUnlock
                | OpCode::RwRead
                | OpCode::RwReadTry
                | OpCode::RwReadUnlock
        )
    }

    /// Requests handled by a monitor manager
    pub fn is_monitor_request(self) -> bool {
        matches!(
            self,
            OpCode::MonitorEnter
                | OpCode::MonitorExit
                | OpCode::MonitorWait
                | OpCode::MonitorSignal
                | OpCode::MonitorBroadcast
        )
    }

    /// Requests that are never answered
    pub fn is_release(self) -> bool {
        matches!(self, OpCode::RwWriteUnlock | OpCode::RwReadUnlock)
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Nop => "NOP",
            OpCode::ThreadSpawn => "TH_SPAWN",
            OpCode::MonitorAck => "MNTR_ACK",
            OpCode::MonitorNotify => "MNTR_NOTIFICATION",
            OpCode::MonitorNotifyAll => "MNTR_NOTIFICATION_ALL",
            OpCode::MonitorEnter => "MNTR_ENTER",
            OpCode::MonitorExit => "MNTR_EXIT",
            OpCode::MonitorWait => "MNTR_WAIT",
            OpCode::MonitorSignal => "MNTR_SIGNAL",
            OpCode::MonitorBroadcast => "MNTR_BROADCAST",
            OpCode::CasAck => "AT_CAS_ACK",
            OpCode::CasNack => "AT_CAS_NACK",
            OpCode::RwWrite => "RW_WRITE",
            OpCode::RwWriteTry => "RW_WRITE_TRY",
            OpCode::RwWriteAck => "RW_WRITE_ACK",
            OpCode::RwWriteNack => "RW_WRITE_NACK",
            OpCode::RwWriteUnlock => "RW_WRITE_UNLOCK",
            OpCode::RwRead => "RW_READ",
            OpCode::RwReadTry => "RW_READ_TRY",
            OpCode::RwReadAck => "RW_READ_ACK",
            OpCode::RwReadNack => "RW_READ_NACK",
            OpCode::RwReadUnlock => "RW_READ_UNLOCK",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A hardware core, addressed by island and position in the island
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoreId {
    pub island: u16,
    pub core: u8,
}

impl CoreId {
    pub const fn new(island: u16, core: u8) -> Self {
        Self { island, core }
    }

    /// Owner encoding used by monitors: `(island << 3) | core`
    pub fn owner_code(self) -> u32 {
        ((self.island as u32) << CORE_BITS) | self.core as u32
    }

    pub fn from_owner_code(code: u32) -> Self {
        Self {
            island: (code >> CORE_BITS) as u16,
            core: (code & ((1 << CORE_BITS) - 1)) as u8,
        }
    }

    /// Position in a fabric with `cores_per_island` cores per island
    pub fn index(self, cores_per_island: usize) -> usize {
        self.island as usize * cores_per_island + self.core as usize
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.island, self.core)
    }
}

/// One mailbox message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub op: OpCode,
    /// Sending core
    pub from: CoreId,
    /// Thread on the sending core the message is about
    pub thread: u32,
    /// Hash code of the lock or monitor, or the spawned closure's id
    pub hash: u32,
    /// Pairs a reply with its request; 0 for messages nobody waits on
    pub ticket: u32,
}

impl Message {
    pub fn header(&self) -> u32 {
        encode_header(self.from, self.op)
    }

    /// Reply from `manager` to this request
    pub fn reply(&self, op: OpCode, manager: CoreId) -> Message {
        Message {
            op,
            from: manager,
            thread: self.thread,
            hash: self.hash,
            ticket: self.ticket,
        }
    }
}

pub fn encode_header(from: CoreId, op: OpCode) -> u32 {
    ((from.island as u32) << (OP_BITS + CORE_BITS)) | ((from.core as u32) << OP_BITS) | op.code() as u32
}

pub fn decode_header(header: u32) -> Option<(CoreId, OpCode)> {
    let op = OpCode::from_u16((header & 0xffff) as u16)?;
    let core = ((header >> OP_BITS) & ((1 << CORE_BITS) - 1)) as u8;
    let island = (header >> (OP_BITS + CORE_BITS)) as u16;
    Some((CoreId::new(island, core), op))
}
