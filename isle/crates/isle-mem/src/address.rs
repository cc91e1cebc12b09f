//! Address Module - Machine Address Value Types
//!
//! `Address`, `Offset` and `UWord` wrap the target machine word. Arithmetic
//! is only defined between compatible kinds:
//!
//! ```text
//! Address + Offset  -> Address
//! Address - Offset  -> Address
//! Address - Address -> Offset
//! Address & UWord   -> Address
//! Address | UWord   -> Address
//! Offset  +/- Offset -> Offset
//! ```
//!
//! Adding two addresses does not type-check.
//!
//! The word width is 64 bits with the `s64` feature (default) and 32 bits
//! without it. Comparisons between addresses are unsigned.
//!
//! When running as a hosted build tool, addresses are canonicalized through
//! an [`AddressPool`] so that pooled handles compare by identity.

use crate::error::{MemError, Result};
use indexmap::IndexSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, BitAnd, BitOr, Sub};

/// Signed machine word
#[cfg(feature = "s64")]
pub type Word = i64;
/// Unsigned machine word
#[cfg(feature = "s64")]
pub type UPrim = u64;

/// Signed machine word
#[cfg(not(feature = "s64"))]
pub type Word = i32;
/// Unsigned machine word
#[cfg(not(feature = "s64"))]
pub type UPrim = u32;

/// Bytes in a machine word of this build
pub const BYTES_PER_WORD: usize = std::mem::size_of::<UPrim>();

/// Address in the target address space
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(UPrim);

/// Signed distance between two addresses
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Offset(Word);

/// Unsigned machine word, used for masks and raw values
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct UWord(UPrim);

impl Address {
    /// The null address
    pub const fn zero() -> Self {
        Address(0)
    }

    /// The highest representable address
    pub const fn max() -> Self {
        Address(UPrim::MAX)
    }

    pub const fn from_prim(value: UPrim) -> Self {
        Address(value)
    }

    /// Convert from a 64-bit value, failing if it does not fit the word
    pub fn from_u64(value: u64) -> Option<Self> {
        UPrim::try_from(value).ok().map(Address)
    }

    pub fn from_usize(value: usize) -> Option<Self> {
        UPrim::try_from(value).ok().map(Address)
    }

    pub const fn to_prim(self) -> UPrim {
        self.0
    }

    pub fn to_u64(self) -> u64 {
        self.0 as u64
    }

    pub fn to_uword(self) -> UWord {
        UWord(self.0)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_max(self) -> bool {
        self.0 == UPrim::MAX
    }

    /// Unsigned `self < other`
    pub fn lo(self, other: Address) -> bool {
        self.0 < other.0
    }

    /// Unsigned `self > other`
    pub fn hi(self, other: Address) -> bool {
        self.0 > other.0
    }

    /// Distance from `other` up to `self`
    ///
    /// `self` must not be below `other`.
    pub fn diff(self, other: Address) -> Offset {
        debug_assert!(self.0 >= other.0, "diff: {} is below {}", self, other);
        Offset(self.0.wrapping_sub(other.0) as Word)
    }

    pub fn add_bytes(self, bytes: usize) -> Address {
        Address(self.0.wrapping_add(bytes as UPrim))
    }

    /// Round up to a power-of-two boundary
    pub fn round_up(self, alignment: usize) -> Address {
        debug_assert!(alignment.is_power_of_two());
        let mask = alignment as UPrim - 1;
        Address(self.0.wrapping_add(mask) & !mask)
    }

    /// Round down to a power-of-two boundary
    pub fn round_down(self, alignment: usize) -> Address {
        debug_assert!(alignment.is_power_of_two());
        Address(self.0 & !(alignment as UPrim - 1))
    }

    pub fn round_up_to_word(self) -> Address {
        self.round_up(BYTES_PER_WORD)
    }

    pub fn round_down_to_word(self) -> Address {
        self.round_down(BYTES_PER_WORD)
    }

    pub fn is_aligned(self, alignment: usize) -> bool {
        self.0 & (alignment as UPrim - 1) == 0
    }
}

impl Offset {
    pub const fn zero() -> Self {
        Offset(0)
    }

    pub const fn from_word(value: Word) -> Self {
        Offset(value)
    }

    pub fn from_bytes(bytes: usize) -> Self {
        Offset(bytes as Word)
    }

    /// Offset of `words` words of `bytes_per_word` bytes
    pub fn from_words(words: usize, bytes_per_word: usize) -> Self {
        Offset((words * bytes_per_word) as Word)
    }

    pub const fn to_word(self) -> Word {
        self.0
    }

    /// Offset in whole words, rounding toward zero
    pub fn to_words(self, bytes_per_word: usize) -> Word {
        self.0 / bytes_per_word as Word
    }

    /// Offset in bytes, failing if negative
    pub fn to_usize(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl UWord {
    pub const fn zero() -> Self {
        UWord(0)
    }

    pub const fn max() -> Self {
        UWord(UPrim::MAX)
    }

    pub const fn from_prim(value: UPrim) -> Self {
        UWord(value)
    }

    pub const fn to_prim(self) -> UPrim {
        self.0
    }

    pub fn to_offset(self) -> Offset {
        Offset(self.0 as Word)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_max(self) -> bool {
        self.0 == UPrim::MAX
    }
}

impl Add<Offset> for Address {
    type Output = Address;

    fn add(self, rhs: Offset) -> Address {
        Address((self.0 as Word).wrapping_add(rhs.0) as UPrim)
    }
}

impl Sub<Offset> for Address {
    type Output = Address;

    fn sub(self, rhs: Offset) -> Address {
        Address((self.0 as Word).wrapping_sub(rhs.0) as UPrim)
    }
}

impl Sub<Address> for Address {
    type Output = Offset;

    fn sub(self, rhs: Address) -> Offset {
        self.diff(rhs)
    }
}

impl BitAnd<UWord> for Address {
    type Output = Address;

    fn bitand(self, rhs: UWord) -> Address {
        Address(self.0 & rhs.0)
    }
}

impl BitOr<UWord> for Address {
    type Output = Address;

    fn bitor(self, rhs: UWord) -> Address {
        Address(self.0 | rhs.0)
    }
}

impl Add for Offset {
    type Output = Offset;

    fn add(self, rhs: Offset) -> Offset {
        Offset(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for Offset {
    type Output = Offset;

    fn sub(self, rhs: Offset) -> Offset {
        Offset(self.0.wrapping_sub(rhs.0))
    }
}

impl BitAnd for UWord {
    type Output = UWord;

    fn bitand(self, rhs: UWord) -> UWord {
        UWord(self.0 & rhs.0)
    }
}

impl BitOr for UWord {
    type Output = UWord;

    fn bitor(self, rhs: UWord) -> UWord {
        UWord(self.0 | rhs.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset({})", self.0)
    }
}

impl fmt::Display for UWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for UWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UWord({:#x})", self.0)
    }
}

// ============================================================================
// HOSTED ADDRESS POOL
// ============================================================================

/// Arena canonicalizing addresses by raw value
///
/// Used by the hosted build tool only. Each distinct raw value is stored
/// once; [`PooledAddress`] handles compare by slot identity, so two handles
/// for the same value are `==` and handles from different pools never are.
/// The pool lives as long as the tool that created it.
pub struct AddressPool {
    slots: RwLock<IndexSet<UPrim>>,
    capacity: usize,
}

impl AddressPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(IndexSet::new()),
            capacity,
        }
    }

    /// Return the canonical handle for `address`, adding it if new
    pub fn intern(&self, address: Address) -> Result<PooledAddress<'_>> {
        if let Some(index) = self.slots.read().get_index_of(&address.0) {
            return Ok(PooledAddress { pool: self, index });
        }

        let mut slots = self.slots.write();
        if let Some(index) = slots.get_index_of(&address.0) {
            return Ok(PooledAddress { pool: self, index });
        }
        if slots.len() >= self.capacity {
            return Err(MemError::PoolExhausted {
                value: address.to_u64(),
                capacity: self.capacity,
            });
        }
        let (index, _) = slots.insert_full(address.0);
        Ok(PooledAddress { pool: self, index })
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for AddressPool {
    fn default() -> Self {
        Self::new(1 << 20)
    }
}

impl fmt::Debug for AddressPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressPool")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Canonical address handle owned by an [`AddressPool`]
#[derive(Clone, Copy)]
pub struct PooledAddress<'pool> {
    pool: &'pool AddressPool,
    index: usize,
}

impl PooledAddress<'_> {
    pub fn address(&self) -> Address {
        self.pool
            .slots
            .read()
            .get_index(self.index)
            .map(|raw| Address(*raw))
            .unwrap_or_default()
    }
}

impl PartialEq for PooledAddress<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.pool, other.pool) && self.index == other.index
    }
}

impl Eq for PooledAddress<'_> {}

impl fmt::Debug for PooledAddress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PooledAddress({}, slot {})", self.address(), self.index)
    }
}
