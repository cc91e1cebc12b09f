//! Relocate Module - Pointer Relocation of Object Memories
//!
//! An object memory is built against canonical addresses. Loading it means
//! rewriting every pointer word (every set bit of the oop map) from its
//! canonical value to the address the target memory now lives at.
//!
//! Relocation Strategy:
//! 1. `relocate_parents` rewrites pointers that fall in a parent's canonical range
//! 2. `relocate` rewrites pointers that fall in this memory's canonical range
//! 3. The caller checks the oop map is empty (every pointer was handled)
//! 4. `swap::swap_words` converts the memory to the target byte order
//!
//! ```text
//!   canonical value v in [c, c + size)   ->   target + (v - c)
//!   canonical value 0                    ->   0
//! ```
//!
//! Parents must already be loaded at their final addresses before step 1.
//! Pointer words are read and written in the image's byte order so that the
//! arithmetic does not depend on the host.

pub mod swap;

use std::fmt;

use crate::address::Address;
use crate::error::{MemError, Result};
use crate::format::ByteOrder;
use crate::heap::MemorySpace;
use crate::object_memory::{read_word, write_word, ObjectMemory};
use crate::oopmap::OopMap;

pub use swap::swap_words;

/// Word width and byte order of a memory component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordLayout {
    pub bytes_per_word: usize,
    pub order: ByteOrder,
}

impl WordLayout {
    pub fn new(bytes_per_word: usize, order: ByteOrder) -> Self {
        Self {
            bytes_per_word,
            order,
        }
    }
}

/// Counters for one relocation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelocationStats {
    /// Pointers into this memory
    pub pointers: usize,
    /// Pointers into a parent
    pub parent_pointers: usize,
    /// Null pointers
    pub null_pointers: usize,
    /// Words swapped to the target byte order
    pub swapped_words: usize,
    /// Safepoints polled
    pub safepoints: usize,
}

impl fmt::Display for RelocationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RelocationStats {{ pointers: {}, parent_pointers: {}, null: {}, swapped: {} }}",
            self.pointers, self.parent_pointers, self.null_pointers, self.swapped_words
        )
    }
}

/// Relocation engine for one memory component
pub struct Relocator<'a> {
    uri: &'a str,
    layout: WordLayout,
    safepoints: Option<&'a dyn MemorySpace>,
    safepoint_interval: usize,
    trace: bool,
    stats: RelocationStats,
}

impl<'a> Relocator<'a> {
    pub fn new(uri: &'a str, layout: WordLayout) -> Self {
        Self {
            uri,
            layout,
            safepoints: None,
            safepoint_interval: usize::MAX,
            trace: false,
            stats: RelocationStats::default(),
        }
    }

    /// Poll `space` for a safepoint before each pass and every `interval` pointers
    pub fn with_safepoints(mut self, space: &'a dyn MemorySpace, interval: usize) -> Self {
        self.safepoints = Some(space);
        self.safepoint_interval = interval.max(1);
        self
    }

    /// Log every rewritten pointer
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn stats(&self) -> RelocationStats {
        self.stats
    }

    /// Rewrite the pointers that refer into `parent` or its ancestors
    ///
    /// Bits of rewritten (and null) pointers are cleared; pointers into this
    /// memory are left for [`Relocator::relocate`].
    pub fn relocate_parents(
        &mut self,
        buffer: &mut [u8],
        oop_map: &mut OopMap,
        parent: Option<&ObjectMemory>,
    ) -> Result<usize> {
        let Some(parent) = parent else {
            return Ok(0);
        };
        let mut count = 0;
        self.poll();

        let mut next = oop_map.next_set_bit(0);
        while let Some(index) = next {
            let offset = self.word_offset(index, buffer.len())?;
            let value = self.load(buffer, offset)?;
            if value == 0 {
                self.stats.null_pointers += 1;
                oop_map.clear(index);
            } else if let Some(region) = std::iter::once(parent)
                .chain(parent.ancestors())
                .find(|m| m.contains_canonical(canonical(value)))
            {
                let relocated = region.start().to_u64() + (value - region.canonical_start().to_u64());
                self.store(buffer, offset, value, relocated)?;
                oop_map.clear(index);
                self.stats.parent_pointers += 1;
                count += 1;
                if count % self.safepoint_interval == 0 {
                    self.poll();
                }
            }
            next = oop_map.next_set_bit(index + 1);
        }
        Ok(count)
    }

    /// Rewrite pointers into this memory's canonical range
    ///
    /// `[canonical_start, canonical_start + buffer.len())` maps onto
    /// `[target, target + buffer.len())`. Returns `target`, the address the
    /// memory is relocated to.
    pub fn relocate(
        &mut self,
        buffer: &mut [u8],
        oop_map: &mut OopMap,
        target: Address,
        canonical_start: Address,
    ) -> Result<Address> {
        let size = buffer.len() as u64;
        let canonical_start = canonical_start.to_u64();
        let canonical_end = canonical_start + size;
        let mut count = 0;
        self.poll();

        let mut next = oop_map.next_set_bit(0);
        while let Some(index) = next {
            let offset = self.word_offset(index, buffer.len())?;
            let value = self.load(buffer, offset)?;
            if value == 0 {
                self.stats.null_pointers += 1;
                oop_map.clear(index);
            } else if value >= canonical_start && value < canonical_end {
                let relocated = target.to_u64() + (value - canonical_start);
                self.store(buffer, offset, value, relocated)?;
                oop_map.clear(index);
                self.stats.pointers += 1;
                count += 1;
                if count % self.safepoint_interval == 0 {
                    self.poll();
                }
            }
            next = oop_map.next_set_bit(index + 1);
        }
        self.poll();
        Ok(target)
    }

    /// Fail unless every bit of `oop_map` has been cleared
    pub fn verify_complete(&self, oop_map: &OopMap) -> Result<()> {
        let remaining = oop_map.cardinality();
        if remaining != 0 {
            return Err(MemError::RelocationIncomplete {
                uri: self.uri.to_string(),
                remaining,
            });
        }
        Ok(())
    }

    /// Convert every word to `order` if the memory is in the other order
    pub fn swap_to(&mut self, buffer: &mut [u8], order: ByteOrder) {
        if order != self.layout.order {
            self.stats.swapped_words += swap_words(buffer, self.layout.bytes_per_word);
        }
    }

    fn word_offset(&self, index: usize, len: usize) -> Result<usize> {
        let offset = index * self.layout.bytes_per_word;
        if offset + self.layout.bytes_per_word > len {
            return Err(MemError::format(
                self.uri,
                "oopmap",
                format!("bit {} marks a word beyond the {} byte memory", index, len),
            ));
        }
        Ok(offset)
    }

    fn load(&self, buffer: &[u8], offset: usize) -> Result<u64> {
        read_word(buffer, offset, self.layout.bytes_per_word, self.layout.order).ok_or_else(|| {
            MemError::Internal(format!("{}: unreadable word at offset {}", self.uri, offset))
        })
    }

    fn store(&self, buffer: &mut [u8], offset: usize, old: u64, new: u64) -> Result<()> {
        if !write_word(buffer, offset, self.layout.bytes_per_word, self.layout.order, new) {
            return Err(MemError::PointerOutOfRange {
                uri: self.uri.to_string(),
                offset,
                value: new,
                word: self.layout.bytes_per_word,
            });
        }
        if self.trace {
            log::trace!("{}: relocate [{}] {:#x} -> {:#x}", self.uri, offset, old, new);
        }
        Ok(())
    }

    fn poll(&mut self) {
        if let Some(space) = self.safepoints {
            space.safepoint();
            self.stats.safepoints += 1;
        }
    }
}

fn canonical(value: u64) -> Address {
    Address::from_u64(value).unwrap_or_else(Address::max)
}

/// Relocate a parent-less memory component in one call
///
/// Rewrites every pointer from `[canonical_start, canonical_start + len)`
/// to `[target, target + len)`, checks completeness and swaps to `order`.
pub fn relocate_memory(
    uri: &str,
    buffer: &mut [u8],
    oop_map: &mut OopMap,
    layout: WordLayout,
    target: Address,
    canonical_start: Address,
    order: ByteOrder,
) -> Result<RelocationStats> {
    let mut relocator = Relocator::new(uri, layout);
    relocator.relocate(buffer, oop_map, target, canonical_start)?;
    relocator.verify_complete(oop_map)?;
    relocator.swap_to(buffer, order);
    Ok(relocator.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_memory::ObjectMemoryParts;
    use std::sync::Arc;

    const LE8: WordLayout = WordLayout {
        bytes_per_word: 8,
        order: ByteOrder::Little,
    };

    fn put(buf: &mut [u8], offset: usize, value: u64) {
        assert!(write_word(buf, offset, 8, ByteOrder::Little, value));
    }

    fn get(buf: &[u8], offset: usize) -> u64 {
        read_word(buf, offset, 8, ByteOrder::Little).unwrap()
    }

    #[test]
    fn test_two_pointers_relocated() {
        let mut buf = vec![0u8; 64];
        put(&mut buf, 0, 0x1008);
        put(&mut buf, 32, 0x1020);
        let mut map = OopMap::new(8);
        map.set(0);
        map.set(4);

        let stats = relocate_memory(
            "test",
            &mut buf,
            &mut map,
            LE8,
            Address::from_prim(0x9000),
            Address::from_prim(0x1000),
            ByteOrder::Little,
        )
        .unwrap();

        assert_eq!(get(&buf, 0), 0x9008);
        assert_eq!(get(&buf, 32), 0x9020);
        assert_eq!(map.cardinality(), 0);
        assert_eq!(stats.pointers, 2);
    }

    #[test]
    fn test_null_pointer_short_circuits() {
        let mut buf = vec![0u8; 16];
        let mut map = OopMap::new(2);
        map.set(1);
        let stats = relocate_memory(
            "test",
            &mut buf,
            &mut map,
            LE8,
            Address::from_prim(0x9000),
            Address::from_prim(0x1000),
            ByteOrder::Little,
        )
        .unwrap();
        assert_eq!(get(&buf, 8), 0);
        assert_eq!(stats.null_pointers, 1);
        assert_eq!(stats.pointers, 0);
    }

    #[test]
    fn test_stray_pointer_is_incomplete() {
        let mut buf = vec![0u8; 16];
        put(&mut buf, 0, 0x5000);
        let mut map = OopMap::new(2);
        map.set(0);
        let err = relocate_memory(
            "stray",
            &mut buf,
            &mut map,
            LE8,
            Address::from_prim(0x9000),
            Address::from_prim(0x1000),
            ByteOrder::Little,
        )
        .unwrap_err();
        assert!(matches!(err, MemError::RelocationIncomplete { remaining: 1, .. }));
    }

    #[test]
    fn test_bit_beyond_memory_is_format_error() {
        let mut buf = vec![0u8; 16];
        let mut map = OopMap::new(8);
        map.set(5);
        let mut relocator = Relocator::new("short", LE8);
        let err = relocator
            .relocate(&mut buf, &mut map, Address::from_prim(0), Address::from_prim(0))
            .unwrap_err();
        assert!(err.to_string().contains("oopmap"));
    }

    #[test]
    fn test_parent_pointers() {
        let parent = Arc::new(ObjectMemory::new(ObjectMemoryParts {
            uri: "memory:bootstrap".to_string(),
            start: Address::from_prim(0x4000),
            root_offset: 0,
            hash: 0,
            canonical_start: Address::from_prim(0),
            contents: vec![0; 0x100],
            bytes_per_word: 8,
            byte_order: ByteOrder::Little,
            read_only: true,
            typemap: None,
            parent: None,
        }));

        let mut buf = vec![0u8; 24];
        put(&mut buf, 0, 0x10); // into parent
        put(&mut buf, 8, 0x108); // into this memory (canonical start 0x100)
        put(&mut buf, 16, 0);
        let mut map = OopMap::new(3);
        map.set(0);
        map.set(1);
        map.set(2);

        let mut relocator = Relocator::new("child", LE8);
        let parents = relocator
            .relocate_parents(&mut buf, &mut map, Some(&parent))
            .unwrap();
        assert_eq!(parents, 1);
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![1]);

        relocator
            .relocate(&mut buf, &mut map, Address::from_prim(0x7000), Address::from_prim(0x100))
            .unwrap();
        relocator.verify_complete(&map).unwrap();

        assert_eq!(get(&buf, 0), 0x4010);
        assert_eq!(get(&buf, 8), 0x7008);
        assert_eq!(get(&buf, 16), 0);
        let stats = relocator.stats();
        assert_eq!((stats.parent_pointers, stats.pointers, stats.null_pointers), (1, 1, 1));
    }

    #[test]
    fn test_32bit_overflow() {
        let layout = WordLayout::new(4, ByteOrder::Big);
        let mut buf = vec![0, 0, 0x10, 0x04, 0, 0, 0, 0];
        let mut map = OopMap::new(2);
        map.set(0);
        let mut relocator = Relocator::new("small", layout);
        let err = relocator
            .relocate(
                &mut buf,
                &mut map,
                Address::from_u64(0xffff_fffc).unwrap(),
                Address::from_prim(0x1000),
            )
            .unwrap_err();
        assert!(matches!(err, MemError::PointerOutOfRange { word: 4, .. }));
    }

    #[test]
    fn test_swap_after_relocation() {
        let layout = WordLayout::new(4, ByteOrder::Big);
        let mut buf = vec![0, 0, 0x10, 0x04, 0, 0, 0, 0];
        let mut map = OopMap::new(2);
        map.set(0);
        let stats = relocate_memory(
            "swap",
            &mut buf,
            &mut map,
            layout,
            Address::from_prim(0x2000),
            Address::from_prim(0x1000),
            ByteOrder::Little,
        )
        .unwrap();
        assert_eq!(buf, vec![0x04, 0x20, 0, 0, 0, 0, 0, 0]);
        assert_eq!(stats.swapped_words, 2);
    }
}
