//! Object Memory - Loaded, relocated heap image
//!
//! An [`ObjectMemory`] is immutable once built. Each memory owns its parent
//! through an `Arc`, so a chain always ends at a bootstrap memory with no
//! parent and cannot form a cycle.
//!
//! Canonical ranges of a chain are contiguous: a memory's canonical start
//! is its parent's canonical end.
//!
//! ```text
//!  canonical:  [ bootstrap )[ library )[ application )
//!  runtime:    start of each memory wherever it was loaded
//! ```

use std::fmt;
use std::sync::Arc;

use crate::address::{Address, Offset};
use crate::format::ByteOrder;
use crate::heap::PinnedBuffer;
use crate::typemap::TypeMap;

/// A loaded object memory
pub struct ObjectMemory {
    uri: String,
    start: Address,
    root: Address,
    hash: i32,
    canonical_start: Address,
    contents: Arc<[u8]>,
    bytes_per_word: usize,
    byte_order: ByteOrder,
    read_only: bool,
    typemap: Option<TypeMap>,
    parent: Option<Arc<ObjectMemory>>,
    pinned: Option<PinnedBuffer>,
}

/// Construction parameters for [`ObjectMemory`]
pub struct ObjectMemoryParts {
    pub uri: String,
    pub start: Address,
    pub root_offset: usize,
    pub hash: i32,
    pub canonical_start: Address,
    pub contents: Vec<u8>,
    pub bytes_per_word: usize,
    pub byte_order: ByteOrder,
    pub read_only: bool,
    pub typemap: Option<TypeMap>,
    pub parent: Option<Arc<ObjectMemory>>,
}

impl ObjectMemory {
    pub fn new(parts: ObjectMemoryParts) -> Self {
        Self {
            root: parts.start.add_bytes(parts.root_offset),
            uri: parts.uri,
            start: parts.start,
            hash: parts.hash,
            canonical_start: parts.canonical_start,
            contents: parts.contents.into(),
            bytes_per_word: parts.bytes_per_word,
            byte_order: parts.byte_order,
            read_only: parts.read_only,
            typemap: parts.typemap,
            parent: parts.parent,
            pinned: None,
        }
    }

    /// Keep `buffer` pinned for as long as this memory lives
    pub fn with_pinned(mut self, buffer: PinnedBuffer) -> Self {
        self.pinned = Some(buffer);
        self
    }

    /// RAM buffer backing a memory loaded into RAM on the target
    pub fn pinned(&self) -> Option<&PinnedBuffer> {
        self.pinned.as_ref()
    }

    /// Canonical start for a memory built on top of `parent`
    pub fn canonical_start_after(parent: Option<&ObjectMemory>, base: Address) -> Address {
        parent.map(|p| p.canonical_end()).unwrap_or(base)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Runtime address of the first byte
    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start.add_bytes(self.size())
    }

    pub fn size(&self) -> usize {
        self.contents.len()
    }

    /// Runtime address of the root object
    pub fn root(&self) -> Address {
        self.root
    }

    pub fn root_offset(&self) -> Offset {
        self.root - self.start
    }

    /// Hash of the canonical, unrelocated contents
    pub fn hash(&self) -> i32 {
        self.hash
    }

    pub fn canonical_start(&self) -> Address {
        self.canonical_start
    }

    pub fn canonical_end(&self) -> Address {
        self.canonical_start.add_bytes(self.size())
    }

    /// Relocated contents in target byte order
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub fn bytes_per_word(&self) -> usize {
        self.bytes_per_word
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn typemap(&self) -> Option<&TypeMap> {
        self.typemap.as_ref()
    }

    pub fn parent(&self) -> Option<&Arc<ObjectMemory>> {
        self.parent.as_ref()
    }

    /// Number of memories below this one
    pub fn parent_count(&self) -> usize {
        self.ancestors().count()
    }

    /// Parents from nearest to bootstrap
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent.as_deref(),
        }
    }

    /// The memory at the bottom of the chain
    pub fn bootstrap(&self) -> &ObjectMemory {
        self.ancestors().last().unwrap_or(self)
    }

    pub fn contains(&self, address: Address) -> bool {
        !address.lo(self.start) && address.lo(self.end())
    }

    pub fn contains_canonical(&self, address: Address) -> bool {
        !address.lo(self.canonical_start) && address.lo(self.canonical_end())
    }

    /// Word at byte `offset`, decoded in this memory's byte order
    pub fn read_word(&self, offset: usize) -> Option<u64> {
        read_word(&self.contents, offset, self.bytes_per_word, self.byte_order)
    }
}

impl fmt::Debug for ObjectMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectMemory")
            .field("uri", &self.uri)
            .field("start", &self.start)
            .field("size", &self.size())
            .field("root", &self.root)
            .field("hash", &self.hash)
            .field("parent", &self.parent.as_ref().map(|p| p.uri().to_string()))
            .finish()
    }
}

impl fmt::Display for ObjectMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {}) root={} hash={}",
            self.uri,
            self.start,
            self.end(),
            self.root,
            self.hash
        )
    }
}

/// Iterator up a parent chain
pub struct Ancestors<'a> {
    next: Option<&'a ObjectMemory>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a ObjectMemory;

    fn next(&mut self) -> Option<&'a ObjectMemory> {
        let current = self.next?;
        self.next = current.parent.as_deref();
        Some(current)
    }
}

/// Decode a word of `width` bytes at `offset`
pub fn read_word(bytes: &[u8], offset: usize, width: usize, order: ByteOrder) -> Option<u64> {
    let raw = bytes.get(offset..offset.checked_add(width)?)?;
    Some(match (width, order) {
        (4, ByteOrder::Big) => u32::from_be_bytes(raw.try_into().ok()?) as u64,
        (4, ByteOrder::Little) => u32::from_le_bytes(raw.try_into().ok()?) as u64,
        (8, ByteOrder::Big) => u64::from_be_bytes(raw.try_into().ok()?),
        (8, ByteOrder::Little) => u64::from_le_bytes(raw.try_into().ok()?),
        _ => return None,
    })
}

/// Encode `value` as a word of `width` bytes at `offset`
///
/// Returns `false` if the word does not fit in the buffer or the value
/// does not fit in `width` bytes.
pub fn write_word(bytes: &mut [u8], offset: usize, width: usize, order: ByteOrder, value: u64) -> bool {
    let Some(end) = offset.checked_add(width) else {
        return false;
    };
    let Some(slot) = bytes.get_mut(offset..end) else {
        return false;
    };
    match (width, order) {
        (4, _) if value > u32::MAX as u64 => false,
        (4, ByteOrder::Big) => {
            slot.copy_from_slice(&(value as u32).to_be_bytes());
            true
        },
        (4, ByteOrder::Little) => {
            slot.copy_from_slice(&(value as u32).to_le_bytes());
            true
        },
        (8, ByteOrder::Big) => {
            slot.copy_from_slice(&value.to_be_bytes());
            true
        },
        (8, ByteOrder::Little) => {
            slot.copy_from_slice(&value.to_le_bytes());
            true
        },
        _ => false,
    }
}
