//! Oop Map - Pointer Bitmap for Object Memories
//!
//! One bit per word of a memory component. A set bit means the word at that
//! offset holds an object pointer that must be relocated.
//!
//! On disk the map is `ceil(size / 8)` bytes, least significant bit first:
//!
//! ```text
//! memory (8-byte words):  | w0 | w1 | w2 | w3 | w4 | w5 | w6 | w7 | w8 ...
//! oopmap byte 0:            b0   b1   b2   b3   b4   b5   b6   b7
//! oopmap byte 1:                                                 b0 ...
//! ```
//!
//! In memory the bits are packed 64 to a word so that scanning can skip
//! empty stretches with `trailing_zeros`. During relocation the map is a
//! to-do list: each bit is cleared once its pointer has been rewritten, and
//! a non-zero [`OopMap::cardinality`] afterwards means some pointer was missed.

use std::fmt;

/// Bitmap of pointer words
#[derive(Clone, PartialEq, Eq, Default)]
pub struct OopMap {
    bits: Vec<u64>,
    len: usize,
}

impl OopMap {
    /// Empty map able to hold `len` bits
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; (len + 63) / 64],
            len,
        }
    }

    /// Decode the on-disk byte form
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut map = Self::new(bytes.len() * 8);
        for (i, byte) in bytes.iter().enumerate() {
            map.bits[i / 8] |= (*byte as u64) << ((i % 8) * 8);
        }
        map
    }

    /// Encode into `byte_len` bytes, the on-disk form
    pub fn to_bytes(&self, byte_len: usize) -> Vec<u8> {
        (0..byte_len)
            .map(|i| {
                self.bits
                    .get(i / 8)
                    .map(|word| (word >> ((i % 8) * 8)) as u8)
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Bytes needed on disk for a memory component of `size` bytes
    pub fn size_in_bytes(size: usize) -> usize {
        (size + 7) / 8
    }

    /// Number of bits the map can hold
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, index: usize) {
        if index >= self.len {
            self.grow(index + 1);
        }
        self.bits[index / 64] |= 1 << (index % 64);
    }

    pub fn clear(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index / 64) {
            *word &= !(1 << (index % 64));
        }
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .map(|word| word & (1 << (index % 64)) != 0)
            .unwrap_or(false)
    }

    /// Count of set bits
    pub fn cardinality(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Index of the first set bit at or after `from`
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        let mut word_index = from / 64;
        if word_index >= self.bits.len() {
            return None;
        }

        let mut word = self.bits[word_index] & (!0u64 << (from % 64));
        loop {
            if word != 0 {
                return Some(word_index * 64 + word.trailing_zeros() as usize);
            }
            word_index += 1;
            word = *self.bits.get(word_index)?;
        }
    }

    /// Set bits in ascending order
    pub fn iter(&self) -> SetBits<'_> {
        SetBits { map: self, next: 0 }
    }

    fn grow(&mut self, len: usize) {
        self.bits.resize((len + 63) / 64, 0);
        self.len = len;
    }
}

impl fmt::Debug for OopMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OopMap")
            .field("len", &self.len)
            .field("cardinality", &self.cardinality())
            .finish()
    }
}

/// Ascending iterator over the set bits of an [`OopMap`]
pub struct SetBits<'a> {
    map: &'a OopMap,
    next: usize,
}

impl Iterator for SetBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let index = self.map.next_set_bit(self.next)?;
        self.next = index + 1;
        Some(index)
    }
}
