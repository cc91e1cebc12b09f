//! Object-memory file format
//!
//! ```text
//! u4   magic            0xDEADBEEF
//! u2   minor_version
//! u2   major_version
//! u4   attributes       bit0 has-typemap, bit1 is-32-bit, bit2 is-big-endian
//! u4   parent_hash
//! utf8 parent_uri       u2 length + modified UTF-8
//! u4   root             offset of the root object from memory start
//! u4   size             bytes in the memory component
//! u1   oopmap[ceil(size/8)]
//!      padding          so that memory starts word aligned
//! u1   memory[size]
//! u1   typemap[size]    only with has-typemap
//! ```
//!
//! Header integers are big-endian. The is-big-endian attribute describes
//! the words inside the memory component.

use serde::{Deserialize, Serialize};

use crate::oopmap::OopMap;

pub const MAGIC: u32 = 0xDEAD_BEEF;
pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 2;

pub const ATTRIBUTE_TYPEMAP: u32 = 0x01;
pub const ATTRIBUTE_32BIT: u32 = 0x02;
pub const ATTRIBUTE_BIGENDIAN: u32 = 0x04;

/// Byte order of words in a memory component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Decoded attribute word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attributes(u32);

impl Attributes {
    pub fn from_bits(bits: u32) -> Self {
        Attributes(bits)
    }

    pub fn new(has_typemap: bool, bytes_per_word: usize, order: ByteOrder) -> Self {
        let mut bits = 0;
        if has_typemap {
            bits |= ATTRIBUTE_TYPEMAP;
        }
        if bytes_per_word == 4 {
            bits |= ATTRIBUTE_32BIT;
        }
        if order == ByteOrder::Big {
            bits |= ATTRIBUTE_BIGENDIAN;
        }
        Attributes(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn has_typemap(self) -> bool {
        self.0 & ATTRIBUTE_TYPEMAP != 0
    }

    pub fn is_32bit(self) -> bool {
        self.0 & ATTRIBUTE_32BIT != 0
    }

    pub fn bytes_per_word(self) -> usize {
        if self.is_32bit() {
            4
        } else {
            8
        }
    }

    pub fn byte_order(self) -> ByteOrder {
        if self.0 & ATTRIBUTE_BIGENDIAN != 0 {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Encoded length of `s` including its 2-byte length prefix
pub fn utf8_length(s: &str) -> usize {
    2 + s
        .encode_utf16()
        .map(|unit| match unit {
            0x0001..=0x007f => 1,
            0x0000 | 0x0080..=0x07ff => 2,
            _ => 3,
        })
        .sum::<usize>()
}

/// Encode `s` as modified UTF-8 without the length prefix
pub fn encode_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            },
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            },
        }
    }
    out
}

/// Decode modified UTF-8, returning `None` on malformed input
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        match b0 >> 4 {
            0x0..=0x7 => {
                units.push(b0);
                i += 1;
            },
            0xc | 0xd => {
                let b1 = *bytes.get(i + 1)? as u16;
                if b1 & 0xc0 != 0x80 {
                    return None;
                }
                units.push(((b0 & 0x1f) << 6) | (b1 & 0x3f));
                i += 2;
            },
            0xe => {
                let b1 = *bytes.get(i + 1)? as u16;
                let b2 = *bytes.get(i + 2)? as u16;
                if b1 & 0xc0 != 0x80 || b2 & 0xc0 != 0x80 {
                    return None;
                }
                units.push(((b0 & 0x0f) << 12) | ((b1 & 0x3f) << 6) | (b2 & 0x3f));
                i += 3;
            },
            _ => return None,
        }
    }
    String::from_utf16(&units).ok()
}

/// Bytes of header fields preceding the padding, oop map included
pub fn header_length(parent_uri: &str, size: usize) -> usize {
    4 + 2 + 2 + 4 + 4 + utf8_length(parent_uri) + 4 + 4 + OopMap::size_in_bytes(size)
}

/// Padding between the oop map and the memory component
///
/// Depends only on the parent URI and memory size, so a writer and a
/// reader agree on it without it being stored.
pub fn calculate_memory_padding(parent_uri: &str, size: usize, bytes_per_word: usize) -> usize {
    let pad = header_length(parent_uri, size) % bytes_per_word;
    if pad == 0 {
        0
    } else {
        bytes_per_word - pad
    }
}

/// Content hash of a canonical memory component
///
/// `len + sum of signed bytes`, wrapping at 32 bits.
pub fn content_hash(memory: &[u8]) -> i32 {
    memory
        .iter()
        .fold(memory.len() as i32, |hash, byte| hash.wrapping_add(*byte as i8 as i32))
}

/// Header fields of an object-memory file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub minor_version: u16,
    pub major_version: u16,
    #[serde(serialize_with = "serialize_attributes")]
    pub attributes: Attributes,
    pub parent_hash: i32,
    pub parent_uri: String,
}

fn serialize_attributes<S: serde::Serializer>(attributes: &Attributes, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u32(attributes.bits())
}

impl Header {
    pub fn has_parent(&self) -> bool {
        !self.parent_uri.is_empty()
    }
}
