//! Object-memory writer
//!
//! Serializes a canonical memory component in the file format read by the
//! loader. The hosted build flow, tests and the command-line tool use it to
//! produce images.

use std::io::Write;

use crate::error::{MemError, Result};
use crate::format::{
    calculate_memory_padding, content_hash, encode_modified_utf8, Attributes, ByteOrder, MAGIC,
    MAJOR_VERSION, MINOR_VERSION,
};
use crate::object_memory::write_word;
use crate::oopmap::OopMap;

/// Builder for a canonical object memory image
///
/// # Examples
///
/// ```rust
/// use isle_mem::writer::ImageBuilder;
/// use isle_mem::format::ByteOrder;
///
/// let mut image = ImageBuilder::new(64, 8, ByteOrder::Little);
/// image.pointer(0, 0x08).unwrap();
/// let bytes = image.to_bytes().unwrap();
/// assert_eq!(&bytes[..4], &[0xde, 0xad, 0xbe, 0xef]);
/// ```
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    memory: Vec<u8>,
    oop_map: OopMap,
    typemap: Option<Vec<u8>>,
    bytes_per_word: usize,
    order: ByteOrder,
    root: u32,
    parent_uri: String,
    parent_hash: i32,
    minor_version: u16,
    major_version: u16,
}

impl ImageBuilder {
    /// Zero-filled memory of `size` bytes
    pub fn new(size: usize, bytes_per_word: usize, order: ByteOrder) -> Self {
        Self {
            memory: vec![0; size],
            oop_map: OopMap::new(size / bytes_per_word.max(1)),
            typemap: None,
            bytes_per_word,
            order,
            root: 0,
            parent_uri: String::new(),
            parent_hash: 0,
            minor_version: MINOR_VERSION,
            major_version: MAJOR_VERSION,
        }
    }

    /// Build on top of a parent with the given URI and content hash
    pub fn parent(mut self, uri: impl Into<String>, hash: i32) -> Self {
        self.parent_uri = uri.into();
        self.parent_hash = hash;
        self
    }

    pub fn root(mut self, offset: u32) -> Self {
        self.root = offset;
        self
    }

    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    /// Attach a type map, one tag per memory byte
    pub fn typemap(mut self, tags: Vec<u8>) -> Self {
        self.typemap = Some(tags);
        self
    }

    /// Store a pointer word holding canonical address `value` at `offset`
    pub fn pointer(&mut self, offset: usize, value: u64) -> Result<&mut Self> {
        self.word(offset, value)?;
        self.oop_map.set(offset / self.bytes_per_word);
        Ok(self)
    }

    /// Store a non-pointer word at `offset`
    pub fn word(&mut self, offset: usize, value: u64) -> Result<&mut Self> {
        if offset % self.bytes_per_word != 0 {
            return Err(MemError::InvalidArgument(format!(
                "offset {} is not word aligned",
                offset
            )));
        }
        if !write_word(&mut self.memory, offset, self.bytes_per_word, self.order, value) {
            return Err(MemError::InvalidArgument(format!(
                "word {:#x} at offset {} does not fit",
                value, offset
            )));
        }
        Ok(self)
    }

    /// Copy raw bytes into the memory at `offset`
    pub fn bytes(&mut self, offset: usize, data: &[u8]) -> Result<&mut Self> {
        let slot = offset
            .checked_add(data.len())
            .and_then(|end| self.memory.get_mut(offset..end))
            .ok_or_else(|| MemError::InvalidArgument(format!("{} bytes at offset {} do not fit", data.len(), offset)))?;
        slot.copy_from_slice(data);
        Ok(self)
    }

    /// Content hash the loader will compute for this image
    pub fn hash(&self) -> i32 {
        content_hash(&self.memory)
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn oop_map(&self) -> &OopMap {
        &self.oop_map
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::new(self.typemap.is_some(), self.bytes_per_word, self.order)
    }

    /// Serialize to `out`
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let size = self.memory.len();
        let uri = encode_modified_utf8(&self.parent_uri);
        let uri_len = u16::try_from(uri.len())
            .map_err(|_| MemError::InvalidArgument("parent URI too long".to_string()))?;
        let size_field = u32::try_from(size)
            .map_err(|_| MemError::InvalidArgument("memory larger than 4GB".to_string()))?;
        if let Some(tags) = &self.typemap {
            if tags.len() != size {
                return Err(MemError::InvalidArgument(format!(
                    "typemap has {} tags for {} bytes",
                    tags.len(),
                    size
                )));
            }
        }

        out.write_all(&MAGIC.to_be_bytes())?;
        out.write_all(&self.minor_version.to_be_bytes())?;
        out.write_all(&self.major_version.to_be_bytes())?;
        out.write_all(&self.attributes().bits().to_be_bytes())?;
        out.write_all(&self.parent_hash.to_be_bytes())?;
        out.write_all(&uri_len.to_be_bytes())?;
        out.write_all(&uri)?;
        out.write_all(&self.root.to_be_bytes())?;
        out.write_all(&size_field.to_be_bytes())?;
        out.write_all(&self.oop_map.to_bytes(OopMap::size_in_bytes(size)))?;
        let padding = calculate_memory_padding(&self.parent_uri, size, self.bytes_per_word);
        out.write_all(&vec![0u8; padding])?;
        out.write_all(&self.memory)?;
        if let Some(tags) = &self.typemap {
            out.write_all(tags)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ObjectMemoryReader;
    use std::io::Cursor;

    #[test]
    fn test_layout_is_word_aligned() {
        let mut image = ImageBuilder::new(64, 8, ByteOrder::Little).parent("memory:bootstrap", 42);
        image.pointer(8, 0x1234).unwrap();
        let bytes = image.to_bytes().unwrap();

        let mut reader = ObjectMemoryReader::new(Cursor::new(bytes.clone()), "w");
        let header = reader.read_header().unwrap();
        assert_eq!(header.parent_uri, "memory:bootstrap");
        assert_eq!(header.parent_hash, 42);
        assert_eq!(reader.read_u32("root").unwrap(), 0);
        assert_eq!(reader.read_u32("size").unwrap(), 64);
        let map = OopMap::from_bytes(&reader.read_bytes(8, "oopmap").unwrap());
        assert!(map.get(1));

        let memory_start = bytes.len() - 64;
        assert_eq!(memory_start % 8, 0);
        assert_eq!(&bytes[memory_start + 8..memory_start + 10], &[0x34, 0x12]);
    }

    #[test]
    fn test_unaligned_pointer_rejected() {
        let mut image = ImageBuilder::new(16, 8, ByteOrder::Little);
        assert!(image.pointer(3, 1).is_err());
        assert!(image.pointer(16, 1).is_err());
    }

    #[test]
    fn test_typemap_length_checked() {
        let image = ImageBuilder::new(16, 4, ByteOrder::Big).typemap(vec![0; 8]);
        assert!(image.to_bytes().is_err());
        assert!(image.attributes().has_typemap());
    }
}
