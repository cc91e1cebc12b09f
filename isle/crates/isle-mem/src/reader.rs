//! Object-Memory Reader
//!
//! Sequential reader over an object-memory stream. Every read names the
//! field being read so that failures can be reported as
//! `<path>: error reading <field>: ...`. A failed read aborts the load;
//! there is no resynchronisation.

use std::io::{ErrorKind, Read};

use crate::error::{MemError, Result};
use crate::format::{decode_modified_utf8, Attributes, Header, MAGIC};

/// Largest buffer reserved before any bytes have arrived
const PREALLOCATE_LIMIT: usize = 64 * 1024;

/// Field-aware reader over a byte stream
pub struct ObjectMemoryReader<R> {
    input: R,
    path: String,
    bytes_read: usize,
}

impl<R: Read> ObjectMemoryReader<R> {
    pub fn new(input: R, path: impl Into<String>) -> Self {
        Self {
            input,
            path: path.into(),
            bytes_read: 0,
        }
    }

    /// Source path or URI used in error messages
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Total bytes consumed so far
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Build a format error for `field` at this reader's path
    pub fn format_error(&self, field: &str, reason: impl Into<String>) -> MemError {
        MemError::format(self.path.clone(), field, reason)
    }

    /// Fill `buf` completely
    pub fn read_fully(&mut self, buf: &mut [u8], field: &str) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.bytes_read += filled;
                    return Err(MemError::Truncated {
                        path: self.path.clone(),
                        field: field.to_string(),
                        wanted: buf.len(),
                        got: filled,
                    });
                },
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => {
                    return Err(self.format_error(field, e.to_string()));
                },
            }
        }
        self.bytes_read += filled;
        Ok(())
    }

    /// Read `len` bytes into a fresh buffer
    ///
    /// The buffer grows with the data actually read, so a size taken from
    /// a corrupt header cannot force a huge allocation up front.
    pub fn read_bytes(&mut self, len: usize, field: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(PREALLOCATE_LIMIT));
        let read = (&mut self.input).take(len as u64).read_to_end(&mut buf);
        let got = read.map_err(|e| self.format_error(field, e.to_string()))?;
        self.bytes_read += got;
        if got < len {
            return Err(MemError::Truncated {
                path: self.path.clone(),
                field: field.to_string(),
                wanted: len,
                got,
            });
        }
        Ok(buf)
    }

    pub fn read_u8(&mut self, field: &str) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_fully(&mut buf, field)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self, field: &str) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_fully(&mut buf, field)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self, field: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_fully(&mut buf, field)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_i32(&mut self, field: &str) -> Result<i32> {
        Ok(self.read_u32(field)? as i32)
    }

    /// Read a u2-length-prefixed modified UTF-8 string
    pub fn read_utf(&mut self, field: &str) -> Result<String> {
        let len = self.read_u16(field)? as usize;
        let bytes = self.read_bytes(len, field)?;
        decode_modified_utf8(&bytes).ok_or_else(|| self.format_error(field, "malformed modified UTF-8"))
    }

    /// Discard `n` bytes
    pub fn skip(&mut self, n: usize, field: &str) -> Result<()> {
        let mut remaining = n;
        let mut scratch = [0u8; 256];
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            self.read_fully(&mut scratch[..chunk], field)?;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Read and check the magic number
    pub fn read_magic(&mut self) -> Result<()> {
        let found = self.read_u32("magic")?;
        if found != MAGIC {
            return Err(MemError::BadMagic {
                path: self.path.clone(),
                found,
            });
        }
        Ok(())
    }

    /// Read magic, versions, attributes, parent hash and parent URI
    pub fn read_header(&mut self) -> Result<Header> {
        self.read_magic()?;
        let minor_version = self.read_u16("minor_version")?;
        let major_version = self.read_u16("major_version")?;
        let attributes = Attributes::from_bits(self.read_u32("attributes")?);
        let parent_hash = self.read_i32("parent_hash")?;
        let parent_uri = self.read_utf("parent_uri")?;
        Ok(Header {
            minor_version,
            major_version,
            attributes,
            parent_hash,
            parent_uri,
        })
    }

    pub fn into_inner(self) -> R {
        self.input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header_bytes(magic: u32, uri: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&magic.to_be_bytes());
        out.extend_from_slice(&2u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&0x06u32.to_be_bytes());
        out.extend_from_slice(&(-5i32).to_be_bytes());
        out.extend_from_slice(&(uri.len() as u16).to_be_bytes());
        out.extend_from_slice(uri.as_bytes());
        out
    }

    #[test]
    fn test_read_header() {
        let bytes = header_bytes(MAGIC, "memory:bootstrap");
        let mut reader = ObjectMemoryReader::new(Cursor::new(bytes.clone()), "file://a.image");
        let header = reader.read_header().unwrap();
        assert_eq!(header.minor_version, 2);
        assert_eq!(header.major_version, 1);
        assert!(header.attributes.is_32bit());
        assert_eq!(header.parent_hash, -5);
        assert_eq!(header.parent_uri, "memory:bootstrap");
        assert_eq!(reader.bytes_read(), bytes.len());
    }

    #[test]
    fn test_bad_magic_stops_after_magic() {
        let bytes = header_bytes(0, "");
        let mut reader = ObjectMemoryReader::new(Cursor::new(bytes), "file://bad.image");
        let err = reader.read_header().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("magic"), "{}", msg);
        assert!(msg.contains("file://bad.image"), "{}", msg);
        assert_eq!(reader.bytes_read(), 4);
    }

    #[test]
    fn test_truncated_field_is_named() {
        let mut reader = ObjectMemoryReader::new(Cursor::new(vec![0u8, 1]), "short");
        let err = reader.read_u32("size").unwrap_err();
        match err {
            MemError::Truncated { field, wanted, got, .. } => {
                assert_eq!(field, "size");
                assert_eq!(wanted, 4);
                assert_eq!(got, 2);
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_skip_and_read_bytes() {
        let data: Vec<u8> = (0..=255u8).chain(0..10).collect();
        let mut reader = ObjectMemoryReader::new(Cursor::new(data), "skip");
        reader.skip(256, "padding").unwrap();
        assert_eq!(reader.read_bytes(3, "memory").unwrap(), vec![0, 1, 2]);
        assert_eq!(reader.bytes_read(), 259);
    }

    #[test]
    fn test_oversized_length_is_truncation() {
        let mut reader = ObjectMemoryReader::new(Cursor::new(vec![7u8; 10]), "huge");
        let err = reader.read_bytes(u32::MAX as usize, "memory").unwrap_err();
        match err {
            MemError::Truncated { field, wanted, got, .. } => {
                assert_eq!(field, "memory");
                assert_eq!(wanted, u32::MAX as usize);
                assert_eq!(got, 10);
            },
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(reader.bytes_read(), 10);
    }

    #[test]
    fn test_malformed_utf() {
        let mut data = 1u16.to_be_bytes().to_vec();
        data.push(0xff);
        let mut reader = ObjectMemoryReader::new(Cursor::new(data), "utf");
        let err = reader.read_utf("parent_uri").unwrap_err();
        assert!(err.to_string().contains("parent_uri"));
    }
}
