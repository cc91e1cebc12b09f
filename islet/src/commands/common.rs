//! Common types and utilities for islet commands.
//!
//! Reading an image without relocating it: the header, the root and size
//! words, the oop map and the memory component. Enough to inspect, hash
//! or sign a file whose parents are not at hand.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Serialize;

use isle_mem::format::{calculate_memory_padding, content_hash};
use isle_mem::reader::ObjectMemoryReader;
use isle_mem::{Header, OopMap};

use crate::error::{IsletError, Result};

/// An image read as stored, without relocation
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub path: String,
    pub header: Header,
    pub bytes_per_word: usize,
    pub big_endian: bool,
    pub root: u32,
    pub size: u32,
    pub pointers: usize,
    pub padding: usize,
    pub hash: i32,
    pub has_typemap: bool,
}

/// Read the header only
pub fn read_header(path: &Path) -> Result<Header> {
    let mut reader = open(path)?;
    Ok(reader.read_header()?)
}

/// Read the header and the memory component of `path`
pub fn read_image(path: &Path) -> Result<ImageSummary> {
    let mut reader = open(path)?;
    let header = reader.read_header()?;
    let root = reader.read_u32("root")?;
    let size = reader.read_u32("size")?;
    if root > size {
        return Err(reader
            .format_error("root", format!("offset {} beyond memory of {} bytes", root, size))
            .into());
    }

    let oop_map = OopMap::from_bytes(&reader.read_bytes(OopMap::size_in_bytes(size as usize), "oopmap")?);
    let bytes_per_word = header.attributes.bytes_per_word();
    let padding = calculate_memory_padding(&header.parent_uri, size as usize, bytes_per_word);
    reader.skip(padding, "padding")?;
    let memory = reader.read_bytes(size as usize, "memory")?;

    Ok(ImageSummary {
        path: path.display().to_string(),
        bytes_per_word,
        big_endian: header.attributes.byte_order() == isle_mem::ByteOrder::Big,
        root,
        size,
        pointers: oop_map.cardinality(),
        padding,
        hash: content_hash(&memory),
        has_typemap: header.attributes.has_typemap(),
        header,
    })
}

fn open(path: &Path) -> Result<ObjectMemoryReader<BufReader<File>>> {
    let file = File::open(path).map_err(|e| {
        IsletError::Validation(format!("cannot open {}: {}", path.display(), e))
    })?;
    Ok(ObjectMemoryReader::new(BufReader::new(file), path.display().to_string()))
}

/// Turn a command-line argument into a loader URI
///
/// Arguments with a scheme pass through; anything else is a file path.
pub fn to_uri(arg: &str) -> String {
    if arg.contains("://") || arg.starts_with("memory:") {
        arg.to_string()
    } else {
        format!("file://{}", arg)
    }
}

/// Directory a `file://` URI lives in, for resolving sibling parents
pub fn file_dir(uri: &str) -> Option<PathBuf> {
    let path = Path::new(uri.strip_prefix("file://")?);
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
