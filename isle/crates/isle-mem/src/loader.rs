//! Object-Memory Loader
//!
//! Drives a load through its states:
//!
//! ```text
//! HeaderOnly -> ParentResolved -> MemoryLoaded -> Relocated -> Finalized
//! ```
//!
//! - HeaderOnly: magic, versions, attributes, parent hash and URI
//! - ParentResolved: parent found in the read-only registry or loaded, hash checked
//! - MemoryLoaded: oop map, memory and type map read, canonical hash computed
//! - Relocated: pointers rewritten for the final address
//! - Finalized: `ObjectMemory` built and registered
//!
//! On the target the memory component is relocated inside a movable RAM
//! buffer. A collection is forced just before the buffer address is taken,
//! and if the buffer has moved by the end of relocation the load fails with
//! [`MemError::GcDuringRelocation`]. Nothing from a failed load is kept:
//! the RAM buffer is freed and any read-only target handed back. A RAM
//! load keeps its buffer pinned until the memory is dropped.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Instant;

use crate::address::{Address, AddressPool};
use crate::config::LoaderConfig;
use crate::error::{MemError, Result};
use crate::format::{calculate_memory_padding, content_hash, ByteOrder, Header};
use crate::heap::{BufferId, MemorySpace, PinnedBuffer, SimulatedHeap};
use crate::logging::{log_event, LoadEvent};
use crate::object_memory::{read_word, ObjectMemory, ObjectMemoryParts};
use crate::oopmap::OopMap;
use crate::reader::ObjectMemoryReader;
use crate::registry::ReadOnlyRegistry;
use crate::relocate::{RelocationStats, Relocator, WordLayout};
use crate::resolver::{UriResolver, BOOTSTRAP_URI, LIBRARY_URI};
use crate::typemap::TypeMap;

/// Progress of a single load
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadState {
    HeaderOnly,
    ParentResolved,
    MemoryLoaded,
    Relocated,
    Finalized,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadState::HeaderOnly => "header only",
            LoadState::ParentResolved => "parent resolved",
            LoadState::MemoryLoaded => "memory loaded",
            LoadState::Relocated => "relocated",
            LoadState::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Result of a load: the header, plus the memory unless only the header was read
#[derive(Debug, Clone)]
pub struct ObjectMemoryFile {
    pub uri: String,
    pub header: Header,
    pub object_memory: Option<Arc<ObjectMemory>>,
}

impl ObjectMemoryFile {
    pub fn minor_version(&self) -> u16 {
        self.header.minor_version
    }

    pub fn major_version(&self) -> u16 {
        self.header.major_version
    }

    pub fn parent_uri(&self) -> &str {
        &self.header.parent_uri
    }

    pub fn parent_hash(&self) -> i32 {
        self.header.parent_hash
    }

    /// The loaded memory, or an error for a header-only result
    pub fn memory(&self) -> Result<&Arc<ObjectMemory>> {
        self.object_memory
            .as_ref()
            .ok_or_else(|| MemError::InvalidArgument(format!("{}: only the header was loaded", self.uri)))
    }
}

/// Loads object memories and their parents
pub struct ObjectMemoryLoader {
    config: LoaderConfig,
    space: Arc<dyn MemorySpace>,
    registry: Arc<ReadOnlyRegistry>,
    resolver: UriResolver,
    pool: AddressPool,
}

impl ObjectMemoryLoader {
    /// Loader over a [`SimulatedHeap`] built from `config`
    pub fn new(config: LoaderConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| MemError::Configuration(e.to_string()))?;
        let heap = Arc::new(SimulatedHeap::new(&config)?);
        Self::with_space(config, heap)
    }

    /// Loader over a caller-supplied memory space
    pub fn with_space(config: LoaderConfig, space: Arc<dyn MemorySpace>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| MemError::Configuration(e.to_string()))?;
        Ok(Self {
            resolver: UriResolver::new(&config)?,
            pool: AddressPool::new(config.pool_capacity),
            registry: Arc::new(ReadOnlyRegistry::new()),
            space,
            config,
        })
    }

    /// Share a registry with other loaders
    pub fn with_registry(mut self, registry: Arc<ReadOnlyRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ReadOnlyRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &UriResolver {
        &self.resolver
    }

    pub fn memory_space(&self) -> &Arc<dyn MemorySpace> {
        &self.space
    }

    /// Canonical addresses seen by hosted loads
    pub fn address_pool(&self) -> &AddressPool {
        &self.pool
    }

    /// Read only the header of the image in `input`
    pub fn load_header<R: Read>(&self, input: R, uri: &str) -> Result<ObjectMemoryFile> {
        let mut reader = ObjectMemoryReader::new(input, uri);
        let header = self.read_header(&mut reader)?;
        Ok(ObjectMemoryFile {
            uri: uri.to_string(),
            header,
            object_memory: None,
        })
    }

    /// Load the image in `input`, identified by `uri`
    ///
    /// If a memory with the same URI and parent is already in read-only
    /// memory, that memory is returned.
    pub fn load<R: Read>(&self, input: R, uri: &str, into_read_only: bool) -> Result<ObjectMemoryFile> {
        let mut chain = Vec::new();
        self.load_stream(input, uri, into_read_only, &mut chain)
    }

    /// Resolve `uri` and load it
    ///
    /// A load aborted by a collection is retried from scratch up to
    /// `gc_retry_limit` times.
    pub fn load_uri(&self, uri: &str, into_read_only: bool) -> Result<ObjectMemoryFile> {
        let mut chain = Vec::new();
        self.load_uri_in(uri, into_read_only, &mut chain)
    }

    fn load_uri_in(&self, uri: &str, into_read_only: bool, chain: &mut Vec<String>) -> Result<ObjectMemoryFile> {
        let mut attempt = 0;
        loop {
            let bytes = self.resolver.open(uri)?;
            match self.load_stream(Cursor::new(&bytes[..]), uri, into_read_only, chain) {
                Err(MemError::GcDuringRelocation { .. }) if attempt < self.config.gc_retry_limit => {
                    attempt += 1;
                    log_event(LoadEvent::GcHazard {
                        uri: uri.to_string(),
                        attempt,
                    });
                },
                result => return result,
            }
        }
    }

    fn load_stream<R: Read>(
        &self,
        input: R,
        uri: &str,
        into_read_only: bool,
        chain: &mut Vec<String>,
    ) -> Result<ObjectMemoryFile> {
        let started = Instant::now();
        log_event(LoadEvent::LoadStart {
            uri: uri.to_string(),
            read_only: into_read_only,
        });

        if chain.iter().any(|u| u == uri) {
            return Err(MemError::format(uri, "parent_uri", format!("cyclic parent chain {:?}", chain)));
        }
        chain.push(uri.to_string());
        let mut reader = ObjectMemoryReader::new(input, uri);
        let result = self.load_file(&mut reader, into_read_only, chain);
        chain.pop();

        match &result {
            Ok(file) => {
                if let Some(memory) = &file.object_memory {
                    log_event(LoadEvent::LoadEnd {
                        uri: uri.to_string(),
                        start: memory.start().to_u64(),
                        size: memory.size(),
                        hash: memory.hash(),
                        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                    });
                }
            },
            Err(e) => log_event(LoadEvent::LoadFailed {
                uri: uri.to_string(),
                error: e.to_string(),
            }),
        }
        result
    }

    fn read_header<R: Read>(&self, reader: &mut ObjectMemoryReader<R>) -> Result<Header> {
        let header = reader.read_header()?;
        let uri = reader.path().to_string();
        self.transition(&uri, LoadState::HeaderOnly);

        let found = header.attributes.bytes_per_word();
        if found != self.config.bytes_per_word {
            return Err(MemError::WordSize {
                path: uri,
                expected: self.config.bytes_per_word,
                found,
            });
        }

        log_event(LoadEvent::HeaderRead {
            uri: uri.clone(),
            major: header.major_version,
            minor: header.minor_version,
            attributes: header.attributes.bits(),
            parent_uri: header.parent_uri.clone(),
            parent_hash: header.parent_hash,
        });
        if self.config.verbose {
            log::info!(
                "{}: minor {}, major {}, attributes {:#x}, parent hash {:#x}, parent URI {:?}",
                uri,
                header.minor_version,
                header.major_version,
                header.attributes.bits(),
                header.parent_hash,
                header.parent_uri
            );
        }
        Ok(header)
    }

    fn load_file<R: Read>(
        &self,
        reader: &mut ObjectMemoryReader<R>,
        into_read_only: bool,
        chain: &mut Vec<String>,
    ) -> Result<ObjectMemoryFile> {
        let uri = reader.path().to_string();
        let header = self.read_header(reader)?;

        if into_read_only {
            if let Some(existing) = self.registry.lookup(&uri) {
                let same_parent = match existing.parent() {
                    Some(parent) => parent.uri() == header.parent_uri && parent.hash() == header.parent_hash,
                    None => !header.has_parent(),
                };
                if same_parent {
                    log::debug!("{}: already in read-only memory at {}", uri, existing.start());
                    return Ok(ObjectMemoryFile {
                        uri,
                        header,
                        object_memory: Some(existing),
                    });
                }
            }
        }

        let parent = if header.has_parent() {
            Some(self.load_parent(&uri, header.parent_hash, &header.parent_uri, into_read_only, chain)?)
        } else {
            None
        };
        self.transition(&uri, LoadState::ParentResolved);

        let memory = self.load_this(reader, &header, parent, into_read_only)?;
        Ok(ObjectMemoryFile {
            uri,
            header,
            object_memory: Some(memory),
        })
    }

    fn load_parent(
        &self,
        uri: &str,
        expected_hash: i32,
        parent_uri: &str,
        into_read_only: bool,
        chain: &mut Vec<String>,
    ) -> Result<Arc<ObjectMemory>> {
        let (parent, cached) = match self.registry.lookup(parent_uri) {
            Some(parent) => (parent, true),
            None => {
                let file = self.load_uri_in(parent_uri, into_read_only, chain)?;
                (file.memory()?.clone(), false)
            },
        };
        log_event(LoadEvent::ParentResolved {
            uri: uri.to_string(),
            parent_uri: parent_uri.to_string(),
            cached,
        });

        if parent.hash() != expected_hash {
            return Err(MemError::ParentHashMismatch {
                uri: parent_uri.to_string(),
                expected: expected_hash,
                actual: parent.hash(),
                hint: hash_mismatch_hint(parent_uri, expected_hash, parent.hash()),
            });
        }
        Ok(parent)
    }

    fn load_this<R: Read>(
        &self,
        reader: &mut ObjectMemoryReader<R>,
        header: &Header,
        parent: Option<Arc<ObjectMemory>>,
        into_read_only: bool,
    ) -> Result<Arc<ObjectMemory>> {
        let uri = reader.path().to_string();
        let root = reader.read_u32("root")? as usize;
        let size = reader.read_u32("size")? as usize;
        if root > size {
            return Err(reader.format_error("root", format!("offset {} beyond memory of {} bytes", root, size)));
        }

        let oop_map = OopMap::from_bytes(&reader.read_bytes(OopMap::size_in_bytes(size), "oopmap")?);
        let padding = calculate_memory_padding(&header.parent_uri, size, self.config.bytes_per_word);
        reader.skip(padding, "padding")?;
        let mut buffer = reader.read_bytes(size, "memory")?;

        let typemap = if header.attributes.has_typemap() && self.config.typemap {
            let tags = reader.read_bytes(size, "typemap")?;
            log::debug!("{}: typemap {{size = {}}}", uri, size);
            Some(TypeMap::from_bytes(tags))
        } else {
            None
        };

        let hash = content_hash(&buffer);
        self.transition(&uri, LoadState::MemoryLoaded);
        if self.config.verbose {
            log::info!(
                "{}: read {} bytes, root offset {}, memory size {}, hash {:#x}",
                uri,
                reader.bytes_read(),
                root,
                size,
                hash
            );
        }

        let canonical_start = ObjectMemory::canonical_start_after(
            parent.as_deref(),
            Address::from_u64(self.config.canonical_base)
                .ok_or_else(|| MemError::Configuration("canonical_base out of range".to_string()))?,
        );
        let layout = WordLayout::new(self.config.bytes_per_word, header.attributes.byte_order());

        let (start, stats, pinned) = if self.config.hosted {
            let (start, stats) =
                self.relocate_hosted(&uri, &mut buffer, oop_map, layout, canonical_start, parent.as_deref())?;
            (start, stats, None)
        } else {
            self.relocate_on_target(&uri, &mut buffer, oop_map, layout, canonical_start, parent.as_deref(), into_read_only)?
        };
        self.transition(&uri, LoadState::Relocated);
        log_event(LoadEvent::Relocated {
            uri: uri.clone(),
            target: start.to_u64(),
            size,
            pointers: stats.pointers,
            parent_pointers: stats.parent_pointers,
            null_pointers: stats.null_pointers,
            swapped_words: stats.swapped_words,
        });

        let mut memory = ObjectMemory::new(ObjectMemoryParts {
            uri: uri.clone(),
            start,
            root_offset: root,
            hash,
            canonical_start,
            contents: buffer,
            bytes_per_word: self.config.bytes_per_word,
            byte_order: self.final_order(layout.order),
            read_only: into_read_only && !self.config.hosted,
            typemap,
            parent,
        });
        if let Some(pinned) = pinned {
            memory = memory.with_pinned(pinned);
        }
        let memory = Arc::new(memory);

        if into_read_only {
            self.registry.register(&memory);
        }
        self.transition(&uri, LoadState::Finalized);
        Ok(memory)
    }

    fn final_order(&self, image_order: ByteOrder) -> ByteOrder {
        if self.config.hosted {
            image_order
        } else {
            self.config.byte_order
        }
    }

    /// Relocate to canonical addresses and intern every pointer
    fn relocate_hosted(
        &self,
        uri: &str,
        buffer: &mut [u8],
        mut oop_map: OopMap,
        layout: WordLayout,
        canonical_start: Address,
        parent: Option<&ObjectMemory>,
    ) -> Result<(Address, RelocationStats)> {
        let pointers = oop_map.clone();
        let mut relocator = Relocator::new(uri, layout).with_trace(self.config.trace);
        relocator.relocate_parents(buffer, &mut oop_map, parent)?;
        relocator.relocate(buffer, &mut oop_map, canonical_start, canonical_start)?;
        relocator.verify_complete(&oop_map)?;

        for index in pointers.iter() {
            let offset = index * layout.bytes_per_word;
            if let Some(value) = read_word(buffer, offset, layout.bytes_per_word, layout.order) {
                if let Some(address) = Address::from_u64(value) {
                    self.pool.intern(address)?;
                }
            }
        }
        Ok((canonical_start, relocator.stats()))
    }

    /// Relocate inside a movable RAM buffer, checking the collector left it alone
    #[allow(clippy::too_many_arguments)]
    fn relocate_on_target(
        &self,
        uri: &str,
        buffer: &mut [u8],
        mut oop_map: OopMap,
        layout: WordLayout,
        canonical_start: Address,
        parent: Option<&ObjectMemory>,
        into_read_only: bool,
    ) -> Result<(Address, RelocationStats, Option<PinnedBuffer>)> {
        let space = self.space.as_ref();
        let size = buffer.len();
        let ram = space.allocate(size)?;
        let mut reserved = None;

        let outcome = (|| -> Result<(Address, RelocationStats)> {
            space.collect_garbage();
            let buffer_address = space.address_of(ram)?;
            let target = if into_read_only {
                let at = space.allocate_read_only(size)?;
                reserved = Some(at);
                at
            } else {
                buffer_address
            };

            let mut relocator = Relocator::new(uri, layout)
                .with_safepoints(space, self.config.safepoint_interval)
                .with_trace(self.config.trace);
            relocator.relocate_parents(buffer, &mut oop_map, parent)?;
            relocator.relocate(buffer, &mut oop_map, target, canonical_start)?;
            relocator.verify_complete(&oop_map)?;
            relocator.swap_to(buffer, self.config.byte_order);

            if space.address_of(ram)? != buffer_address {
                return Err(MemError::GcDuringRelocation { uri: uri.to_string() });
            }
            Ok((target, relocator.stats()))
        })();

        self.release(ram, reserved.map(|at| (at, size)), outcome)
    }

    fn release(
        &self,
        ram: BufferId,
        reserved: Option<(Address, usize)>,
        outcome: Result<(Address, RelocationStats)>,
    ) -> Result<(Address, RelocationStats, Option<PinnedBuffer>)> {
        match outcome {
            Ok((target, stats)) if reserved.is_none() => {
                let pinned = self.space.pin(ram)?;
                debug_assert_eq!(pinned, target);
                Ok((pinned, stats, Some(PinnedBuffer::new(self.space.clone(), ram))))
            },
            Ok((target, stats)) => {
                self.space.free(ram);
                Ok((target, stats, None))
            },
            Err(e) => {
                self.space.free(ram);
                if let Some((at, size)) = reserved {
                    self.space.free_read_only(at, size);
                }
                Err(e)
            },
        }
    }

    fn transition(&self, uri: &str, state: LoadState) {
        log_event(LoadEvent::StateChange {
            uri: uri.to_string(),
            state,
        });
    }
}

/// Message for a parent whose hash differs from the one recorded at build time
pub fn hash_mismatch_hint(parent_uri: &str, expected: i32, actual: i32) -> String {
    let mut hint = String::new();
    if parent_uri == LIBRARY_URI {
        hint.push_str(
            "The application you are trying to run was not built against the library that is installed\n\
             Either rebuild your application and re-deploy, or install the correct library\n",
        );
    } else if parent_uri == BOOTSTRAP_URI {
        hint.push_str("The installed library was not built against the installed version of the VM\n");
    }
    hint.push_str(&format!(
        "invalid hash for parent ({}): expected {}, received {}",
        parent_uri, expected, actual
    ));
    hint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ImageBuilder;

    fn config() -> LoaderConfig {
        LoaderConfig {
            bytes_per_word: 8,
            byte_order: ByteOrder::Little,
            ..Default::default()
        }
    }

    #[test]
    fn test_header_only() {
        let loader = ObjectMemoryLoader::new(config()).unwrap();
        let bytes = ImageBuilder::new(16, 8, ByteOrder::Little)
            .parent("memory:bootstrap", 9)
            .to_bytes()
            .unwrap();
        let file = loader.load_header(Cursor::new(bytes), "file://a.image").unwrap();
        assert_eq!(file.parent_uri(), "memory:bootstrap");
        assert_eq!(file.parent_hash(), 9);
        assert!(file.object_memory.is_none());
        assert!(file.memory().is_err());
    }

    #[test]
    fn test_word_size_mismatch() {
        let loader = ObjectMemoryLoader::new(config()).unwrap();
        let bytes = ImageBuilder::new(16, 4, ByteOrder::Little).to_bytes().unwrap();
        let err = loader.load(Cursor::new(bytes), "file://w.image", false).unwrap_err();
        assert!(matches!(err, MemError::WordSize { expected: 8, found: 4, .. }));
    }

    #[test]
    fn test_root_beyond_memory() {
        let loader = ObjectMemoryLoader::new(config()).unwrap();
        let bytes = ImageBuilder::new(16, 8, ByteOrder::Little).root(24).to_bytes().unwrap();
        let err = loader.load(Cursor::new(bytes), "file://r.image", false).unwrap_err();
        assert!(err.to_string().contains("root"));
    }

    #[test]
    fn test_ram_load_pins_buffer() {
        let loader = ObjectMemoryLoader::new(config()).unwrap();
        let mut image = ImageBuilder::new(32, 8, ByteOrder::Little).root(8);
        image.pointer(0, 8).unwrap();
        let bytes = image.to_bytes().unwrap();

        let file = loader.load(Cursor::new(bytes), BOOTSTRAP_URI, false).unwrap();
        let memory = file.memory().unwrap();
        assert!(!memory.is_read_only());
        assert_eq!(memory.root(), memory.start().add_bytes(8));
        assert_eq!(memory.read_word(0), Some(memory.start().to_u64() + 8));
        assert!(loader.registry().is_empty());
    }

    #[test]
    fn test_hint_text() {
        let hint = hash_mismatch_hint(LIBRARY_URI, 1, 2);
        assert!(hint.starts_with("The application you are trying to run"));
        assert!(hint.ends_with("invalid hash for parent (suite://library): expected 1, received 2"));

        let hint = hash_mismatch_hint("file://other", -17, 2048);
        assert_eq!(hint, "invalid hash for parent (file://other): expected -17, received 2048");

        let hint = hash_mismatch_hint(BOOTSTRAP_URI, 1, 2);
        assert!(hint.contains("installed version of the VM"));

    }

    #[test]
    fn test_state_order() {
        assert!(LoadState::HeaderOnly < LoadState::Finalized);
        assert_eq!(LoadState::MemoryLoaded.to_string(), "memory loaded");
    }
}
