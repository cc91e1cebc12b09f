//! # isle-mem - Object-Memory Files for the Isle VM
//!
//! An object memory is a serialized, relocatable graph of objects built
//! against *canonical* addresses. Images form a chain: an application image
//! sits on a library image which sits on the bootstrap image, and each one
//! records the content hash of the parent it was built against.
//!
//! ## Overview
//!
//! - **File format**: big-endian header, parent URI, oop map, padding, memory, optional type map
//! - **Relocation**: pointer words are rewritten from canonical to final addresses, parents first
//! - **GC hazard detection**: relocation on a movable buffer is checked against collections
//! - **Read-only memory**: loaded parents live in a registry keyed by URI
//! - **Hosted mode**: the build-time host keeps canonical addresses and interns them
//!
//! ## Quick Start
//!
//! ```rust
//! use isle_mem::{ByteOrder, ImageBuilder, LoaderConfig, ObjectMemoryLoader};
//!
//! let config = LoaderConfig {
//!     byte_order: ByteOrder::Little,
//!     ..LoaderConfig::default()
//! };
//! let loader = ObjectMemoryLoader::new(config.clone())?;
//!
//! // 64 bytes whose first word points at offset 8
//! let mut image = ImageBuilder::new(64, config.bytes_per_word, ByteOrder::Little).root(8);
//! image.pointer(0, 8)?;
//!
//! let bytes = image.to_bytes()?;
//! let file = loader.load(std::io::Cursor::new(bytes), "memory:bootstrap", false)?;
//! let memory = file.memory()?;
//! assert_eq!(memory.read_word(0), Some(memory.root().to_u64()));
//! # Ok::<(), isle_mem::MemError>(())
//! ```
//!
//! ## Load Pipeline
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────┐
//! │ UriResolver  │──▶│ ObjectMemory-  │──▶│ Relocator    │
//! │ file:// etc. │   │ Reader         │   │ parents/self │
//! └──────────────┘   └────────────────┘   └──────┬───────┘
//!                                                │ safepoints
//!                                         ┌──────▼───────┐
//!                                         │ MemorySpace  │
//!                                         │ RAM / ROM    │
//!                                         └──────┬───────┘
//!                                                │
//!                                         ┌──────▼───────┐
//!                                         │ ReadOnly-    │
//!                                         │ Registry     │
//!                                         └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`address`]: word-sized address arithmetic and the hosted address pool
//! - [`config`]: loader configuration and validation
//! - [`error`]: error types for all load operations
//! - [`format`]: on-disk constants, attributes, padding and hashing
//! - [`heap`]: the memory space the loader allocates from
//! - [`loader`]: the load state machine
//! - [`logging`]: structured load events
//! - [`relocate`]: pointer relocation and byte swapping
//! - [`writer`]: building images, used by tools and tests

pub mod address;
pub mod config;
pub mod error;
pub mod format;
pub mod heap;
pub mod loader;
pub mod logging;
pub mod object_memory;
pub mod oopmap;
pub mod reader;
pub mod registry;
pub mod relocate;
pub mod resolver;
pub mod typemap;
pub mod writer;

pub use address::{Address, AddressPool, Offset, UWord, BYTES_PER_WORD};
pub use config::{ConfigError, LoaderConfig};
pub use error::{ErrorCategory, MemError, Result};
pub use format::{Attributes, ByteOrder, Header};
pub use heap::{MemorySpace, SimulatedHeap};
pub use loader::{LoadState, ObjectMemoryFile, ObjectMemoryLoader};
pub use object_memory::ObjectMemory;
pub use oopmap::OopMap;
pub use registry::ReadOnlyRegistry;
pub use resolver::{UriResolver, BOOTSTRAP_URI, LIBRARY_URI};
pub use typemap::{AddressType, TypeMap};
pub use writer::ImageBuilder;

/// isle-mem version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(LoaderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
