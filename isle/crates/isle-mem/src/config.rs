//! Configuration Module - Loader Parameters
//!
//! Controls word size and byte order of the target, where loaded memories
//! are placed, how URIs are resolved and how much diagnostics are produced.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::address::BYTES_PER_WORD;
use crate::format::ByteOrder;
use crate::resolver::decode_public_key;

/// Configuration for [`ObjectMemoryLoader`](crate::loader::ObjectMemoryLoader)
///
/// # Examples
///
/// ```rust
/// use isle_mem::LoaderConfig;
///
/// let config = LoaderConfig {
///     bytes_per_word: 4,
///     typemap: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Word size of the target in bytes (4 or 8)
    ///
    /// Images whose is-32-bit attribute disagrees are rejected.
    /// Default: word size of this build
    pub bytes_per_word: usize,

    /// Byte order of the target
    ///
    /// Images in the other order are swapped after relocation.
    /// Default: native order
    pub byte_order: ByteOrder,

    /// Run as the hosted build tool
    ///
    /// Memories are "loaded" at their canonical addresses, no collector is
    /// involved and relocated pointers are interned in an address pool.
    /// Default: false
    pub hosted: bool,

    /// Canonical start of an image with no parent
    ///
    /// Default: 0
    pub canonical_base: u64,

    /// Load the type map component when present
    ///
    /// Default: false
    pub typemap: bool,

    /// Public key suite containers are verified against
    ///
    /// Hex of the SEC1-encoded secp256k1 key, compressed or not. Only the
    /// verifying half is ever configured; the signing key stays with
    /// `islet sign`. When absent, verification is skipped with a warning.
    /// Default: None
    pub suite_public_key: Option<String>,

    /// Directories searched for relative `file://` URIs
    ///
    /// Default: empty (current directory only)
    pub file_path: Vec<PathBuf>,

    /// Directory holding `suite://` containers
    ///
    /// Default: current directory
    pub suite_dir: PathBuf,

    /// Location of `memory:bootstrap` in hosted mode when it is not
    /// registered in process
    ///
    /// Default: "file://bootstrap.image"
    pub bootstrap_url: String,

    /// First address of the RAM heap
    ///
    /// Default: 0x1000_0000
    pub ram_base: u64,

    /// Size of each RAM semispace in bytes
    ///
    /// Default: 16MB
    pub ram_size: usize,

    /// First address of read-only memory
    ///
    /// Default: 0x8000_0000
    pub read_only_base: u64,

    /// Size of read-only memory in bytes
    ///
    /// Default: 16MB
    pub read_only_size: usize,

    /// Collect at every safepoint poll
    ///
    /// Makes collections during relocation observable; for testing.
    /// Default: false
    pub gc_stress: bool,

    /// Pointers relocated between safepoint polls
    ///
    /// Default: 256
    pub safepoint_interval: usize,

    /// Further attempts after a load aborted by a collection
    ///
    /// Default: 0
    pub gc_retry_limit: u32,

    /// Maximum distinct addresses in the hosted address pool
    ///
    /// Default: 1M
    pub pool_capacity: usize,

    /// Log header and chain details of every load
    ///
    /// Default: false
    pub verbose: bool,

    /// Log every relocated pointer
    ///
    /// Default: false
    pub trace: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            bytes_per_word: BYTES_PER_WORD,
            byte_order: ByteOrder::native(),
            hosted: false,
            canonical_base: 0,
            typemap: false,
            suite_public_key: None,
            file_path: Vec::new(),
            suite_dir: PathBuf::from("."),
            bootstrap_url: DEFAULT_BOOTSTRAP_URL.to_string(),
            ram_base: 0x1000_0000,
            ram_size: 16 * MB,
            read_only_base: 0x8000_0000,
            read_only_size: 16 * MB,
            gc_stress: false,
            safepoint_interval: 256,
            gc_retry_limit: 0,
            pool_capacity: 1 << 20,
            verbose: false,
            trace: false,
        }
    }
}

impl LoaderConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bytes_per_word != 4 && self.bytes_per_word != 8 {
            return Err(ConfigError::InvalidWordSize(self.bytes_per_word));
        }

        if self.bytes_per_word > BYTES_PER_WORD {
            return Err(ConfigError::InvalidWordSize(self.bytes_per_word));
        }

        let limit = if self.bytes_per_word == 4 {
            u32::MAX as u64
        } else {
            u64::MAX
        };

        let ram_end = self.ram_base.checked_add(2 * self.ram_size as u64);
        if ram_end.map_or(true, |end| end > limit) {
            return Err(ConfigError::InvalidRegion(
                "RAM heap does not fit in the address space".to_string(),
            ));
        }

        let rom_end = self.read_only_base.checked_add(self.read_only_size as u64);
        if rom_end.map_or(true, |end| end > limit) {
            return Err(ConfigError::InvalidRegion(
                "read-only memory does not fit in the address space".to_string(),
            ));
        }

        let ram_end = ram_end.unwrap_or(u64::MAX);
        let rom_end = rom_end.unwrap_or(u64::MAX);
        if self.ram_base < rom_end && self.read_only_base < ram_end {
            return Err(ConfigError::InvalidRegion(
                "RAM heap overlaps read-only memory".to_string(),
            ));
        }

        if self.canonical_base % self.bytes_per_word as u64 != 0 {
            return Err(ConfigError::InvalidRegion(
                "canonical_base must be word aligned".to_string(),
            ));
        }

        if self.safepoint_interval == 0 {
            return Err(ConfigError::InvalidValue(
                "safepoint_interval must be > 0".to_string(),
            ));
        }

        if self.pool_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "pool_capacity must be > 0".to_string(),
            ));
        }

        if let Some(key) = &self.suite_public_key {
            decode_public_key(key).map_err(|e| ConfigError::InvalidValue(format!("suite_public_key: {}", e)))?;
        }

        if !self.bootstrap_url.contains(':') {
            return Err(ConfigError::InvalidValue(format!(
                "bootstrap_url '{}' is not a URI",
                self.bootstrap_url
            )));
        }

        Ok(())
    }

    /// Add directories from a platform path list (`a:b` or `a;b`)
    pub fn add_file_path(&mut self, path: &str) {
        self.file_path.extend(std::env::split_paths(path));
    }

    /// Replace the search path
    pub fn set_file_path(&mut self, path: &str) {
        self.file_path.clear();
        self.add_file_path(path);
    }

    /// Create config from environment variables
    ///
    /// Environment variables:
    /// - ISLE_WORD_SIZE
    /// - ISLE_BIG_ENDIAN
    /// - ISLE_HOSTED
    /// - ISLE_TYPEMAP
    /// - ISLE_FILE_PATH
    /// - ISLE_SUITE_DIR
    /// - ISLE_SUITE_PUBLIC_KEY
    /// - ISLE_BOOTSTRAP_URL
    /// - ISLE_RAM_SIZE
    /// - ISLE_READ_ONLY_SIZE
    /// - ISLE_GC_STRESS
    /// - ISLE_GC_RETRIES
    /// - ISLE_VERBOSE
    /// - ISLE_TRACE
    ///
    /// # Examples
    ///
    /// ```bash
    /// export ISLE_WORD_SIZE=4
    /// export ISLE_FILE_PATH=/opt/isle/lib:/opt/isle/apps
    /// export ISLE_VERBOSE=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ISLE_WORD_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.bytes_per_word = size;
            }
        }

        if let Ok(val) = std::env::var("ISLE_BIG_ENDIAN") {
            config.byte_order = if flag(&val) {
                ByteOrder::Big
            } else {
                ByteOrder::Little
            };
        }

        if let Ok(val) = std::env::var("ISLE_HOSTED") {
            config.hosted = flag(&val);
        }

        if let Ok(val) = std::env::var("ISLE_TYPEMAP") {
            config.typemap = flag(&val);
        }

        if let Ok(val) = std::env::var("ISLE_FILE_PATH") {
            config.set_file_path(&val);
        }

        if let Ok(val) = std::env::var("ISLE_SUITE_DIR") {
            config.suite_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("ISLE_SUITE_PUBLIC_KEY") {
            config.suite_public_key = Some(val);
        }

        if let Ok(val) = std::env::var("ISLE_BOOTSTRAP_URL") {
            config.bootstrap_url = val;
        }

        if let Ok(val) = std::env::var("ISLE_RAM_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.ram_size = size;
            }
        }

        if let Ok(val) = std::env::var("ISLE_READ_ONLY_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.read_only_size = size;
            }
        }

        if let Ok(val) = std::env::var("ISLE_GC_STRESS") {
            config.gc_stress = flag(&val);
        }

        if let Ok(val) = std::env::var("ISLE_GC_RETRIES") {
            if let Ok(retries) = val.parse::<u32>() {
                config.gc_retry_limit = retries;
            }
        }

        if let Ok(val) = std::env::var("ISLE_VERBOSE") {
            config.verbose = flag(&val);
        }

        if let Ok(val) = std::env::var("ISLE_TRACE") {
            config.trace = flag(&val);
        }

        config
    }
}

fn flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid word size: {0} (expected 4 or 8, at most the host word)")]
    InvalidWordSize(usize),

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

// ============================================================================
// CONSTANTS
// ============================================================================

/// Kilobyte constant
pub const KB: usize = 1024;

/// Megabyte constant
pub const MB: usize = 1024 * KB;

/// Hosted location of the bootstrap image
pub const DEFAULT_BOOTSTRAP_URL: &str = "file://bootstrap.image";
