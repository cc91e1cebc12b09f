//! Error Module - Object-Memory Error Types
//!
//! Defines all error types raised while reading, relocating and loading
//! object memories.
//!
//! # Error Categories
//!
//! ## Format Errors
//! - `Format` - Malformed field in an object-memory stream
//! - `BadMagic` - Stream does not start with `0xDEADBEEF`
//! - `WordSize` - Image built for another word size
//! - `Truncated` - Stream ended inside a field
//! - `PointerOutOfRange` - Relocated pointer does not fit the image word
//!
//! ## Integrity Errors
//! - `ParentHashMismatch` - Image built against another parent
//! - `SignatureInvalid` - Suite container failed verification
//!
//! ## Concurrency Hazards
//! - `GcDuringRelocation` - Working buffer moved while pointers were rewritten
//!
//! ## Resource Exhaustion
//! - `OutOfMemory` - RAM or read-only allocation failed
//! - `PoolExhausted` - Hosted address pool cannot grow
//!
//! ## Internal Errors
//! - `RelocationIncomplete` - Oop map still has set bits after relocation
//! - `Internal` - Invariant violation

use std::fmt;
use thiserror::Error;

/// Main error type for all object-memory operations
///
/// # Examples
///
/// ```rust
/// use isle_mem::error::MemError;
///
/// fn report(err: MemError) {
///     match err {
///         MemError::ParentHashMismatch { ref hint, .. } => eprintln!("{}", hint),
///         MemError::GcDuringRelocation { .. } => eprintln!("retry the load"),
///         _ => eprintln!("load failed: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum MemError {
    /// Malformed field
    ///
    /// **When returned:** A field read from the stream has an impossible value
    ///
    /// **Recovery strategy:** None - rebuild the image
    #[error("{path}: error reading {field}: {reason}")]
    Format {
        path: String,
        field: String,
        reason: String,
    },

    /// Magic number mismatch
    ///
    /// **When returned:** First four bytes are not `0xDEADBEEF`
    ///
    /// **Recovery strategy:** None - the stream is not an object memory
    #[error("{path}: error reading magic: invalid magic number {found:#010x}")]
    BadMagic { path: String, found: u32 },

    /// Word size mismatch
    ///
    /// **When returned:** The is-32-bit attribute disagrees with the configured word size
    ///
    /// **Recovery strategy:** Rebuild the image for the target word size
    #[error("{path}: error reading attributes: invalid word size, image uses {found} bytes, target uses {expected} bytes")]
    WordSize {
        path: String,
        expected: usize,
        found: usize,
    },

    /// Short read
    ///
    /// **When returned:** Stream ended before a field was complete
    ///
    /// **Recovery strategy:** None - the image is truncated
    #[error("{path}: error reading {field}: expected {wanted} bytes, got {got}")]
    Truncated {
        path: String,
        field: String,
        wanted: usize,
        got: usize,
    },

    /// Relocated pointer does not fit in an image word
    ///
    /// **When returned:** Target address is beyond the range of a 32-bit image
    ///
    /// **Recovery strategy:** Load into a lower address range
    #[error("{uri}: pointer at offset {offset} relocates to {value:#x}, which does not fit in {word} bytes")]
    PointerOutOfRange {
        uri: String,
        offset: usize,
        value: u64,
        word: usize,
    },

    /// Parent hash mismatch
    ///
    /// **When returned:** Declared parent hash differs from the loaded parent
    ///
    /// **Recovery strategy:** Follow the remediation hint
    #[error("{hint}")]
    ParentHashMismatch {
        uri: String,
        expected: i32,
        actual: i32,
        hint: String,
    },

    /// Suite signature verification failed
    ///
    /// **When returned:** Digest of a suite container does not match the installed key
    ///
    /// **Recovery strategy:** Follow the remediation hint
    #[error("{hint}")]
    SignatureInvalid { uri: String, hint: String },

    /// Garbage collection moved the working buffer
    ///
    /// **When returned:** Buffer address changed between collection and end of relocation
    ///
    /// **Recovery strategy:** Discard the attempt and load again from scratch
    #[error("garbage collection occurred while loading object memory from {uri}")]
    GcDuringRelocation { uri: String },

    /// Allocation failed
    ///
    /// **When returned:** RAM semispace or read-only region is full
    ///
    /// **Recovery strategy:** Free memories or raise the configured capacity
    #[error("Out of {space} memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory {
        space: MemorySpaceKind,
        requested: usize,
        available: usize,
    },

    /// Hosted address pool is full
    ///
    /// **When returned:** Interning a new address exceeds the pool capacity
    ///
    /// **Recovery strategy:** Raise the pool capacity
    #[error("Failed to grow address pool when adding {value:#x}: capacity {capacity}")]
    PoolExhausted { value: u64, capacity: usize },

    /// Oop map still has bits set after relocation
    ///
    /// **When returned:** Some pointer lay outside this image and all parents
    ///
    /// **Recovery strategy:** Cannot recover - corrupt image or relocation bug
    #[error("{uri}: relocation incomplete, {remaining} pointers left unrelocated")]
    RelocationIncomplete { uri: String, remaining: usize },

    /// URI scheme without a resolver
    #[error("Unsupported URI: {0}")]
    UnsupportedUri(String),

    /// Configuration error
    ///
    /// **When returned:** Loader configuration failed validation
    ///
    /// **Recovery strategy:** Fix the configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error - indicates a bug
    ///
    /// **When returned:** Invariant violation or unexpected state
    ///
    /// **Recovery strategy:** Cannot recover - report with the full message
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error from the underlying stream
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which memory an allocation was made in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpaceKind {
    Ram,
    ReadOnly,
}

impl fmt::Display for MemorySpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySpaceKind::Ram => write!(f, "RAM"),
            MemorySpaceKind::ReadOnly => write!(f, "read-only"),
        }
    }
}

/// Error category, one per row of the error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Format,
    Integrity,
    ConcurrencyHazard,
    ResourceExhaustion,
    Configuration,
    Internal,
    Io,
}

impl MemError {
    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            MemError::Format { .. }
            | MemError::BadMagic { .. }
            | MemError::WordSize { .. }
            | MemError::Truncated { .. }
            | MemError::PointerOutOfRange { .. } => ErrorCategory::Format,
            MemError::ParentHashMismatch { .. } | MemError::SignatureInvalid { .. } => {
                ErrorCategory::Integrity
            },
            MemError::GcDuringRelocation { .. } => ErrorCategory::ConcurrencyHazard,
            MemError::OutOfMemory { .. } | MemError::PoolExhausted { .. } => {
                ErrorCategory::ResourceExhaustion
            },
            MemError::UnsupportedUri(_)
            | MemError::Configuration(_)
            | MemError::InvalidArgument(_) => ErrorCategory::Configuration,
            MemError::RelocationIncomplete { .. } | MemError::Internal(_) => {
                ErrorCategory::Internal
            },
            MemError::Io(_) => ErrorCategory::Io,
        }
    }

    /// Check if a fresh attempt at the same load may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MemError::GcDuringRelocation { .. } | MemError::OutOfMemory { .. }
        )
    }

    /// Check if this error indicates a bug rather than bad input
    pub fn is_bug(&self) -> bool {
        matches!(self, MemError::Internal(_))
    }

    /// Build a format error for `field` of the stream at `path`
    pub fn format(path: impl Into<String>, field: impl Into<String>, reason: impl Into<String>) -> Self {
        MemError::Format {
            path: path.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for object-memory operations
pub type Result<T> = std::result::Result<T, MemError>;

/// Ensure condition is true, otherwise return error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_error_names_field_and_path() {
        let err = MemError::BadMagic {
            path: "file://app.image".to_string(),
            found: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("magic"));
        assert!(msg.contains("file://app.image"));
        assert_eq!(err.category(), ErrorCategory::Format);
    }

    #[test]
    fn test_categories() {
        let hazard = MemError::GcDuringRelocation {
            uri: "memory:bootstrap".to_string(),
        };
        assert_eq!(hazard.category(), ErrorCategory::ConcurrencyHazard);
        assert!(hazard.is_recoverable());

        let incomplete = MemError::RelocationIncomplete {
            uri: "x".to_string(),
            remaining: 3,
        };
        assert_eq!(incomplete.category(), ErrorCategory::Internal);
        assert!(!incomplete.is_recoverable());

        let oom = MemError::OutOfMemory {
            space: MemorySpaceKind::ReadOnly,
            requested: 64,
            available: 8,
        };
        assert_eq!(oom.category(), ErrorCategory::ResourceExhaustion);
        assert!(oom.to_string().contains("read-only"));
    }

    #[test]
    fn test_hash_mismatch_displays_hint() {
        let err = MemError::ParentHashMismatch {
            uri: "memory:bootstrap".to_string(),
            expected: 1,
            actual: 2,
            hint: "rebuild".to_string(),
        };
        assert_eq!(err.to_string(), "rebuild");
        assert_eq!(err.category(), ErrorCategory::Integrity);
    }
}
