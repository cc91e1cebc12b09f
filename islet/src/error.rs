//! Error handling module for the islet CLI.
//!
//! Library errors are wrapped, not flattened, so their categories stay
//! available when deciding the exit code.

use thiserror::Error;

/// Main error type for the islet CLI application.
#[derive(Error, Debug)]
pub enum IsletError {
    /// Error when the configuration file is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error when input validation fails.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error raised while reading, relocating or verifying an object memory.
    #[error(transparent)]
    Memory(#[from] isle_mem::MemError),

    /// Error raised by the simulated core fabric.
    #[error("Fabric error: {0}")]
    Sync(#[from] isle_sync::SyncError),

    /// Error when IO operations fail.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error when JSON serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error when the TOML configuration cannot be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl IsletError {
    /// Process exit code for this error
    ///
    /// 2 for usage and configuration problems, 3 for images that fail
    /// integrity checks, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            IsletError::Config(_) | IsletError::Validation(_) | IsletError::Toml(_) => 2,
            IsletError::Memory(e) if e.category() == isle_mem::ErrorCategory::Integrity => 3,
            _ => 1,
        }
    }
}

/// Result type alias using IsletError.
pub type Result<T> = std::result::Result<T, IsletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = IsletError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_memory_error_is_transparent() {
        let err: IsletError = isle_mem::MemError::format("memory:app", "root", "too big").into();
        assert_eq!(err.to_string(), "memory:app: error reading root: too big");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: IsletError = io_err.into();
        assert!(matches!(err, IsletError::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
        let err: IsletError = toml_err.into();
        assert_eq!(err.exit_code(), 2);
    }
}
