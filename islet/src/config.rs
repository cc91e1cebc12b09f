//! Configuration module for the islet CLI.
//!
//! An `islet.toml` file has two optional tables, `[loader]` and `[fabric]`,
//! holding the fields of `LoaderConfig` and `FabricConfig`. Without a file
//! both come from `ISLE_*` environment variables.

use dirs::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use isle_mem::LoaderConfig;
use isle_sync::FabricConfig;

use crate::error::{IsletError, Result};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "islet.toml";

/// Application configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Object-memory loader settings.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Simulated fabric used by `contend`.
    #[serde(default)]
    pub fabric: FabricConfig,
}

impl Config {
    /// Settings from `ISLE_*` environment variables
    pub fn from_env() -> Self {
        Self {
            loader: LoaderConfig::from_env(),
            fabric: FabricConfig::from_env(),
        }
    }

    /// Configuration from the first `islet.toml` found, else the environment
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::from_env()),
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IsletError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!("configuration read from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Check both sections
    pub fn validate(&self) -> Result<()> {
        self.loader
            .validate()
            .map_err(|e| IsletError::Config(format!("[loader] {}", e)))?;
        self.fabric
            .validate()
            .map_err(|e| IsletError::Config(format!("[fabric] {}", e)))?;
        Ok(())
    }

    /// First existing file among `./islet.toml`, `~/.config/islet/islet.toml`
    /// and `<config dir>/islet/islet.toml`
    fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            Some(PathBuf::from(CONFIG_FILE_NAME)),
            home_dir().map(|home| home.join(".config").join("islet").join(CONFIG_FILE_NAME)),
            config_dir().map(|dir| dir.join("islet").join(CONFIG_FILE_NAME)),
        ];
        candidates.into_iter().flatten().find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isle_mem::ByteOrder;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "[loader]\nbytes_per_word = 4\nbyte_order = \"big\"\n\n[fabric]\nislands = 2\ncores_per_island = 2\nmanagers = 1\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.loader.bytes_per_word, 4);
        assert_eq!(config.loader.byte_order, ByteOrder::Big);
        assert!(!config.loader.hosted);
        assert_eq!(config.fabric.core_count(), 4);
    }

    #[test]
    fn test_config_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut original = Config::default();
        original.loader.typemap = true;
        original.loader.suite_public_key =
            Some("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798".to_string());
        original.fabric = FabricConfig::single_island(3);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, toml::to_string_pretty(&original).unwrap()).unwrap();

        assert_eq!(Config::load_from_path(&path).unwrap(), original);
    }

    #[test]
    fn test_invalid_section_is_named() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[fabric]\ncores_per_island = 9\n").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("[fabric]"));
    }

    #[test]
    fn test_load_from_nonexistent_path() {
        let result = Config::load_from_path(Path::new("/nonexistent/path/islet.toml"));
        assert!(matches!(result, Err(IsletError::Config(_))));
    }
}
