//! Configuration Module - Fabric Layout
//!
//! A fabric is a grid of islands, each with up to eight cores. Some cores
//! act as managers: they arbitrate the locks and monitors whose hash codes
//! map to them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::ops::{CoreId, MAX_CORES_PER_ISLAND, MAX_ISLANDS};

/// Layout of a simulated many-core fabric
///
/// # Examples
///
/// ```rust
/// use isle_sync::FabricConfig;
///
/// let config = FabricConfig {
///     islands: 2,
///     cores_per_island: 4,
///     managers: 2,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// assert_eq!(config.core_count(), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Number of islands
    pub islands: usize,

    /// Cores in each island (1..=8)
    pub cores_per_island: usize,

    /// Number of manager cores, taken in order from the enabled cores
    pub managers: usize,

    /// Islands that receive no spawned threads and host no managers
    pub disabled_islands: Vec<usize>,

    /// Log every message sent through the fabric
    pub trace: bool,
}

impl Default for FabricConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        let cores_per_island = cpus.min(MAX_CORES_PER_ISLAND);
        Self {
            islands: cpus.div_ceil(cores_per_island),
            cores_per_island,
            managers: 1,
            disabled_islands: Vec::new(),
            trace: false,
        }
    }
}

impl FabricConfig {
    /// Single island with `cores` cores and one manager
    pub fn single_island(cores: usize) -> Self {
        Self {
            islands: 1,
            cores_per_island: cores,
            managers: 1,
            ..Default::default()
        }
    }

    pub fn core_count(&self) -> usize {
        self.islands * self.cores_per_island
    }

    /// Every core of the fabric, island by island
    pub fn cores(&self) -> impl Iterator<Item = CoreId> + '_ {
        (0..self.islands).flat_map(move |island| {
            (0..self.cores_per_island).map(move |core| CoreId::new(island as u16, core as u8))
        })
    }

    pub fn is_enabled(&self, core: CoreId) -> bool {
        !self.disabled_islands.contains(&(core.island as usize))
    }

    /// Cores that run threads and managers
    pub fn enabled_cores(&self) -> Vec<CoreId> {
        self.cores().filter(|c| self.is_enabled(*c)).collect()
    }

    /// Manager cores, in manager-index order
    pub fn manager_cores(&self) -> Vec<CoreId> {
        self.enabled_cores().into_iter().take(self.managers).collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.islands == 0 || self.islands > MAX_ISLANDS {
            return Err(SyncError::Configuration(format!(
                "islands must be in 1..={}, got {}",
                MAX_ISLANDS, self.islands
            )));
        }

        if self.cores_per_island == 0 || self.cores_per_island > MAX_CORES_PER_ISLAND {
            return Err(SyncError::Configuration(format!(
                "cores_per_island must be in 1..={}, got {}",
                MAX_CORES_PER_ISLAND, self.cores_per_island
            )));
        }

        if let Some(island) = self.disabled_islands.iter().find(|i| **i >= self.islands) {
            return Err(SyncError::Configuration(format!(
                "disabled island {} does not exist",
                island
            )));
        }

        let enabled = self.enabled_cores().len();
        if enabled == 0 {
            return Err(SyncError::Configuration("every island is disabled".to_string()));
        }

        if self.managers == 0 || self.managers > enabled {
            return Err(SyncError::Configuration(format!(
                "managers must be in 1..={}, got {}",
                enabled, self.managers
            )));
        }

        Ok(())
    }

    /// Create configuration from environment variables
    ///
    /// # Environment Variables
    ///
    /// - `ISLE_ISLANDS` - number of islands
    /// - `ISLE_CORES_PER_ISLAND` - cores per island
    /// - `ISLE_MANAGERS` - number of manager cores
    /// - `ISLE_DISABLED_ISLANDS` - comma separated island numbers
    /// - `ISLE_FABRIC_TRACE` - "1" or "true" to log every message
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ISLE_ISLANDS") {
            if let Ok(n) = val.parse::<usize>() {
                config.islands = n;
            }
        }

        if let Ok(val) = std::env::var("ISLE_CORES_PER_ISLAND") {
            if let Ok(n) = val.parse::<usize>() {
                config.cores_per_island = n;
            }
        }

        if let Ok(val) = std::env::var("ISLE_MANAGERS") {
            if let Ok(n) = val.parse::<usize>() {
                config.managers = n;
            }
        }

        if let Ok(val) = std::env::var("ISLE_DISABLED_ISLANDS") {
            config.disabled_islands = val
                .split(',')
                .filter_map(|s| s.trim().parse::<usize>().ok())
                .collect();
        }

        if let Ok(val) = std::env::var("ISLE_FABRIC_TRACE") {
            config.trace = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }
}
