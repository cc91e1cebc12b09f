//! Shared fixtures for the fabric integration tests

#![allow(dead_code)]

use isle_sync::{CoreHandle, CoreId, Fabric, FabricConfig};

/// Fabric with one island of `cores` cores and a single manager at 0:0
pub fn fabric(cores: usize) -> Fabric {
    Fabric::new(FabricConfig::single_island(cores)).expect("valid fabric config")
}

/// Fabric with two islands of four cores and `managers` manager cores
pub fn two_islands(managers: usize) -> Fabric {
    let config = FabricConfig {
        islands: 2,
        cores_per_island: 4,
        managers,
        ..FabricConfig::single_island(4)
    };
    Fabric::new(config).expect("valid fabric config")
}

/// One new thread handle per core of the fabric
pub fn handles(fabric: &Fabric) -> Vec<CoreHandle> {
    fabric
        .cores()
        .into_iter()
        .map(|core| fabric.core(core).expect("core exists"))
        .collect()
}

pub fn core(fabric: &Fabric, island: u16, core: u8) -> CoreHandle {
    fabric.core(CoreId::new(island, core)).expect("core exists")
}
