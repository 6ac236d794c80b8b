//! Catalog of supported target models.

use thiserror::Error;

/// Memory capacities of one AT89Sxx model
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub ram_bytes: u32,
    pub rom_bytes: u32,
}

/// Targets the bridge firmware knows how to program
pub const TARGETS: &[DeviceProfile] = &[
    DeviceProfile {
        name: "AT89S51",
        ram_bytes: 128,
        rom_bytes: 4 * 1024,
    },
    DeviceProfile {
        name: "AT89S52",
        ram_bytes: 256,
        rom_bytes: 8 * 1024,
    },
    DeviceProfile {
        name: "AT89S8253",
        ram_bytes: 256,
        rom_bytes: 12 * 1024,
    },
];

#[derive(Clone, PartialEq, Debug, Error)]
#[error("unknown target model '{0}', supported: AT89S51, AT89S52, AT89S8253")]
pub struct UnknownTarget(pub String);

/// Exact-name lookup in the fixed catalog
pub fn lookup(name: &str) -> Result<&'static DeviceProfile, UnknownTarget> {
    TARGETS
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| UnknownTarget(name.to_string()))
}
