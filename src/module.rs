//! Sensor family identification.
//!
//! The top five bits of the 16-bit serial number reported in an Information
//! frame encode the module family.

use std::fmt;

use serde::Serialize;

/// Bits of the serial number that carry the family pattern.
pub const FAMILY_MASK: u16 = 0xF800;

/// Sensor family of a TriOS module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModuleType {
    /// Hyperspectral radiance/irradiance module (Ramses SAM).
    #[serde(rename = "SAM")]
    Sam,
    /// Fluorometer.
    #[serde(rename = "FLU")]
    Flu,
    /// Communication module.
    #[serde(rename = "COM")]
    Com,
    /// Interface box addressing several sensors (COM subtype).
    #[serde(rename = "IPS")]
    Ips,
    /// SAM with integrated interface (COM subtype).
    #[serde(rename = "SAMIP")]
    SamIp,
    Unknown,
}

/// Five-bit family patterns, most significant serial bit first.
const FAMILY_PATTERNS: &[(u16, ModuleType)] = &[
    (0b10000, ModuleType::Sam),
    (0b10001, ModuleType::Sam),
    (0b10010, ModuleType::Sam),
    (0b10011, ModuleType::Sam),
    (0b01000, ModuleType::Com),
    (0b01001, ModuleType::Ips),
    (0b01010, ModuleType::SamIp),
    (0b01011, ModuleType::Com),
    (0b00010, ModuleType::Flu),
];

impl ModuleType {
    /// Look up the family encoded in a serial number.
    pub fn from_serial(serial_number: u16) -> Self {
        let pattern = (serial_number & FAMILY_MASK) >> 11;
        FAMILY_PATTERNS
            .iter()
            .find(|(bits, _)| *bits == pattern)
            .map(|(_, module)| *module)
            .unwrap_or(ModuleType::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleType::Sam => "SAM",
            ModuleType::Flu => "FLU",
            ModuleType::Com => "COM",
            ModuleType::Ips => "IPS",
            ModuleType::SamIp => "SAMIP",
            ModuleType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
