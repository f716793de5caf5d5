//! Records produced by the session for the presentation layer.

use std::fmt;

/// One directory entry as reported by the device.
///
/// A snapshot: it is not updated when the volume changes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Entry {
    /// Entry name without any directory part.
    pub name: String,
    /// File size in bytes (0 for directories).
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_directory: bool,
}

impl Entry {
    /// Create a file entry.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            is_directory: false,
        }
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            is_directory: true,
        }
    }
}

/// Cartridge firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FirmwareVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl FirmwareVersion {
    /// Split the packed 16-bit version word (`major << 8 | minor`).
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_packed(vers: u32) -> Self {
        Self {
            major: ((vers >> 8) & 0xFF) as u8,
            minor: (vers & 0xFF) as u8,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Cartridge information block returned by the info command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CartInfo {
    /// Flash offset where the ROMFS volume starts.
    pub flash_start: u32,
    /// Size of the ROMFS volume in bytes.
    pub flash_size: u32,
    /// Firmware version.
    pub firmware: FirmwareVersion,
}

/// Device status as last observed by the session.
///
/// `None` means the value is unknown: older firmware may not answer the
/// query, or it has not been refreshed since a mutating operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    /// Cartridge information, if the device answered.
    pub cart: Option<CartInfo>,
    /// Free bytes on the volume, if known.
    pub free_bytes: Option<u64>,
}

impl DeviceInfo {
    /// Firmware version, if known.
    pub fn firmware(&self) -> Option<FirmwareVersion> {
        self.cart.map(|c| c.firmware)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.firmware() {
            Some(v) => write!(f, "FW {v}")?,
            None => write!(f, "FW unknown")?,
        }
        match self.free_bytes {
            Some(n) => write!(f, ", free {n} bytes"),
            None => write!(f, ", free unknown"),
        }
    }
}
