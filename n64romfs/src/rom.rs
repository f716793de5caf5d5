//! N64 ROM byte-order detection and conversion.
//!
//! ROM dumps circulate in three layouts, told apart by the first word of the
//! header:
//!
//! | Layout | First bytes   | Transform to canonical          |
//! |--------|---------------|---------------------------------|
//! | Z64    | `80 37 12 40` | none                            |
//! | V64    | `37 80 40 12` | swap the bytes of each 16-bit half |
//! | N64    | `40 12 37 80` | reverse the bytes of each 32-bit word |
//!
//! The third header byte of a Z64 image configures the PI bus speed and is
//! not part of the magic; it is ignored (at its transformed position) when
//! classifying.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// Header byte that holds the PI bus speed in Z64 order.
pub const PI_BUS_SPEED_OFFSET: usize = 2;

/// File extensions that mark a ROM image.
pub const ROM_EXTENSIONS: [&str; 3] = ["z64", "n64", "v64"];

/// Byte layout of a candidate ROM image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RomFormat {
    /// Canonical big-endian order.
    Z64,
    /// 16-bit byte-swapped order.
    V64,
    /// 32-bit word-swapped (little-endian) order.
    N64,
    /// No known ROM magic.
    NotARom,
}

impl RomFormat {
    /// Classify a header by its first four bytes.
    pub fn classify(header: &[u8]) -> Self {
        match header {
            [0x80, 0x37, _, 0x40, ..] => Self::Z64,
            [0x37, 0x80, 0x40, _, ..] => Self::V64,
            [0x40, _, 0x37, 0x80, ..] => Self::N64,
            _ => Self::NotARom,
        }
    }

    /// Short label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Z64 => "Z64",
            Self::V64 => "V64",
            Self::N64 => "N64",
            Self::NotARom => "not a ROM",
        }
    }

    /// Whether the data is a ROM that is not yet in canonical order.
    pub fn needs_conversion(self) -> bool {
        matches!(self, Self::V64 | Self::N64)
    }

    /// Transform `data` from this layout to Z64, in place.
    ///
    /// `Z64` and `NotARom` leave the buffer untouched. The swapping layouts
    /// require a length that is a multiple of their word size.
    pub fn to_canonical(self, data: &mut [u8]) -> Result<()> {
        match self {
            Self::Z64 | Self::NotARom => Ok(()),
            Self::V64 => {
                check_alignment(data, 2, self)?;
                for half in data.chunks_exact_mut(2) {
                    half.swap(0, 1);
                }
                Ok(())
            },
            Self::N64 => {
                check_alignment(data, 4, self)?;
                for word in data.chunks_exact_mut(4) {
                    word.reverse();
                }
                Ok(())
            },
        }
    }
}

impl std::fmt::Display for RomFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

fn check_alignment(data: &[u8], word: usize, format: RomFormat) -> Result<()> {
    if data.len() % word == 0 {
        Ok(())
    } else {
        Err(Error::InvalidRom(format!(
            "{format} image of {} bytes is not a multiple of {word}",
            data.len()
        )))
    }
}

/// Classify `data` and convert it to Z64 order in place.
///
/// Returns the layout found before conversion.
pub fn convert_to_canonical(data: &mut [u8]) -> Result<RomFormat> {
    let format = RomFormat::classify(data);
    format.to_canonical(data)?;
    Ok(format)
}

/// Overwrite the PI bus speed byte of a Z64 image.
pub fn patch_pi_bus_speed(data: &mut [u8], speed: u8) -> Result<()> {
    match RomFormat::classify(data) {
        RomFormat::Z64 => {
            data[PI_BUS_SPEED_OFFSET] = speed;
            Ok(())
        },
        other => Err(Error::InvalidRom(format!(
            "PI bus speed fix requires Z64 byte order, image is {other}"
        ))),
    }
}

/// Whether `path` has a ROM file extension (case-insensitive).
pub fn has_rom_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ROM_EXTENSIONS.iter().any(|r| r.eq_ignore_ascii_case(ext)))
}

/// Classify a local file by reading its header.
pub fn classify_file(path: &Path) -> Result<RomFormat> {
    let mut header = Vec::with_capacity(4);
    File::open(path)?.take(4).read_to_end(&mut header)?;
    Ok(RomFormat::classify(&header))
}

#[cfg(test)]
mod tests {
    use super::*;

    const Z64: [u8; 8] = [0x80, 0x37, 0x12, 0x40, 0x00, 0x00, 0x00, 0x0F];

    fn v64() -> Vec<u8> {
        vec![0x37, 0x80, 0x40, 0x12, 0x00, 0x00, 0x0F, 0x00]
    }

    fn n64() -> Vec<u8> {
        vec![0x40, 0x12, 0x37, 0x80, 0x0F, 0x00, 0x00, 0x00]
    }

    #[test]
    fn test_classify() {
        assert_eq!(RomFormat::classify(&Z64), RomFormat::Z64);
        assert_eq!(RomFormat::classify(&v64()), RomFormat::V64);
        assert_eq!(RomFormat::classify(&n64()), RomFormat::N64);
        assert_eq!(RomFormat::classify(b"PK\x03\x04"), RomFormat::NotARom);
        assert_eq!(RomFormat::classify(&[0x80, 0x37]), RomFormat::NotARom);
    }

    #[test]
    fn test_canonical_is_noop() {
        let mut data = Z64;
        assert_eq!(convert_to_canonical(&mut data).unwrap(), RomFormat::Z64);
        assert_eq!(data, Z64);
    }

    #[test]
    fn test_v64_converts_to_z64() {
        let mut data = v64();
        assert_eq!(convert_to_canonical(&mut data).unwrap(), RomFormat::V64);
        assert_eq!(data, Z64);
        assert_eq!(RomFormat::classify(&data), RomFormat::Z64);
    }

    #[test]
    fn test_n64_converts_to_z64() {
        let mut data = n64();
        convert_to_canonical(&mut data).unwrap();
        assert_eq!(data, Z64);
    }

    #[test]
    fn test_n64_transform_is_not_v64_transform() {
        // Applying the V64 swap to an N64 image does not yield Z64.
        let mut data = n64();
        RomFormat::V64.to_canonical(&mut data).unwrap();
        assert_ne!(RomFormat::classify(&data), RomFormat::Z64);
    }

    #[test]
    fn test_misaligned_swap_is_invalid_rom() {
        let mut data = n64();
        data.push(0);
        data.push(0);
        assert!(matches!(
            convert_to_canonical(&mut data),
            Err(Error::InvalidRom(_))
        ));
    }

    #[test]
    fn test_not_a_rom_is_untouched() {
        let mut data = b"hello world".to_vec();
        assert_eq!(convert_to_canonical(&mut data).unwrap(), RomFormat::NotARom);
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn test_patched_speed_still_classifies() {
        let mut data = Z64;
        patch_pi_bus_speed(&mut data, 0x1B).unwrap();
        assert_eq!(data[2], 0x1B);
        assert_eq!(RomFormat::classify(&data), RomFormat::Z64);
    }

    #[test]
    fn test_pi_patch_requires_z64() {
        let mut data = v64();
        assert!(patch_pi_bus_speed(&mut data, 0x1B).is_err());
    }

    #[test]
    fn test_rom_extension() {
        assert!(has_rom_extension(Path::new("mario.Z64")));
        assert!(has_rom_extension(Path::new("/tmp/zelda.v64")));
        assert!(!has_rom_extension(Path::new("save.eep")));
        assert!(!has_rom_extension(Path::new("n64")));
    }

    #[test]
    fn test_classify_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.v64");
        std::fs::write(&path, v64()).unwrap();
        assert_eq!(classify_file(&path).unwrap(), RomFormat::V64);

        let short = dir.path().join("short.bin");
        std::fs::write(&short, [0x80]).unwrap();
        assert_eq!(classify_file(&short).unwrap(), RomFormat::NotARom);
    }
}
