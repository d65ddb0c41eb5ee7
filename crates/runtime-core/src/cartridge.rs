//! Cartridge image loading and header classification.
//!
//! The header layout is fixed by the platform: the title lives at
//! `0x134..=0x143`, the mapper code at `0x147`, the declared ROM size at
//! `0x148`, and the declared external-RAM size at `0x149`. Everything the
//! analyzer and the runtime need to know about banking is derived here once,
//! at load time.

use thiserror::Error;

/// Minimum image length that still contains a complete header.
pub const HEADER_END: usize = 0x150;

/// Offset of the title field.
pub const TITLE_RANGE: core::ops::Range<usize> = 0x134..0x144;
/// Offset of the mapper classification byte.
pub const MBC_CODE_OFFSET: usize = 0x147;
/// Offset of the declared ROM size code.
pub const ROM_SIZE_OFFSET: usize = 0x148;
/// Offset of the declared external-RAM size code.
pub const ERAM_SIZE_OFFSET: usize = 0x149;

/// Size in bytes of one switchable ROM bank.
pub const ROM_BANK_SIZE: usize = 0x4000;
/// Size in bytes of one switchable external-RAM bank.
pub const ERAM_BANK_SIZE: usize = 0x2000;

/// Errors raised while loading a cartridge image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CartridgeError {
    /// The image is shorter than a complete header, or a header size code is
    /// outside its defined domain.
    #[error("invalid cartridge image: {0}")]
    InvalidCartridge(&'static str),
    /// The mapper code at `0x147` is not one the translator understands.
    #[error("unsupported MBC code {0:#04x}")]
    UnsupportedMbc(u8),
}

/// Memory bank controller family, classified from header byte `0x147`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MbcKind {
    /// 32 KiB flat ROM, no banking hardware.
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

impl MbcKind {
    /// Classifies the mapper byte. Returns `None` for codes the translator
    /// does not support.
    #[must_use]
    pub const fn from_header_byte(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::None),
            0x01..=0x03 => Some(Self::Mbc1),
            0x05..=0x06 => Some(Self::Mbc2),
            0x0F..=0x13 => Some(Self::Mbc3),
            0x19..=0x1E => Some(Self::Mbc5),
            _ => None,
        }
    }

    /// Writes of zero to the ROM bank-select register are promoted to one on
    /// these mappers.
    #[must_use]
    pub const fn promotes_bank_zero(self) -> bool {
        matches!(self, Self::Mbc1 | Self::Mbc3)
    }
}

/// An immutable, validated cartridge image.
#[derive(Debug, Clone)]
pub struct Cartridge {
    /// Raw image bytes. Bank N occupies `N * ROM_BANK_SIZE ..`.
    pub bytes: Vec<u8>,
    /// Title field, trimmed at the first NUL.
    pub title: String,
    /// Mapper family.
    pub mbc: MbcKind,
    /// ROM size declared by the header (`0x8000 << code`).
    pub rom_size: usize,
    /// External RAM size in bytes; 512 for MBC2's built-in RAM.
    pub eram_size: usize,
}

impl Cartridge {
    /// Parses and validates a cartridge image.
    ///
    /// # Errors
    ///
    /// Returns [`CartridgeError::InvalidCartridge`] when the image is shorter
    /// than `0x150` bytes or a size code is undefined, and
    /// [`CartridgeError::UnsupportedMbc`] for an unrecognized mapper byte.
    pub fn load(bytes: Vec<u8>) -> Result<Self, CartridgeError> {
        if bytes.len() < HEADER_END {
            return Err(CartridgeError::InvalidCartridge(
                "image shorter than header",
            ));
        }

        let mbc_code = bytes[MBC_CODE_OFFSET];
        let mbc =
            MbcKind::from_header_byte(mbc_code).ok_or(CartridgeError::UnsupportedMbc(mbc_code))?;

        let rom_code = bytes[ROM_SIZE_OFFSET];
        if rom_code > 0x08 {
            return Err(CartridgeError::InvalidCartridge("undefined ROM size code"));
        }
        let rom_size = 0x8000_usize << rom_code;

        let eram_size = if mbc == MbcKind::Mbc2 {
            // MBC2 carries 512 half-bytes on the mapper itself; the header
            // size code is ignored.
            512
        } else {
            match bytes[ERAM_SIZE_OFFSET] {
                0x00 => 0,
                0x01 => 2 * 1024,
                0x02 => 8 * 1024,
                0x03 => 32 * 1024,
                0x04 => 128 * 1024,
                0x05 => 64 * 1024,
                _ => {
                    return Err(CartridgeError::InvalidCartridge(
                        "undefined external RAM size code",
                    ))
                }
            }
        };

        let title_bytes = &bytes[TITLE_RANGE];
        let title_len = title_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(title_bytes.len());
        let title = String::from_utf8_lossy(&title_bytes[..title_len])
            .trim_end()
            .to_string();

        Ok(Self {
            bytes,
            title,
            mbc,
            rom_size,
            eram_size,
        })
    }

    /// Number of 16 KiB banks actually present in the image.
    #[must_use]
    pub fn bank_count(&self) -> usize {
        self.bytes.len().div_ceil(ROM_BANK_SIZE)
    }

    /// Reads one byte of a given bank, treating `addr` as a CPU-visible
    /// address. Addresses below `0x4000` ignore `bank` and read bank zero.
    /// Out-of-image reads return `0xFF`, matching open-bus behavior.
    #[must_use]
    pub fn read_banked(&self, bank: u16, addr: u16) -> u8 {
        let offset = if addr < 0x4000 {
            addr as usize
        } else {
            bank as usize * ROM_BANK_SIZE + (addr as usize - 0x4000)
        };
        self.bytes.get(offset).copied().unwrap_or(0xFF)
    }
}
