// Cartridge loading
//
// The header at 0x0100-0x014F carries the metadata this loader reads:
//
// 0x0100-0x0103: entry point
// 0x0104-0x0133: logo
// 0x0134-0x0143: title
// 0x0147:        cartridge type (MBC)
// 0x0148:        ROM size code (bank count)
// 0x0149:        RAM size code
// 0x014D:        header checksum
//
// The first 0x8000 bytes land in the CPU address space; the whole file
// is also sliced into 16KB banks keyed off the 0x0148 code. The bus
// ignores the bank array for now, bank switching is a stub.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

/// Bytes per ROM bank
pub const BANK_SIZE: usize = 0x4000;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("failed to read ROM file: {0}")]
    Io(#[from] io::Error),
    #[error("ROM too small: {0} bytes, need at least 0x150 for the header")]
    TooSmall(usize),
    #[error("ROM truncated: header promises {expected} banks, file holds {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Cartridge MBC type from header byte 0x0147
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartridgeType {
    RomOnly,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
    Unknown(u8),
}

impl From<u8> for CartridgeType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => CartridgeType::RomOnly,
            0x01..=0x03 => CartridgeType::Mbc1,
            0x05..=0x06 => CartridgeType::Mbc2,
            0x0F..=0x13 => CartridgeType::Mbc3,
            0x19..=0x1E => CartridgeType::Mbc5,
            _ => CartridgeType::Unknown(value),
        }
    }
}

/// Header metadata
#[derive(Debug)]
pub struct CartridgeInfo {
    pub title: String,
    pub cartridge_type: CartridgeType,
    pub rom_size: usize,
    pub ram_size: usize,
    pub header_checksum: u8,
    pub checksum_valid: bool,
}

/// A loaded ROM: raw bytes, parsed header, and the 16KB bank array
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub banks: Vec<[u8; BANK_SIZE]>,
    pub info: CartridgeInfo,
}

impl Cartridge {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CartridgeError> {
        let rom = fs::read(path)?;
        Self::from_bytes(rom)
    }

    pub fn from_bytes(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        if rom.len() < 0x150 {
            return Err(CartridgeError::TooSmall(rom.len()));
        }

        let info = Self::parse_header(&rom);
        let banks = Self::slice_banks(&rom)?;

        log::info!(
            "loaded ROM \"{}\": {:?}, {}KB ROM, {}KB RAM, {} banks, checksum {}",
            info.title,
            info.cartridge_type,
            info.rom_size / 1024,
            info.ram_size / 1024,
            banks.len(),
            if info.checksum_valid { "ok" } else { "BAD" },
        );

        Ok(Self { rom, banks, info })
    }

    fn parse_header(rom: &[u8]) -> CartridgeInfo {
        let title = rom[0x0134..=0x0143]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect::<String>();

        let cartridge_type = CartridgeType::from(rom[0x0147]);

        // ROM size code: 32KB shifted left by the code value
        let rom_size = 32 * 1024 << rom[0x0148].min(8);

        let ram_size = match rom[0x0149] {
            0x01 => 2 * 1024,
            0x02 => 8 * 1024,
            0x03 => 32 * 1024,
            0x04 => 128 * 1024,
            0x05 => 64 * 1024,
            _ => 0,
        };

        // Checksum over 0x0134-0x014C: x = x - byte - 1
        let mut checksum: u8 = 0;
        for &byte in &rom[0x0134..=0x014C] {
            checksum = checksum.wrapping_sub(byte).wrapping_sub(1);
        }
        let header_checksum = rom[0x014D];

        CartridgeInfo {
            title,
            cartridge_type,
            rom_size,
            ram_size,
            header_checksum,
            checksum_valid: checksum == header_checksum,
        }
    }

    /// Slice the file into 16KB banks; the header's 0x0148 code promises
    /// bank_count + 1 banks beyond the fixed 32KB region.
    fn slice_banks(rom: &[u8]) -> Result<Vec<[u8; BANK_SIZE]>, CartridgeError> {
        let expected = rom.len() / BANK_SIZE;
        let promised = (1usize << (rom[0x0148].min(8) + 1)).max(2);

        if expected < 2 {
            return Err(CartridgeError::Truncated {
                expected: 2,
                actual: expected,
            });
        }
        if expected < promised {
            log::warn!(
                "header promises {} banks but the file holds {}",
                promised,
                expected
            );
        }

        let banks = rom
            .chunks_exact(BANK_SIZE)
            .map(|chunk| {
                let mut bank = [0u8; BANK_SIZE];
                bank.copy_from_slice(chunk);
                bank
            })
            .collect();

        Ok(banks)
    }
}
