//! Reading and writing the target ROM image

use log::debug;
use std::{
    fs::File,
    io::{self, Read, Write},
    path::Path,
};
use thiserror::Error;

/// Access to the ROM image being patched
///
/// The importer performs all of its I/O through this contract. Implementations
/// that cannot read their ROM back (a pure patch recorder, say) return
/// [`RomError::Unsupported`] from [`RomAccess::rom()`]; builtin songs and bank
/// layouts with a source bank are unusable against such an implementation.
///
/// Comments are advisory debug annotations describing what a write is for;
/// they carry no semantics.
pub trait RomAccess {
    /// A snapshot of the full ROM, reflecting every prior write
    fn rom(&self) -> Result<Vec<u8>, RomError>;

    /// Write a single byte at an absolute ROM offset
    fn write_byte(&mut self, offset: usize, value: u8, comment: &str) -> Result<(), RomError>;

    /// Write a contiguous block at an absolute ROM offset
    fn write_block(&mut self, offset: usize, bytes: &[u8], comment: &str) -> Result<(), RomError>;
}

/// Errors that might occur accessing a ROM through [`RomAccess`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RomError {
    /// The implementation cannot produce a snapshot of the ROM
    #[error("Reading the ROM back is not supported")]
    Unsupported,

    /// A write would extend past the end of the ROM image
    #[error("Writing {length} bytes at {offset:#x} exceeds the ROM size ({size:#x} bytes)")]
    OutOfRange {
        offset: usize,
        length: usize,
        size: usize,
    },
}

/// An in-memory ROM image
///
/// Holds the raw bytes of an `.nes` file: the 16-byte iNES header followed by
/// the PRG banks. All writes land directly in the buffer, so [`RomBuffer::rom()`]
/// trivially reflects them.
pub struct RomBuffer {
    bytes: Vec<u8>,
}

impl RomBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Load a ROM image from a file (.nes)
    pub fn from_file<P>(path: P) -> Result<Self, io::Error>
    where
        P: AsRef<Path>,
    {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Ok(Self::new(bytes))
    }

    /// Save the ROM image to a file (.nes)
    pub fn to_file<P>(&self, path: P) -> Result<(), io::Error>
    where
        P: AsRef<Path>,
    {
        File::create(path)?.write_all(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn check(&self, offset: usize, length: usize) -> Result<(), RomError> {
        if offset + length > self.bytes.len() {
            return Err(RomError::OutOfRange {
                offset,
                length,
                size: self.bytes.len(),
            });
        }

        Ok(())
    }
}

impl RomAccess for RomBuffer {
    fn rom(&self) -> Result<Vec<u8>, RomError> {
        Ok(self.bytes.clone())
    }

    fn write_byte(&mut self, offset: usize, value: u8, comment: &str) -> Result<(), RomError> {
        self.check(offset, 1)?;
        debug!("{comment}: {value:#04x} -> {offset:#x}");
        self.bytes[offset] = value;
        Ok(())
    }

    fn write_block(&mut self, offset: usize, bytes: &[u8], comment: &str) -> Result<(), RomError> {
        self.check(offset, bytes.len())?;
        debug!("{comment}: {} bytes -> {offset:#x}", bytes.len());
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_show_up_in_snapshot() {
        let mut rom = RomBuffer::new(vec![0; 4]);
        rom.write_byte(1, 0xAB, "test").unwrap();
        rom.write_block(2, &[0xCD, 0xEF], "test").unwrap();

        assert_eq!(rom.rom().unwrap(), vec![0x00, 0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn writes_past_end_fail() {
        let mut rom = RomBuffer::new(vec![0; 4]);

        assert_eq!(
            rom.write_byte(4, 0, "test"),
            Err(RomError::OutOfRange {
                offset: 4,
                length: 1,
                size: 4
            })
        );
        assert_eq!(
            rom.write_block(3, &[0, 0], "test"),
            Err(RomError::OutOfRange {
                offset: 3,
                length: 2,
                size: 4
            })
        );
    }
}
