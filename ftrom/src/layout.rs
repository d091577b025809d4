//! Bank geometry and ROM table layout for a target game

use crate::tag::Tag;
use serde::Deserialize;
use std::{
    collections::{BTreeSet, HashMap},
    ops::Range,
};
use thiserror::Error;

/// Where new module data may go inside one fixed-size bank
///
/// A bank is a contiguous region of PRG ROM that the mapper switches into a
/// well-known address window. The free ranges are the offsets inside the bank
/// the game does not use; everything else must survive the import untouched
/// when the bank has a source bank, which is what the derived copy ranges
/// describe.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawBankLayout")]
pub struct BankLayout {
    bank_base_addr: u16,
    bank_size: usize,
    free_ranges: Vec<Range<usize>>,
    source_bank: Option<usize>,
    copy_ranges: Vec<Range<usize>>,
}

impl BankLayout {
    /// Construct a layout, normalizing and validating the free ranges
    ///
    /// An empty `free_ranges` means the entire bank is free. Otherwise the
    /// ranges are sorted by start and must be non-overlapping, non-inverted
    /// and within the bank. The copy ranges (the complement of the free
    /// ranges) are only materialized when `source_bank` is set.
    pub fn new(
        bank_base_addr: u16,
        bank_size: usize,
        free_ranges: Vec<Range<usize>>,
        source_bank: Option<usize>,
    ) -> Result<Self, LayoutError> {
        let mut free_ranges = if free_ranges.is_empty() {
            vec![0..bank_size]
        } else {
            free_ranges
        };
        free_ranges.sort_by_key(|range| range.start);

        for range in &free_ranges {
            if range.start >= range.end {
                return Err(LayoutError::InvertedRange {
                    start: range.start,
                    end: range.end,
                });
            }
            if range.end > bank_size {
                return Err(LayoutError::RangeOutOfBounds {
                    start: range.start,
                    end: range.end,
                    bank_size,
                });
            }
        }

        for pair in free_ranges.windows(2) {
            if pair[0].end > pair[1].start {
                return Err(LayoutError::OverlappingRanges {
                    first: pair[0].clone(),
                    second: pair[1].clone(),
                });
            }
        }

        let copy_ranges = if source_bank.is_some() {
            complement(&free_ranges, bank_size)
        } else {
            Vec::new()
        };

        Ok(Self {
            bank_base_addr,
            bank_size,
            free_ranges,
            source_bank,
            copy_ranges,
        })
    }

    /// The logical address the bank is mapped to when active
    pub fn bank_base_addr(&self) -> u16 {
        self.bank_base_addr
    }

    pub fn bank_size(&self) -> usize {
        self.bank_size
    }

    /// Offset intervals available for new module data, sorted by start
    pub fn free_ranges(&self) -> &[Range<usize>] {
        &self.free_ranges
    }

    /// The bank whose original contents must be preserved outside the free ranges
    pub fn source_bank(&self) -> Option<usize> {
        self.source_bank
    }

    /// Offset intervals that must hold the source bank's original bytes
    ///
    /// Empty unless a source bank is set.
    pub fn copy_ranges(&self) -> &[Range<usize>] {
        &self.copy_ranges
    }
}

/// The complement of a sorted set of non-overlapping ranges within `0..size`
fn complement(ranges: &[Range<usize>], size: usize) -> Vec<Range<usize>> {
    let mut result = Vec::new();
    let mut cursor = 0;

    for range in ranges {
        if cursor < range.start {
            result.push(cursor..range.start);
        }
        cursor = range.end;
    }

    if cursor < size {
        result.push(cursor..size);
    }

    result
}

#[derive(Debug, Deserialize)]
struct RawBankLayout {
    bank_base_addr: u16,
    bank_size: usize,
    #[serde(default)]
    free_ranges: Vec<Range<usize>>,
    #[serde(default)]
    source_bank: Option<usize>,
}

impl TryFrom<RawBankLayout> for BankLayout {
    type Error = LayoutError;

    fn try_from(raw: RawBankLayout) -> Result<Self, Self::Error> {
        Self::new(
            raw.bank_base_addr,
            raw.bank_size,
            raw.free_ranges,
            raw.source_bank,
        )
    }
}

/// Errors that might occur constructing a [`BankLayout`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// A free range whose start is not below its end
    #[error("Free range {start:#x}..{end:#x} is inverted")]
    InvertedRange { start: usize, end: usize },

    /// A free range extending past the bank
    #[error("Free range {start:#x}..{end:#x} exceeds the bank size ({bank_size:#x} bytes)")]
    RangeOutOfBounds {
        start: usize,
        end: usize,
        bank_size: usize,
    },

    /// Two free ranges sharing bytes
    #[error("Free ranges {first:?} and {second:?} overlap")]
    OverlappingRanges {
        first: Range<usize>,
        second: Range<usize>,
    },
}

/// A free subrange tagged with the bank it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankRange {
    pub bank: usize,
    pub start: usize,
    pub end: usize,
}

impl BankRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// A per-bank staging buffer built up during an import
///
/// Starts zero-filled; the packer copies rebased module images in, and bank
/// finalization overlays the copy ranges from the original ROM before the
/// whole bank is written out.
pub struct BankData {
    /// The engine whose layout governs this bank
    pub engine: Tag,
    pub bytes: Vec<u8>,
}

impl BankData {
    pub fn new(engine: Tag, bank_size: usize) -> Self {
        Self {
            engine,
            bytes: vec![0; bank_size],
        }
    }
}

/// A secondary ROM-resident song table
///
/// Secondary maps redirect a per-scenario index (boss fights, jingles, ...) to
/// a primary song slot. Each entry is a single byte: a primary slot index, or
/// `empty_index` for unassigned entries.
#[derive(Debug, Clone, Deserialize)]
pub struct SongMapInfo {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    #[serde(default = "default_empty_index")]
    pub empty_index: u8,
}

fn default_empty_index() -> u8 {
    0xFF
}

/// Per-engine geometry: where that engine's modules may be placed
#[derive(Debug, Clone, Deserialize)]
pub struct EngineLayout {
    pub bank_layout: BankLayout,
    /// Audio channels the engine's modules declare, in driver order
    #[serde(default = "default_channels")]
    pub channels: u8,
}

fn default_channels() -> u8 {
    // The 2A03 driver order: square 1, square 2, triangle, noise, DPCM
    5
}

/// Everything the importer must know about the target game
///
/// A layout is game-specific and typically ships as a JSON file next to the
/// song library. Offsets are absolute positions in the raw ROM file,
/// including the 16-byte iNES header.
#[derive(Debug, Clone, Deserialize)]
pub struct RomLayout {
    /// Number of entries in the primary song map
    pub num_songs: usize,
    /// Offset of the primary song map (2 bytes per song)
    pub song_map_offset: usize,
    /// Offset of the module load-address table (one LE word per song)
    pub module_addr_table_offset: usize,
    /// Which square channel the game's driver treats as the melody channel
    #[serde(default)]
    pub primary_square_channel: u8,
    /// Primary slots not used by the game, available for secondary-only songs
    #[serde(default)]
    pub free_slots: BTreeSet<usize>,
    /// Banks not used by the game, in the order the packer may claim them
    pub free_banks: Vec<usize>,
    pub engines: HashMap<Tag, EngineLayout>,
    #[serde(default)]
    pub secondary_maps: Vec<SongMapInfo>,
    /// Raw ROM files carry a 16-byte header preceding bank 0
    #[serde(default = "default_header_offset")]
    pub header_offset: usize,
    /// Leftover free-range fragments below this size are discarded
    #[serde(default = "default_min_keepable_remainder")]
    pub min_keepable_remainder: usize,
}

fn default_header_offset() -> usize {
    16
}

fn default_min_keepable_remainder() -> usize {
    64
}

impl RomLayout {
    /// Look up the layout for an engine label, case-insensitively
    pub fn engine(&self, engine: &Tag) -> Option<&EngineLayout> {
        self.engines.get(engine)
    }

    /// Look up a secondary map by name
    pub fn secondary_map(&self, name: &str) -> Option<&SongMapInfo> {
        self.secondary_maps.iter().find(|map| map.name == name)
    }
}
