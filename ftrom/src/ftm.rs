//! In-place transforms on FamiTracker NES-driver module binaries
//!
//! A module is the tracker's binary export for the NES sound driver: a
//! pointer-linked graph of song headers, frame lists and per-channel pattern
//! data, addressed with absolute little-endian pointers that are only valid
//! at the address the module was exported for. [`FtmBinary`] mutates a module
//! image in place, either to relocate it ([`FtmBinary::rebase()`]) or to swap
//! the roles of the two square channels ([`FtmBinary::swap_square_channels()`]).
//!
//! The module layout:
//!
//! ```text
//! +0   u8   song count
//! +1   u16  -> song list: one pointer per song, to a song header
//! +3   u16  -> instrument list: u8 count, then one pointer per instrument
//! +5   u16  -> DPCM sample map
//! +7   u16  -> DPCM sample list
//! +9   u8   flags
//! +10  u16  NTSC tempo
//! +12  u16  PAL tempo
//! ```
//!
//! A song header is `frame_list (u16), frame_count (u8), pattern_length (u8),
//! speed (u8), tempo (u8)`; the frame list holds one pointer per frame; a
//! frame holds one pattern pointer per channel, in driver order (square 1,
//! square 2, triangle, noise, DPCM). The DPCM tables contain register-encoded
//! sample addresses, not module pointers, so their interiors never move.

use crate::buffer::{BufferError, ByteCursor};
use std::collections::BTreeSet;
use thiserror::Error;

const SONG_COUNT: usize = 0;
const SONG_LIST: usize = 1;
const INSTRUMENT_LIST: usize = 3;
const SAMPLE_MAP: usize = 5;
const SAMPLE_LIST: usize = 7;

const SONG_FRAME_LIST: usize = 0;
const SONG_FRAME_COUNT: usize = 2;

const SQUARE_1: usize = 0;
const SQUARE_2: usize = 1;

/// A mutable FamiTracker module image anchored at a load address
pub struct FtmBinary {
    cursor: ByteCursor,
    base: u16,
    channels: u8,
}

impl FtmBinary {
    /// Wrap module bytes that expect to be loaded at `base`
    pub fn new(bytes: Vec<u8>, base: u16, channels: u8) -> Self {
        Self {
            cursor: ByteCursor::new(bytes),
            base,
            channels,
        }
    }

    /// The address the image is currently valid at
    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.cursor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.cursor.as_slice()
    }

    /// Unwrap the (possibly transformed) module bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.cursor.into_inner()
    }

    /// How many songs the module declares
    pub fn song_count(&self) -> Result<u8, FtmError> {
        Ok(self.cursor.get(SONG_COUNT)?)
    }

    /// Rewrite every pointer in the module so it is valid at `new_base`
    ///
    /// Walks the full pointer graph (header tables, song headers, frame
    /// lists, frames, instrument list) and shifts each pointer by the move
    /// delta. The image length never changes.
    pub fn rebase(&mut self, new_base: u16) -> Result<(), FtmError> {
        if new_base == self.base {
            return Ok(());
        }

        let sites = self.pointer_sites()?;
        let delta = new_base.wrapping_sub(self.base);

        for site in sites {
            let pointer = self.cursor.u16_le_at(site)?;
            self.cursor.set_u16_le_at(site, pointer.wrapping_add(delta))?;
        }

        self.base = new_base;
        Ok(())
    }

    /// Swap the square 1 and square 2 pattern pointers in every frame of a song
    ///
    /// Games differ on which square channel carries the melody; swapping the
    /// two channels' patterns retargets a song without touching the pattern
    /// data itself.
    pub fn swap_square_channels(&mut self, song: u8) -> Result<(), FtmError> {
        if self.channels < 2 {
            return Err(FtmError::TooFewChannels {
                channels: self.channels,
            });
        }

        for frame in self.song_frames(song)? {
            let square_1 = self.cursor.u16_le_at(frame + 2 * SQUARE_1)?;
            let square_2 = self.cursor.u16_le_at(frame + 2 * SQUARE_2)?;
            self.cursor.set_u16_le_at(frame + 2 * SQUARE_1, square_2)?;
            self.cursor.set_u16_le_at(frame + 2 * SQUARE_2, square_1)?;
        }

        Ok(())
    }

    /// The module offset a pointer lands on
    fn offset_of(&self, address: u16) -> Result<usize, FtmError> {
        let offset = address
            .checked_sub(self.base)
            .map(usize::from)
            .filter(|offset| *offset < self.cursor.len())
            .ok_or(FtmError::PointerOutOfModule { address })?;
        Ok(offset)
    }

    /// Follow the pointer stored at a module offset
    fn follow(&self, site: usize) -> Result<usize, FtmError> {
        self.offset_of(self.cursor.u16_le_at(site)?)
    }

    /// Offsets of the frames of one song, deduplicated
    ///
    /// Frame lists may point at a shared frame more than once; visiting it
    /// twice would double-apply any transform.
    fn song_frames(&self, song: u8) -> Result<BTreeSet<usize>, FtmError> {
        let count = self.song_count()?;
        if song >= count {
            return Err(FtmError::NoSuchSong { song, count });
        }

        let song_list = self.follow(SONG_LIST)?;
        let header = self.follow(song_list + 2 * song as usize)?;
        let frame_list = self.follow(header + SONG_FRAME_LIST)?;
        let frame_count = self.cursor.get(header + SONG_FRAME_COUNT)?;

        let mut frames = BTreeSet::new();
        for index in 0..frame_count as usize {
            frames.insert(self.follow(frame_list + 2 * index)?);
        }

        Ok(frames)
    }

    /// Offsets of every pointer-holding word in the module, deduplicated
    fn pointer_sites(&self) -> Result<BTreeSet<usize>, FtmError> {
        let mut sites = BTreeSet::new();
        sites.insert(SONG_LIST);
        sites.insert(INSTRUMENT_LIST);
        sites.insert(SAMPLE_MAP);
        sites.insert(SAMPLE_LIST);

        let song_list = self.follow(SONG_LIST)?;
        for song in 0..self.song_count()? as usize {
            let entry = song_list + 2 * song;
            sites.insert(entry);

            let header = self.follow(entry)?;
            sites.insert(header + SONG_FRAME_LIST);

            let frame_list = self.follow(header + SONG_FRAME_LIST)?;
            let frame_count = self.cursor.get(header + SONG_FRAME_COUNT)?;
            for index in 0..frame_count as usize {
                let entry = frame_list + 2 * index;
                sites.insert(entry);

                let frame = self.follow(entry)?;
                for channel in 0..self.channels as usize {
                    sites.insert(frame + 2 * channel);
                }
            }
        }

        let instrument_list = self.follow(INSTRUMENT_LIST)?;
        let instrument_count = self.cursor.get(instrument_list)?;
        for index in 0..instrument_count as usize {
            sites.insert(instrument_list + 1 + 2 * index);
        }

        Ok(sites)
    }
}

/// Errors that might occur transforming an [`FtmBinary`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FtmError {
    /// The module is truncated relative to its own pointer graph
    #[error("Reading the module data failed")]
    Buffer(#[from] BufferError),

    /// A pointer that does not land inside the module image
    #[error("Pointer {address:#06x} does not land inside the module")]
    PointerOutOfModule { address: u16 },

    /// A song index at or past the declared song count
    #[error("The module contains {count} songs, song {song} does not exist")]
    NoSuchSong { song: u8, count: u8 },

    /// Square-channel swapping needs at least the two square channels
    #[error("Channel swapping requires two square channels, the module declares {channels}")]
    TooFewChannels { channels: u8 },
}
