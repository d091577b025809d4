//! Placement records for modules on their way into the ROM

use crate::{
    ftm::{FtmBinary, FtmError},
    module::{Module, Song},
};
use std::{collections::BTreeMap, rc::Rc};

/// Which runtime driver interprets a module's data
///
/// A closed set: adding an engine means adding a variant and teaching
/// [`ImportedModuleInfo`] how to transform and index its modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// The FamiTracker NES driver
    FamiTracker { channels: u8 },
}

impl EngineKind {
    /// The engine kind behind a label, if the label names a known engine
    pub fn from_label(label: &str, channels: u8) -> Option<Self> {
        if label.eq_ignore_ascii_case("ft") {
            Some(Self::FamiTracker { channels })
        } else {
            None
        }
    }
}

/// A module being imported: which songs it carries, and where it ended up
///
/// Created unplaced; the packer assigns a bank and address, after which the
/// final byte image and song-map entries can be produced. One record exists
/// per module *instance* (keyed by identity), shared by all of its songs.
pub struct ImportedModuleInfo {
    module: Rc<Module>,
    kind: EngineKind,
    songs: Vec<Rc<Song>>,
    bank: Option<usize>,
    address: Option<u16>,
    /// Primary slot index -> module-internal song number
    song_indices: BTreeMap<usize, u8>,
}

impl ImportedModuleInfo {
    pub(crate) fn new(module: Rc<Module>, kind: EngineKind) -> Self {
        Self {
            module,
            kind,
            songs: Vec::new(),
            bank: None,
            address: None,
            song_indices: BTreeMap::new(),
        }
    }

    pub fn module(&self) -> &Rc<Module> {
        &self.module
    }

    /// The size of the final byte image; transforms are length-preserving
    pub fn size(&self) -> usize {
        self.module.len()
    }

    /// The bank the packer placed this module in
    pub fn bank(&self) -> Option<usize> {
        self.bank
    }

    /// The address the packer placed this module at
    pub fn address(&self) -> Option<u16> {
        self.address
    }

    pub fn song_indices(&self) -> &BTreeMap<usize, u8> {
        &self.song_indices
    }

    /// Record that `song` occupies primary slot `slot`
    pub(crate) fn add_song(&mut self, song: Rc<Song>, slot: usize) {
        self.song_indices.insert(slot, song.number);
        if !self.songs.iter().any(|known| Rc::ptr_eq(known, &song)) {
            self.songs.push(song);
        }
    }

    pub(crate) fn place(&mut self, bank: usize, address: u16) {
        self.bank = Some(bank);
        self.address = Some(address);
    }

    /// Produce the module's final byte image for its assigned address
    ///
    /// The module's own bytes are never touched; the transform works on a
    /// copy. For FamiTracker modules, every imported song whose primary
    /// square channel differs from the game's gets its squares swapped, and
    /// the image is rebased when the address differs from the export base.
    pub fn get_data(&self, address: u16, primary_square_channel: u8) -> Result<Vec<u8>, FtmError> {
        match self.kind {
            EngineKind::FamiTracker { channels } => {
                let mut binary =
                    FtmBinary::new(self.module.data().to_vec(), self.module.base_address, channels);

                for song in &self.songs {
                    if song.primary_square_channel != primary_square_channel {
                        binary.swap_square_channels(song.number)?;
                    }
                }

                if address != self.module.base_address {
                    binary.rebase(address)?;
                }

                Ok(binary.into_bytes())
            }
        }
    }

    /// The primary song map entry for one of this module's slots
    ///
    /// [`None`] until the packer has placed the module.
    pub fn song_map_entry(&self, slot: usize) -> Option<(u8, u8)> {
        let song = self.song_indices.get(&slot).copied()?;
        match self.kind {
            // The driver selects banks through a one's-complement index
            EngineKind::FamiTracker { .. } => Some((self.bank? as u8 ^ 0xFF, song)),
        }
    }
}
