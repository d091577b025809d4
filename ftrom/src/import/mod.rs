//! The import pipeline: slot assignment, bank packing and table patching

mod module_info;

pub use module_info::{EngineKind, ImportedModuleInfo};

use crate::{
    buffer::{BufferError, ByteCursor},
    ftm::FtmError,
    layout::{BankData, BankRange, EngineLayout, RomLayout},
    module::{ByIdentity, Module, Song},
    rom::{RomAccess, RomError},
    tag::Tag,
};
use log::{debug, info};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    rc::Rc,
};
use thiserror::Error;

/// The primary-map entry for a slot with no song assigned
const EMPTY_ENTRY: (u8, u8) = (0x00, 0xFF);

/// The module-address table value for empty and builtin slots
const EMPTY_MODULE_ADDR: u16 = 0;

/// Song assignments for one secondary map, keyed by slot within that map
pub struct SecondaryAssignment {
    /// Names a [`SongMapInfo`](crate::layout::SongMapInfo) in the layout
    pub name: String,
    pub songs: BTreeMap<usize, Option<Rc<Song>>>,
}

/// One import run: places modules into banks and patches the song tables
///
/// An importer is built against a ROM and a game layout, run once with
/// [`Importer::import()`], and then discarded. All failures are terminal;
/// the ROM may have received some writes before a failure, so a caller that
/// needs atomicity should import into a scratch copy.
pub struct Importer<'a, R: RomAccess> {
    rom: &'a mut R,
    layout: &'a RomLayout,
    /// Slot -> assigned song; starts as a copy of the primary map and grows
    /// as secondary-only songs claim free slots
    song_map: BTreeMap<usize, Option<Rc<Song>>>,
    /// Song identity -> primary slot (or the song's own number, for builtins)
    song_indices: HashMap<ByIdentity<Song>, usize>,
    infos: Vec<ImportedModuleInfo>,
    info_by_module: HashMap<ByIdentity<Module>, usize>,
    /// Staged bank buffers, keyed by bank index
    banks: BTreeMap<usize, BankData>,
    /// Leftover free ranges per engine, carried between packer runs
    free_ranges: HashMap<Tag, VecDeque<BankRange>>,
    /// Pre-import ROM snapshot, taken when builtin songs or source-bank
    /// layouts need it
    original: Option<Vec<u8>>,
}

impl<'a, R: RomAccess> Importer<'a, R> {
    pub fn new(rom: &'a mut R, layout: &'a RomLayout) -> Self {
        Self {
            rom,
            layout,
            song_map: BTreeMap::new(),
            song_indices: HashMap::new(),
            infos: Vec::new(),
            info_by_module: HashMap::new(),
            banks: BTreeMap::new(),
            free_ranges: HashMap::new(),
            original: None,
        }
    }

    /// Import every assigned song into the ROM
    ///
    /// `primary` assigns songs to the primary slots `0..primary.len()`;
    /// [`None`] leaves a slot empty. Each [`SecondaryAssignment`] fills one of
    /// the layout's secondary maps. Songs appearing only in secondary maps
    /// claim primary slots from the layout's free-slot pool.
    ///
    /// Builtin (module-less) songs must be assigned to the slots they
    /// originally occupy: the importer preserves the original ROM's entry at
    /// the assigned slot verbatim.
    pub fn import(
        mut self,
        primary: &[Option<Rc<Song>>],
        secondary: &[SecondaryAssignment],
    ) -> Result<(), ImportError> {
        if primary.len() > self.layout.num_songs {
            return Err(ImportError::PrimaryMapTooLarge {
                len: primary.len(),
                num_songs: self.layout.num_songs,
            });
        }

        self.create_song_index_map(primary, secondary)?;
        self.create_imported_module_infos()?;

        // Builtin slots and source-bank layouts both read the pre-import
        // image; take the snapshot before any write so an unsupported ROM
        // fails the run up front.
        let needs_snapshot = primary.iter().flatten().any(|song| song.is_builtin())
            || self.infos.iter().any(|module_info| {
                self.layout
                    .engine(&module_info.module().engine)
                    .is_some_and(|engine| engine.bank_layout.source_bank().is_some())
            });
        if needs_snapshot {
            self.original = Some(self.rom.rom()?);
        }

        let layout = self.layout;
        let mut free_banks: VecDeque<usize> = layout.free_banks.iter().copied().collect();

        let mut by_engine: BTreeMap<Tag, Vec<usize>> = BTreeMap::new();
        for (index, module_info) in self.infos.iter().enumerate() {
            by_engine
                .entry(module_info.module().engine.clone())
                .or_default()
                .push(index);
        }

        for (engine, working) in by_engine {
            let engine_layout = layout
                .engine(&engine)
                .ok_or_else(|| ImportError::UnknownEngine {
                    engine: engine.clone(),
                })?;
            self.import_engine_modules(&engine, engine_layout, working, &mut free_banks)?;
        }

        self.write_primary_song_map()?;

        for assignment in secondary {
            self.write_secondary_map(assignment)?;
        }

        self.finalize_banks()
    }

    /// Assign every song a primary slot
    ///
    /// Primary songs get their explicit slot. Module-backed songs appearing
    /// only in secondary maps draw a slot from the free-slot pool, largest
    /// index first; builtin secondary songs are indexed by their own number
    /// and never enter the song map.
    fn create_song_index_map(
        &mut self,
        primary: &[Option<Rc<Song>>],
        secondary: &[SecondaryAssignment],
    ) -> Result<(), ImportError> {
        let mut free_slots = self.layout.free_slots.clone();

        for (slot, song) in primary.iter().enumerate() {
            self.song_map.insert(slot, song.clone());
            if let Some(song) = song {
                self.song_indices.insert(ByIdentity(song.clone()), slot);
                free_slots.remove(&slot);
            }
        }

        for assignment in secondary {
            for song in assignment.songs.values().flatten() {
                let key = ByIdentity(song.clone());
                if self.song_indices.contains_key(&key) {
                    continue;
                }

                if song.is_builtin() {
                    self.song_indices.insert(key, song.number as usize);
                } else {
                    let slot = free_slots.pop_last().ok_or(ImportError::OutOfSlots)?;
                    debug!("song \"{}\" claims free slot {slot}", song.title);
                    self.song_indices.insert(key, slot);
                    self.song_map.insert(slot, Some(song.clone()));
                }
            }
        }

        Ok(())
    }

    /// Build one placement record per module instance being imported
    fn create_imported_module_infos(&mut self) -> Result<(), ImportError> {
        for (slot, song) in &self.song_map {
            let Some(song) = song else { continue };
            let Some(module) = &song.module else { continue };

            let key = ByIdentity(module.clone());
            let index = match self.info_by_module.get(&key) {
                Some(&index) => index,
                None => {
                    let engine_layout = self.layout.engine(&module.engine).ok_or_else(|| {
                        ImportError::UnknownEngine {
                            engine: module.engine.clone(),
                        }
                    })?;

                    let bank_size = engine_layout.bank_layout.bank_size();
                    if module.len() > bank_size {
                        return Err(ImportError::ModuleTooLarge {
                            title: module.title.clone(),
                            size: module.len(),
                            bank_size,
                        });
                    }

                    let kind =
                        EngineKind::from_label(module.engine.as_str(), engine_layout.channels)
                            .ok_or_else(|| ImportError::UnknownEngine {
                                engine: module.engine.clone(),
                            })?;

                    self.infos.push(ImportedModuleInfo::new(module.clone(), kind));
                    self.info_by_module.insert(key, self.infos.len() - 1);
                    self.infos.len() - 1
                }
            };

            self.infos[index].add_song(song.clone(), *slot);
        }

        Ok(())
    }

    /// Pack one engine's modules into that engine's banks
    ///
    /// Modules are placed largest first, each at the high end of the current
    /// free range, so the low end stays contiguous for smaller modules and
    /// later fragments. Free ranges are consumed front to back, refilled from
    /// the shared free-bank pool; a leftover fragment big enough to keep is
    /// re-queued for future runs.
    fn import_engine_modules(
        &mut self,
        engine: &Tag,
        engine_layout: &EngineLayout,
        mut working: Vec<usize>,
        free_banks: &mut VecDeque<usize>,
    ) -> Result<(), ImportError> {
        let bank_layout = &engine_layout.bank_layout;
        let primary_square_channel = self.layout.primary_square_channel;
        let min_keepable_remainder = self.layout.min_keepable_remainder;

        let module_count = working.len();

        // Size-descending; the sort is stable, so equal sizes keep their
        // original order and are taken first come, first placed
        working.sort_by(|&a, &b| self.infos[b].size().cmp(&self.infos[a].size()));

        let mut free_ranges = self.free_ranges.remove(engine).unwrap_or_default();
        let mut kept_remainders = Vec::new();

        while !working.is_empty() {
            let range = match free_ranges.pop_front() {
                Some(range) => range,
                None => {
                    // Claim a fresh bank and queue up its free ranges
                    let Some(bank) = free_banks.pop_front() else { break };
                    for free in bank_layout.free_ranges() {
                        free_ranges.push_back(BankRange {
                            bank,
                            start: free.start,
                            end: free.end,
                        });
                    }
                    match free_ranges.pop_front() {
                        Some(range) => range,
                        None => break,
                    }
                }
            };

            let mut bytes_left = range.len();
            let base_addr = bank_layout.bank_base_addr() + range.start as u16;
            let bank = self
                .banks
                .entry(range.bank)
                .or_insert_with(|| BankData::new(engine.clone(), bank_layout.bank_size()));

            // Fill the range: the largest module that still fits, placed at
            // the high end of what remains
            loop {
                let next = working.partition_point(|&index| self.infos[index].size() > bytes_left);
                if next == working.len() {
                    break;
                }

                let index = working.remove(next);
                let size = self.infos[index].size();
                let offset = bytes_left - size;
                let address = base_addr + offset as u16;

                let data = self.infos[index].get_data(address, primary_square_channel)?;
                bank.bytes[range.start + offset..range.start + offset + size]
                    .copy_from_slice(&data);
                self.infos[index].place(range.bank, address);

                debug!(
                    "module \"{}\" ({size:#x} bytes) -> bank {}, {address:#06x}",
                    self.infos[index].module().title,
                    range.bank
                );

                bytes_left = offset;
            }

            if bytes_left >= min_keepable_remainder {
                kept_remainders.push(BankRange {
                    bank: range.bank,
                    start: range.start,
                    end: range.start + bytes_left,
                });
            }
        }

        if !working.is_empty() {
            return Err(ImportError::RomFull {
                engine: engine.clone(),
                unplaced: working.len(),
            });
        }

        info!(
            "placed {module_count} \"{engine}\" modules across {} staged banks",
            self.banks.len()
        );

        free_ranges.extend(kept_remainders);
        self.free_ranges.insert(engine.clone(), free_ranges);
        Ok(())
    }

    /// Patch the primary song map and the module load-address table
    fn write_primary_song_map(&mut self) -> Result<(), ImportError> {
        let Some(&max_slot) = self.song_map.keys().next_back() else {
            return Ok(());
        };

        let mut addresses = ByteCursor::new(vec![0; 2 * (max_slot + 1)]);

        for slot in 0..=max_slot {
            let offset = self.layout.song_map_offset + 2 * slot;

            match self.song_map.get(&slot).and_then(|song| song.as_ref()) {
                None => {
                    let (bank_byte, song_byte) = EMPTY_ENTRY;
                    self.rom
                        .write_byte(offset, bank_byte, &format!("song map: slot {slot} empty"))?;
                    self.rom
                        .write_byte(offset + 1, song_byte, &format!("song map: slot {slot} empty"))?;
                    addresses.write_u16_le(EMPTY_MODULE_ADDR)?;
                }
                Some(song) => match &song.module {
                    // Builtin: put the original ROM's entry back
                    None => {
                        let original = self.original.as_ref().ok_or(RomError::Unsupported)?;
                        let comment = format!("song map: slot {slot} keeps \"{}\"", song.title);
                        for index in 0..2 {
                            let byte = original.get(offset + index).copied().ok_or(
                                RomError::OutOfRange {
                                    offset: offset + index,
                                    length: 1,
                                    size: original.len(),
                                },
                            )?;
                            self.rom.write_byte(offset + index, byte, &comment)?;
                        }
                        addresses.write_u16_le(EMPTY_MODULE_ADDR)?;
                    }
                    Some(module) => {
                        let info = &self.infos[self.info_by_module[&ByIdentity(module.clone())]];
                        let (bank_byte, song_byte) = info
                            .song_map_entry(slot)
                            .expect("modules are placed before the song map is written");
                        let comment = format!("song map: slot {slot} plays \"{}\"", song.title);
                        self.rom.write_byte(offset, bank_byte, &comment)?;
                        self.rom.write_byte(offset + 1, song_byte, &comment)?;
                        addresses.write_u16_le(
                            info.address()
                                .expect("modules are placed before the song map is written"),
                        )?;
                    }
                },
            }
        }

        self.rom.write_block(
            self.layout.module_addr_table_offset,
            addresses.as_slice(),
            "module address table",
        )?;
        Ok(())
    }

    /// Patch one secondary map: each entry redirects to a primary slot
    fn write_secondary_map(&mut self, assignment: &SecondaryAssignment) -> Result<(), ImportError> {
        let map = self
            .layout
            .secondary_map(&assignment.name)
            .ok_or_else(|| ImportError::UnknownSecondaryMap {
                name: assignment.name.clone(),
            })?;

        for (&slot, song) in &assignment.songs {
            if slot >= map.length {
                return Err(ImportError::SecondarySlotOutOfRange {
                    name: map.name.clone(),
                    slot,
                    length: map.length,
                });
            }

            let (value, comment) = match song {
                Some(song) => {
                    let index = self
                        .song_indices
                        .get(&ByIdentity(song.clone()))
                        .copied()
                        .expect("secondary songs are indexed before maps are written");
                    (
                        index as u8,
                        format!("{} map: slot {slot} plays \"{}\"", map.name, song.title),
                    )
                }
                None => (map.empty_index, format!("{} map: slot {slot} empty", map.name)),
            };

            self.rom.write_byte(map.offset + slot, value, &comment)?;
        }

        Ok(())
    }

    /// Overlay preserved regions and write every staged bank to the ROM
    fn finalize_banks(&mut self) -> Result<(), ImportError> {
        for (&index, bank) in &mut self.banks {
            let engine_layout =
                self.layout
                    .engine(&bank.engine)
                    .ok_or_else(|| ImportError::UnknownEngine {
                        engine: bank.engine.clone(),
                    })?;
            let bank_layout = &engine_layout.bank_layout;

            if let Some(source_bank) = bank_layout.source_bank() {
                // Copy ranges hold the pre-import bytes, untouched by
                // anything this run wrote
                let original = self.original.as_ref().ok_or(RomError::Unsupported)?;
                let source_offset =
                    source_bank * bank_layout.bank_size() + self.layout.header_offset;

                for range in bank_layout.copy_ranges() {
                    let source = original
                        .get(source_offset + range.start..source_offset + range.end)
                        .ok_or(RomError::OutOfRange {
                            offset: source_offset + range.start,
                            length: range.end - range.start,
                            size: original.len(),
                        })?;
                    bank.bytes[range.clone()].copy_from_slice(source);
                }
            }

            self.rom.write_block(
                index * bank_layout.bank_size() + self.layout.header_offset,
                &bank.bytes,
                &format!("music bank {index}"),
            )?;
        }

        Ok(())
    }
}

/// Errors that might occur during an import run
#[derive(Debug, Error)]
pub enum ImportError {
    /// The packer could not place every module
    #[error("Not enough free ROM space for all \"{engine}\" modules ({unplaced} left over)")]
    RomFull { engine: Tag, unplaced: usize },

    /// A secondary map needed a primary slot but the free-slot pool ran dry
    #[error("The free primary-slot pool is exhausted")]
    OutOfSlots,

    /// A module's engine label has no layout, or names no known engine
    #[error("No engine layout for \"{engine}\"")]
    UnknownEngine { engine: Tag },

    /// A module that cannot fit any bank of its engine
    #[error("Module \"{title}\" ({size:#x} bytes) exceeds the bank size ({bank_size:#x} bytes)")]
    ModuleTooLarge {
        title: String,
        size: usize,
        bank_size: usize,
    },

    /// More primary assignments than the game has song slots
    #[error("{len} primary assignments exceed the {num_songs}-entry song map")]
    PrimaryMapTooLarge { len: usize, num_songs: usize },

    /// A secondary assignment naming no map in the layout
    #[error("No secondary song map named \"{name}\" in the layout")]
    UnknownSecondaryMap { name: String },

    /// A secondary assignment outside its map
    #[error("Slot {slot} is outside the {length}-entry \"{name}\" map")]
    SecondarySlotOutOfRange {
        name: String,
        slot: usize,
        length: usize,
    },

    #[error("Patching the ROM failed")]
    Rom(#[from] RomError),

    #[error("Transforming a module failed")]
    Ftm(#[from] FtmError),

    #[error("Building a ROM table failed")]
    Buffer(#[from] BufferError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ftm::tests::build_module,
        layout::{BankLayout, SongMapInfo},
        module::{Module, Song},
        rom::RomBuffer,
        tag::TagSet,
    };
    use std::collections::BTreeSet;

    const SONG_MAP_OFFS: usize = 0x4010;
    const SONG_MOD_ADDR_TBL_OFFS: usize = 0x4090;
    const ROM_SIZE: usize = 0x8010;

    fn layout(free_ranges: Vec<std::ops::Range<usize>>, source_bank: Option<usize>) -> RomLayout {
        let bank_layout = BankLayout::new(0x8000, 0x2000, free_ranges, source_bank).unwrap();
        RomLayout {
            num_songs: 32,
            song_map_offset: SONG_MAP_OFFS,
            module_addr_table_offset: SONG_MOD_ADDR_TBL_OFFS,
            primary_square_channel: 0,
            free_slots: BTreeSet::new(),
            free_banks: vec![0, 1],
            engines: [(
                Tag::new("ft"),
                EngineLayout {
                    bank_layout,
                    channels: 5,
                },
            )]
            .into(),
            secondary_maps: vec![SongMapInfo {
                name: "boss".into(),
                offset: 0x5000,
                length: 4,
                empty_index: 0xFF,
            }],
            header_offset: 16,
            min_keepable_remainder: 64,
        }
    }

    fn module(base: u16, size: usize) -> Rc<Module> {
        Rc::new(Module::new(
            Tag::new("ft"),
            format!("MOD {size:#06x}"),
            base,
            build_module(base, size),
        ))
    }

    fn song(number: u8, module: &Rc<Module>) -> Rc<Song> {
        Rc::new(Song {
            number,
            module: Some(module.clone()),
            enabled: true,
            streaming_safe: true,
            primary_square_channel: 0,
            uses: TagSet::new(),
            title: format!("SONG {number}"),
            author: None,
        })
    }

    fn rom() -> RomBuffer {
        RomBuffer::new((0..ROM_SIZE).map(|index| index as u8).collect())
    }

    #[test]
    fn empty_slot_writes_empty_entries() {
        let layout = layout(vec![], None);
        let mut rom = rom();
        let before = rom.rom().unwrap();

        Importer::new(&mut rom, &layout)
            .import(&[None], &[])
            .unwrap();

        let bytes = rom.as_slice();
        assert_eq!(&bytes[SONG_MAP_OFFS..SONG_MAP_OFFS + 2], &[0x00, 0xFF]);
        assert_eq!(
            &bytes[SONG_MOD_ADDR_TBL_OFFS..SONG_MOD_ADDR_TBL_OFFS + 2],
            &[0x00, 0x00]
        );

        // No banks were staged, so nothing else changed
        let mut expected = before;
        expected[SONG_MAP_OFFS] = 0x00;
        expected[SONG_MAP_OFFS + 1] = 0xFF;
        expected[SONG_MOD_ADDR_TBL_OFFS] = 0x00;
        expected[SONG_MOD_ADDR_TBL_OFFS + 1] = 0x00;
        assert_eq!(bytes, &expected[..]);
    }

    #[test]
    fn single_module_lands_at_the_top_of_the_bank() {
        let layout = layout(vec![], None);
        let mut rom = rom();

        let module = module(0x8001, 0x100);
        let mut primary = vec![None; 8];
        primary[7] = Some(song(0, &module));

        Importer::new(&mut rom, &layout).import(&primary, &[]).unwrap();

        let bytes = rom.as_slice();

        // Bank 0, address 0x8000 + 0x2000 - 0x100 = 0x9F00
        assert_eq!(
            &bytes[SONG_MAP_OFFS + 14..SONG_MAP_OFFS + 16],
            &[0xFF, 0x00]
        );
        assert_eq!(
            &bytes[SONG_MOD_ADDR_TBL_OFFS + 14..SONG_MOD_ADDR_TBL_OFFS + 16],
            &[0x00, 0x9F]
        );

        // The staged bank holds the rebased image at its top, zeros below
        let bank = &bytes[16..16 + 0x2000];
        assert_eq!(&bank[0x1F00..], &build_module(0x9F00, 0x100)[..]);
        assert!(bank[..0x1F00].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn packs_largest_first_from_the_high_end() {
        let layout = layout(vec![], None);
        let mut rom = rom();

        let large = module(0x8000, 0x1800);
        let medium = module(0x8000, 0x400);
        let small = module(0x8000, 0x300);
        let primary = vec![
            Some(song(0, &large)),
            Some(song(0, &medium)),
            Some(song(0, &small)),
        ];

        Importer::new(&mut rom, &layout).import(&primary, &[]).unwrap();

        // 0x1800 at 0x8800, 0x400 at 0x8400, 0x300 at 0x8100
        let table = &rom.as_slice()[SONG_MOD_ADDR_TBL_OFFS..];
        assert_eq!(&table[0..2], &[0x00, 0x88]);
        assert_eq!(&table[2..4], &[0x00, 0x84]);
        assert_eq!(&table[4..6], &[0x00, 0x81]);
    }

    #[test]
    fn equal_sizes_place_in_assignment_order() {
        let layout = layout(vec![], None);
        let mut rom = rom();

        let first = module(0x8000, 0x300);
        let second = module(0x8000, 0x300);
        let primary = vec![Some(song(0, &first)), Some(song(0, &second))];

        Importer::new(&mut rom, &layout).import(&primary, &[]).unwrap();

        // The first-assigned module takes the higher address
        let table = &rom.as_slice()[SONG_MOD_ADDR_TBL_OFFS..];
        assert_eq!(&table[0..2], &[0x00, 0x9D]);
        assert_eq!(&table[2..4], &[0x00, 0x9A]);
    }

    #[test]
    fn builtin_slots_keep_the_original_entry() {
        let layout = layout(vec![], None);
        let mut rom = rom();
        rom.write_byte(SONG_MAP_OFFS + 4, 0xAB, "fixture").unwrap();
        rom.write_byte(SONG_MAP_OFFS + 5, 0x05, "fixture").unwrap();

        let primary = vec![None, None, Some(Rc::new(Song::builtin(2, "KEPT")))];
        Importer::new(&mut rom, &layout).import(&primary, &[]).unwrap();

        let bytes = rom.as_slice();
        assert_eq!(&bytes[SONG_MAP_OFFS + 4..SONG_MAP_OFFS + 6], &[0xAB, 0x05]);
        assert_eq!(
            &bytes[SONG_MOD_ADDR_TBL_OFFS + 4..SONG_MOD_ADDR_TBL_OFFS + 6],
            &[0x00, 0x00]
        );
    }

    #[test]
    fn secondary_map_redirects_to_primary_slots() {
        let layout = layout(vec![], None);
        let mut rom = rom();

        let module_a = module(0x8000, 0x100);
        let module_b = module(0x8000, 0x100);
        let song_a = song(0, &module_a);
        let song_b = song(0, &module_b);

        let mut primary = vec![None; 6];
        primary[3] = Some(song_a.clone());
        primary[5] = Some(song_b.clone());

        let secondary = SecondaryAssignment {
            name: "boss".into(),
            songs: [
                (0, Some(song_a.clone())),
                (1, None),
                (2, Some(song_b)),
                (3, Some(song_a)),
            ]
            .into(),
        };

        Importer::new(&mut rom, &layout)
            .import(&primary, &[secondary])
            .unwrap();

        assert_eq!(
            &rom.as_slice()[0x5000..0x5004],
            &[0x03, 0xFF, 0x05, 0x03]
        );
    }

    #[test]
    fn secondary_only_songs_claim_free_slots_descending() {
        let mut layout = layout(vec![], None);
        layout.free_slots = [29, 30, 31].into();
        let mut rom = rom();

        let module = module(0x8000, 0x100);
        let secondary = SecondaryAssignment {
            name: "boss".into(),
            songs: [(0, Some(song(1, &module)))].into(),
        };

        Importer::new(&mut rom, &layout).import(&[], &[secondary]).unwrap();

        let bytes = rom.as_slice();
        // The song claimed slot 31 (the largest free slot)
        assert_eq!(bytes[0x5000], 31);
        assert_eq!(
            &bytes[SONG_MAP_OFFS + 62..SONG_MAP_OFFS + 64],
            &[0xFF, 0x01]
        );
        // Unassigned slots below it are written out as empty
        assert_eq!(&bytes[SONG_MAP_OFFS..SONG_MAP_OFFS + 2], &[0x00, 0xFF]);
    }

    #[test]
    fn out_of_slots() {
        let layout = layout(vec![], None);
        let mut rom = rom();

        let module = module(0x8000, 0x100);
        let secondary = SecondaryAssignment {
            name: "boss".into(),
            songs: [(0, Some(song(0, &module)))].into(),
        };

        let result = Importer::new(&mut rom, &layout).import(&[], &[secondary]);
        assert!(matches!(result, Err(ImportError::OutOfSlots)));
    }

    #[test]
    fn rom_full() {
        let mut layout = layout(vec![], None);
        layout.free_banks = vec![0];
        let mut rom = rom();

        let first = module(0x8000, 0x1800);
        let second = module(0x8000, 0x1800);
        let primary = vec![Some(song(0, &first)), Some(song(0, &second))];

        let result = Importer::new(&mut rom, &layout).import(&primary, &[]);
        assert!(matches!(
            result,
            Err(ImportError::RomFull { unplaced: 1, .. })
        ));
    }

    #[test]
    fn source_bank_regions_survive_the_import() {
        let layout = layout(vec![0x100..0x1000], Some(0));
        let mut rom = rom();
        let original = rom.rom().unwrap();

        let module = module(0x8000, 0x200);
        let primary = vec![Some(song(0, &module))];

        Importer::new(&mut rom, &layout).import(&primary, &[]).unwrap();

        let bytes = rom.as_slice();
        let bank = &bytes[16..16 + 0x2000];
        let source = &original[16..16 + 0x2000];

        // Copy ranges hold the original bank bytes
        assert_eq!(&bank[..0x100], &source[..0x100]);
        assert_eq!(&bank[0x1000..], &source[0x1000..]);

        // The module sits at the high end of the free range: 0x1000 - 0x200
        assert_eq!(&bank[0xE00..0x1000], &build_module(0x8E00, 0x200)[..]);

        // The unused part of the free range is zeroed
        assert!(bank[0x100..0xE00].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn module_exceeding_the_bank_fails() {
        let mut layout = layout(vec![], None);
        layout
            .engines
            .insert(
                Tag::new("ft"),
                EngineLayout {
                    bank_layout: BankLayout::new(0x8000, 0x80, vec![], None).unwrap(),
                    channels: 5,
                },
            );
        let mut rom = rom();

        let module = module(0x8000, 0x100);
        let result = Importer::new(&mut rom, &layout).import(&[Some(song(0, &module))], &[]);
        assert!(matches!(result, Err(ImportError::ModuleTooLarge { .. })));
    }

    #[test]
    fn unknown_engine_fails() {
        let layout = layout(vec![], None);
        let mut rom = rom();

        let module = Rc::new(Module::new(Tag::new("vrc6"), "ODD", 0x8000, vec![0; 0x50]));
        let result = Importer::new(&mut rom, &layout).import(&[Some(song(0, &module))], &[]);
        assert!(matches!(result, Err(ImportError::UnknownEngine { .. })));
    }

    /// A ROM that records writes but cannot be read back
    struct WriteOnlyRom {
        writes: usize,
    }

    impl RomAccess for WriteOnlyRom {
        fn rom(&self) -> Result<Vec<u8>, RomError> {
            Err(RomError::Unsupported)
        }

        fn write_byte(&mut self, _: usize, _: u8, _: &str) -> Result<(), RomError> {
            self.writes += 1;
            Ok(())
        }

        fn write_block(&mut self, _: usize, _: &[u8], _: &str) -> Result<(), RomError> {
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn builtin_without_readback_fails_before_any_write() {
        let layout = layout(vec![], None);
        let mut rom = WriteOnlyRom { writes: 0 };

        let primary = vec![Some(Rc::new(Song::builtin(0, "KEPT")))];
        let result = Importer::new(&mut rom, &layout).import(&primary, &[]);

        assert!(matches!(result, Err(ImportError::Rom(RomError::Unsupported))));
        assert_eq!(rom.writes, 0);
    }

    #[test]
    fn source_bank_without_readback_fails_before_any_write() {
        let layout = layout(vec![0x100..0x1000], Some(0));
        let mut rom = WriteOnlyRom { writes: 0 };

        let module = module(0x8000, 0x200);
        let result = Importer::new(&mut rom, &layout).import(&[Some(song(0, &module))], &[]);

        assert!(matches!(result, Err(ImportError::Rom(RomError::Unsupported))));
        assert_eq!(rom.writes, 0);
    }

    #[test]
    fn copy_ranges_restore_pre_import_bytes_over_run_writes() {
        let mut layout = layout(vec![0x100..0x1000], Some(0));
        // A secondary map living inside the preserved region of bank 0
        layout.secondary_maps[0].offset = 0x20;
        let mut rom = rom();
        let original = rom.rom().unwrap();

        let module = module(0x8000, 0x200);
        let song = song(0, &module);
        let secondary = SecondaryAssignment {
            name: "boss".into(),
            songs: [(0, Some(song.clone()))].into(),
        };

        Importer::new(&mut rom, &layout)
            .import(&[Some(song)], &[secondary])
            .unwrap();

        // The secondary entry landed in a copy range; the written bank
        // carries the original byte, not the slot index
        assert_eq!(rom.as_slice()[0x20], original[0x20]);
    }

    #[test]
    fn modules_import_fine_without_readback() {
        let layout = layout(vec![], None);
        let mut rom = WriteOnlyRom { writes: 0 };

        let module = module(0x8000, 0x100);
        Importer::new(&mut rom, &layout)
            .import(&[Some(song(0, &module))], &[])
            .unwrap();

        assert!(rom.writes > 0);
    }
}
