//! Import FamiTracker music modules into NES ROM images
//!
//! Games that drive their music through a FamiTracker-family engine look
//! songs up through a handful of ROM-resident tables: a primary song map
//! (bank + module-internal song number per slot), a module load-address
//! table, and optional secondary maps redirecting per-scenario indices to
//! primary slots. This crate places user-supplied modules into the free
//! space of the ROM's banks, rewrites each module's internal pointers for
//! its final address, optionally swaps its square channels to match the
//! target game, and patches those tables so the game finds the new tracks.
//!
//! The pieces:
//!
//! * [`library`] — the JSON song library with embedded module payloads
//! * [`layout`] — bank geometry and table offsets for a target game
//! * [`import`] — the packing and table-patching pipeline
//! * [`rom`] — the contract through which all ROM I/O happens

pub mod buffer;
pub mod ftm;
pub mod import;
pub mod layout;
pub mod library;
pub mod module;
pub mod rom;
pub mod tag;
