//! Music modules and the songs that live in them

use crate::tag::{Tag, TagSet};
use std::{
    hash::{Hash, Hasher},
    rc::Rc,
};

/// A self-contained block of music data consumed by one engine
///
/// A module holds the raw bytes exactly as the tracker exported them,
/// anchored at the address they expect to be loaded at. Modules are immutable
/// and shared: every [`Song`] that lives in a module holds a reference to the
/// same instance, and the importer transforms a *copy* of the bytes when it
/// relocates the module into the ROM.
#[derive(Debug)]
pub struct Module {
    /// The runtime driver that interprets this data, e.g. `"ft"`
    pub engine: Tag,
    pub title: String,
    /// The address the raw bytes expect to be loaded at
    pub base_address: u16,
    data: Vec<u8>,
}

impl Module {
    pub fn new(engine: Tag, title: impl Into<String>, base_address: u16, data: Vec<u8>) -> Self {
        Self {
            engine,
            title: title.into(),
            base_address,
            data,
        }
    }

    /// The module bytes as exported, anchored at [`Module::base_address`]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The size of the module in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One selectable song
///
/// A song either lives in a [`Module`] that is being imported, or is a
/// *builtin*: a track the ROM already contains, marked by `module` being
/// [`None`]. Optional per-song metadata is resolved against file and group
/// defaults when the library is materialized, so a constructed [`Song`]
/// always carries concrete values.
#[derive(Debug)]
pub struct Song {
    /// Index of the song within its module; 0 for single-song modules
    pub number: u8,
    /// The module the song lives in; [`None`] marks a builtin song
    pub module: Option<Rc<Module>>,
    pub enabled: bool,
    pub streaming_safe: bool,
    /// Which square channel (0 or 1) carries the melody in this song
    pub primary_square_channel: u8,
    /// Labels describing where the song fits, e.g. `"overworld"`, `"boss"`
    pub uses: TagSet,
    pub title: String,
    pub author: Option<String>,
}

impl Song {
    /// A song the ROM already contains
    ///
    /// Builtin songs have no module to import; the primary song map keeps the
    /// original ROM's entry for their slot.
    pub fn builtin(number: u8, title: impl Into<String>) -> Self {
        Self {
            number,
            module: None,
            enabled: true,
            streaming_safe: true,
            primary_square_channel: 0,
            uses: TagSet::new(),
            title: title.into(),
            author: None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.module.is_none()
    }
}

/// An [`Rc`] that compares and hashes by allocation, not by content
///
/// Modules and songs are keyed by object identity: two modules with identical
/// bytes are still two distinct modules, each placed on its own.
#[derive(Debug)]
pub(crate) struct ByIdentity<T>(pub Rc<T>);

impl<T> Clone for ByIdentity<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> PartialEq for ByIdentity<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for ByIdentity<T> {}

impl<T> Hash for ByIdentity<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}
