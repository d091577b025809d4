//! The JSON song library and its embedded module payloads

use crate::{
    module::{Module, Song},
    tag::{Tag, TagSet},
};
use base64::{engine::general_purpose, Engine as _};
use flate2::read::DeflateDecoder;
use serde::{Deserialize, Deserializer};
use std::{fs, io, io::Read, path::Path, rc::Rc};
use thiserror::Error;

/// Module payloads with this prefix hold deflate-compressed bytes
const DEFLATE_PREFIX: &str = "deflate:";

const DEFAULT_ENGINE: &str = "ft";

/// A library of importable music
///
/// Libraries are hand-maintained JSON files: standalone modules under
/// `single`, plus `groups` of related modules (one game's soundtrack, say)
/// sharing default metadata. Each module's binary payload is embedded as
/// base64, optionally deflate-compressed.
#[derive(Debug, Deserialize)]
pub struct Library {
    #[serde(default)]
    pub single: Vec<FileInfo>,
    #[serde(default)]
    pub groups: Vec<GroupInfo>,
}

/// One module file in the library
#[derive(Debug, Deserialize)]
pub struct FileInfo {
    pub title: String,
    pub author: Option<String>,
    pub enabled: Option<bool>,
    pub streaming_safe: Option<bool>,
    pub primary_square_chan: Option<u8>,
    pub uses: Option<Vec<Tag>>,
    /// The engine that plays this module; `"ft"` when absent
    pub engine: Option<Tag>,
    /// The address the module bytes expect to be loaded at; an integer or a
    /// `"0x…"` hex string
    #[serde(default, deserialize_with = "deserialize_opt_address")]
    pub start_addr: Option<u16>,
    /// Base64 module payload, deflate-compressed when prefixed `"deflate:"`
    pub data: String,
    /// Per-song entries for multi-song modules; a single song 0 when absent
    pub songs: Option<Vec<SongInfo>>,
}

/// One song within a multi-song module file
#[derive(Debug, Deserialize)]
pub struct SongInfo {
    /// Index of the song within the module
    pub number: u8,
    pub title: Option<String>,
    pub author: Option<String>,
    pub enabled: Option<bool>,
    pub streaming_safe: Option<bool>,
    pub primary_square_chan: Option<u8>,
    pub uses: Option<Vec<Tag>>,
}

/// A group of module files sharing default metadata
#[derive(Debug, Deserialize)]
pub struct GroupInfo {
    pub title: String,
    pub enabled: Option<bool>,
    pub streaming_safe: Option<bool>,
    pub primary_square_chan: Option<u8>,
    pub uses: Option<Vec<Tag>>,
    pub items: Vec<FileInfo>,
}

impl Library {
    /// Parse a library from JSON text
    pub fn from_json(json: &str) -> Result<Self, LibraryError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a library from a JSON file
    pub fn from_file<P>(path: P) -> Result<Self, FromFileError>
    where
        P: AsRef<Path>,
    {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Materialize every song in the library
    ///
    /// Decodes each file's payload into a shared [`Module`] and builds one
    /// [`Song`] per song entry (or a single song 0 for files without a
    /// `songs` list). Optional metadata resolves per-song, then per-file,
    /// then per-group, then to the defaults.
    pub fn songs(&self) -> Result<Vec<Rc<Song>>, LibraryError> {
        let mut songs = Vec::new();

        for file in &self.single {
            materialize_file(file, None, &mut songs)?;
        }

        for group in &self.groups {
            for file in &group.items {
                materialize_file(file, Some(group), &mut songs)?;
            }
        }

        Ok(songs)
    }
}

fn materialize_file(
    file: &FileInfo,
    group: Option<&GroupInfo>,
    songs: &mut Vec<Rc<Song>>,
) -> Result<(), LibraryError> {
    let base_address = file
        .start_addr
        .ok_or_else(|| LibraryError::MissingStartAddress {
            title: file.title.clone(),
        })?;

    let data = decode_payload(&file.data)?;
    let engine = file
        .engine
        .clone()
        .unwrap_or_else(|| Tag::new(DEFAULT_ENGINE));
    let module = Rc::new(Module::new(engine, &file.title, base_address, data));

    match &file.songs {
        None => songs.push(Rc::new(build_song(None, file, group, &module))),
        Some(infos) => {
            for info in infos {
                songs.push(Rc::new(build_song(Some(info), file, group, &module)));
            }
        }
    }

    Ok(())
}

/// Resolve song metadata: per-song, else per-file, else per-group, else default
fn build_song(
    info: Option<&SongInfo>,
    file: &FileInfo,
    group: Option<&GroupInfo>,
    module: &Rc<Module>,
) -> Song {
    let uses = info
        .and_then(|info| info.uses.as_ref())
        .or(file.uses.as_ref())
        .or_else(|| group.and_then(|group| group.uses.as_ref()))
        .map(|uses| uses.iter().cloned().collect())
        .unwrap_or_else(TagSet::new);

    Song {
        number: info.map(|info| info.number).unwrap_or(0),
        module: Some(module.clone()),
        enabled: info
            .and_then(|info| info.enabled)
            .or(file.enabled)
            .or_else(|| group.and_then(|group| group.enabled))
            .unwrap_or(true),
        streaming_safe: info
            .and_then(|info| info.streaming_safe)
            .or(file.streaming_safe)
            .or_else(|| group.and_then(|group| group.streaming_safe))
            .unwrap_or(true),
        primary_square_channel: info
            .and_then(|info| info.primary_square_chan)
            .or(file.primary_square_chan)
            .or_else(|| group.and_then(|group| group.primary_square_chan))
            .unwrap_or(0),
        uses,
        title: info
            .and_then(|info| info.title.clone())
            .unwrap_or_else(|| file.title.clone()),
        author: info
            .and_then(|info| info.author.clone())
            .or_else(|| file.author.clone()),
    }
}

/// Decode a module payload: base64, inflating when prefixed `"deflate:"`
fn decode_payload(data: &str) -> Result<Vec<u8>, LibraryError> {
    match data.strip_prefix(DEFLATE_PREFIX) {
        Some(rest) => {
            let compressed = general_purpose::STANDARD.decode(rest)?;
            let mut decoder = DeflateDecoder::new(compressed.as_slice());
            let mut bytes = Vec::new();
            decoder
                .read_to_end(&mut bytes)
                .map_err(LibraryError::Deflate)?;
            Ok(bytes)
        }
        None => Ok(general_purpose::STANDARD.decode(data)?),
    }
}

/// Accept a load address as either a JSON integer or a `"0x…"` hex string
fn deserialize_opt_address<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u16),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(address)) => Ok(Some(address)),
        Some(Raw::Str(text)) => {
            let digits = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "expected an integer or a 0x-prefixed hex string, got \"{text}\""
                    ))
                })?;
            let address = u16::from_str_radix(digits, 16).map_err(serde::de::Error::custom)?;
            Ok(Some(address))
        }
    }
}

/// Errors that might occur parsing a [`Library`] or decoding its payloads
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The library JSON did not match the expected shape
    #[error("Parsing the library JSON failed")]
    Json(#[from] serde_json::Error),

    /// A module payload was not valid base64
    #[error("Decoding a module payload failed")]
    Base64(#[from] base64::DecodeError),

    /// A `"deflate:"` payload did not inflate
    #[error("Inflating a compressed module payload failed")]
    Deflate(#[source] io::Error),

    /// Modules cannot be placed without knowing their expected load address
    #[error("Module \"{title}\" does not declare a load address")]
    MissingStartAddress { title: String },
}

/// Errors that might occur reading a [`Library`] from a file
#[derive(Debug, Error)]
pub enum FromFileError {
    #[error("Reading the library file failed")]
    File(#[from] io::Error),

    #[error("Parsing the library failed")]
    Parse(#[from] LibraryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose, Engine as _};
    use flate2::{write::DeflateEncoder, Compression};
    use std::io::Write;

    fn encode(bytes: &[u8]) -> String {
        general_purpose::STANDARD.encode(bytes)
    }

    fn encode_deflate(bytes: &[u8]) -> String {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        format!("{DEFLATE_PREFIX}{}", encode(&encoder.finish().unwrap()))
    }

    #[test]
    fn single_file_single_song() {
        let json = format!(
            r#"{{ "single": [{{ "title": "MEGA", "start_addr": "0x8001", "data": "{}" }}] }}"#,
            encode(&[1, 2, 3])
        );

        let library = Library::from_json(&json).unwrap();
        let songs = library.songs().unwrap();
        assert_eq!(songs.len(), 1);

        let song = &songs[0];
        assert_eq!(song.number, 0);
        assert_eq!(song.title, "MEGA");
        assert!(song.enabled);
        assert!(song.streaming_safe);
        assert_eq!(song.primary_square_channel, 0);

        let module = song.module.as_ref().unwrap();
        assert_eq!(module.engine, Tag::new("FT"));
        assert_eq!(module.base_address, 0x8001);
        assert_eq!(module.data(), &[1, 2, 3]);
    }

    #[test]
    fn deflate_payload() {
        let payload = vec![7; 512];
        let json = format!(
            r#"{{ "single": [{{ "title": "BIG", "start_addr": 32768, "data": "{}" }}] }}"#,
            encode_deflate(&payload)
        );

        let library = Library::from_json(&json).unwrap();
        let songs = library.songs().unwrap();
        assert_eq!(songs[0].module.as_ref().unwrap().data(), &payload[..]);
    }

    #[test]
    fn multi_song_inheritance() {
        let json = format!(
            r#"{{ "groups": [{{
                "title": "GAME",
                "streaming_safe": false,
                "uses": ["credits"],
                "items": [{{
                    "title": "SOUNDTRACK",
                    "author": "COMPOSER",
                    "primary_square_chan": 1,
                    "start_addr": 32768,
                    "data": "{}",
                    "songs": [
                        {{ "number": 0, "title": "INTRO" }},
                        {{ "number": 2, "title": "BOSS", "primary_square_chan": 0, "streaming_safe": true }}
                    ]
                }}]
            }}] }}"#,
            encode(&[0; 16])
        );

        let library = Library::from_json(&json).unwrap();
        let songs = library.songs().unwrap();
        assert_eq!(songs.len(), 2);

        let intro = &songs[0];
        assert_eq!(intro.number, 0);
        assert_eq!(intro.title, "INTRO");
        assert_eq!(intro.author.as_deref(), Some("COMPOSER"));
        assert_eq!(intro.primary_square_channel, 1);
        assert!(!intro.streaming_safe);
        assert!(intro.uses.contains(&Tag::new("CREDITS")));

        let boss = &songs[1];
        assert_eq!(boss.number, 2);
        assert_eq!(boss.primary_square_channel, 0);
        assert!(boss.streaming_safe);

        // Both songs share the one module instance
        assert!(Rc::ptr_eq(
            intro.module.as_ref().unwrap(),
            boss.module.as_ref().unwrap()
        ));
    }

    #[test]
    fn missing_start_address_fails() {
        let json = format!(
            r#"{{ "single": [{{ "title": "LOST", "data": "{}" }}] }}"#,
            encode(&[1])
        );

        let library = Library::from_json(&json).unwrap();
        assert!(matches!(
            library.songs(),
            Err(LibraryError::MissingStartAddress { title }) if title == "LOST"
        ));
    }

    #[test]
    fn bad_base64_fails() {
        let library =
            Library::from_json(r#"{ "single": [{ "title": "BAD", "start_addr": 0, "data": "!!" }] }"#)
                .unwrap();
        assert!(matches!(library.songs(), Err(LibraryError::Base64(_))));
    }
}
