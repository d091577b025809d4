//! The `import` subcommand

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use ftrom::{
    import::{Importer, SecondaryAssignment},
    layout::RomLayout,
    library::Library,
    module::Song,
    rom::RomBuffer,
};
use std::{collections::BTreeMap, fs, path::PathBuf, rc::Rc};

/// Import songs from a library into a ROM
#[derive(Args)]
#[clap(author, version)]
pub struct ImportArgs {
    /// The ROM to patch (.nes)
    rom: PathBuf,

    /// The game layout description (JSON)
    #[clap(short, long)]
    layout: PathBuf,

    /// The song library (JSON)
    #[clap(short = 'b', long)]
    library: PathBuf,

    /// Primary song assignments, e.g. `7=OVERWORLD`
    #[clap(short, long)]
    song: Vec<String>,

    /// Secondary map assignments, e.g. `boss:0=FORTRESS`
    #[clap(short, long)]
    map: Vec<String>,

    /// Refuse songs the library marks as unsafe for streaming
    #[clap(long)]
    streaming_safe: bool,

    /// The output path for the patched ROM
    #[clap(short, long)]
    output: PathBuf,
}

pub fn import(args: ImportArgs) -> Result<()> {
    let layout: RomLayout = serde_json::from_str(
        &fs::read_to_string(&args.layout).context("Reading the layout file failed")?,
    )
    .context("Parsing the layout failed")?;

    let library = Library::from_file(&args.library).context("Reading the library failed")?;
    let songs = library.songs().context("Materializing the library failed")?;

    let mut rom = RomBuffer::from_file(&args.rom).context("Reading the ROM failed")?;

    let mut primary = vec![None; layout.num_songs];
    for assignment in &args.song {
        let (slot, title) = parse_assignment(assignment)?;
        if slot >= primary.len() {
            bail!("Slot {slot} is outside the {}-entry song map", primary.len());
        }

        let song = find_song(&songs, &title, args.streaming_safe)?;
        println!("{slot:>3} => {}", song.title);
        primary[slot] = Some(song);
    }

    let mut secondary: BTreeMap<String, SecondaryAssignment> = BTreeMap::new();
    for assignment in &args.map {
        let (name, rest) = assignment
            .split_once(':')
            .with_context(|| format!("Expected `map:slot=title`, got \"{assignment}\""))?;
        let (slot, title) = parse_assignment(rest)?;

        let song = find_song(&songs, &title, args.streaming_safe)?;
        println!("{name}:{slot} => {}", song.title);
        secondary
            .entry(name.to_owned())
            .or_insert_with(|| SecondaryAssignment {
                name: name.to_owned(),
                songs: BTreeMap::new(),
            })
            .songs
            .insert(slot, Some(song));
    }
    let secondary: Vec<_> = secondary.into_values().collect();

    Importer::new(&mut rom, &layout)
        .import(&primary, &secondary)
        .context("Importing the songs failed")?;

    rom.to_file(&args.output)
        .context("Writing the patched ROM failed")?;
    println!("Wrote {}", args.output.display().to_string().green());

    Ok(())
}

fn parse_assignment(text: &str) -> Result<(usize, String)> {
    let (slot, title) = text
        .split_once('=')
        .with_context(|| format!("Expected `slot=title`, got \"{text}\""))?;
    let slot = slot
        .trim()
        .parse()
        .with_context(|| format!("\"{slot}\" is not a slot number"))?;

    Ok((slot, title.trim().to_owned()))
}

fn find_song(songs: &[Rc<Song>], title: &str, streaming_safe: bool) -> Result<Rc<Song>> {
    let matches: Vec<_> = songs
        .iter()
        .filter(|song| song.title.eq_ignore_ascii_case(title))
        .collect();

    let song = match matches.as_slice() {
        [] => bail!("No song titled \"{title}\" in the library"),
        [song] => (*song).clone(),
        _ => bail!("Multiple songs titled \"{title}\" in the library"),
    };

    if !song.enabled {
        bail!("Song \"{}\" is disabled in the library", song.title);
    }
    if streaming_safe && !song.streaming_safe {
        bail!("Song \"{}\" is not safe for streaming", song.title);
    }

    Ok(song)
}
