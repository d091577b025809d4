//! The `inspect` subcommand

use crate::utils::iter_files;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use ftrom::library::Library;
use std::path::{Path, PathBuf};

/// Inspect song libraries for their modules and songs
#[derive(Args)]
#[clap(author, version)]
pub struct InspectArgs {
    /// The library files or folders to inspect
    paths: Vec<PathBuf>,

    /// Search folders recursively
    #[clap(short, long)]
    recursive: bool,
}

pub fn inspect(args: &InspectArgs) -> Result<()> {
    let paths = iter_files(&args.paths, args.recursive, "json");

    if let Some((last, rest)) = paths.split_last() {
        for path in rest {
            print(path)?;
            println!();
        }

        print(last)?;
    }

    Ok(())
}

fn print(path: &Path) -> Result<()> {
    let library = Library::from_file(path).context("Reading the library failed")?;
    let songs = library.songs().context("Materializing the library failed")?;

    println!("{}", path.display().to_string().bold());

    for (index, song) in songs.iter().enumerate() {
        let module = song
            .module
            .as_ref()
            .expect("library songs always have a module");

        let uses = song
            .uses
            .iter()
            .map(|tag| tag.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let line = format!(
            "{index:>3} | {:<24} | {:<16} | {:>5} bytes | sq{} | {uses}",
            song.title,
            song.author.as_deref().unwrap_or("-"),
            module.len(),
            song.primary_square_channel,
        );

        if song.enabled {
            println!("{line}");
        } else {
            println!("{}", line.dimmed());
        }
    }

    Ok(())
}
