use anyhow::Result;
use clap::Parser;

mod import;
mod inspect;
mod utils;

#[derive(Parser)]
#[clap(
    author,
    version,
    about = "Import FamiTracker modules into NES ROM images"
)]
enum Cli {
    Inspect(inspect::InspectArgs),
    Import(import::ImportArgs),
}

fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse() {
        Cli::Inspect(args) => inspect::inspect(&args),
        Cli::Import(args) => import::import(args),
    }
}
