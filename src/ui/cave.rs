use std::io;

use anyhow::Result;
use camino::Utf8Path;
use clap::{Parser, Subcommand};

use crate::cave::CaveRepo;

/// Commands for the cave you're standing in
#[derive(Debug, Parser)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Set up a `.cave/` folder and mint a uuid
    Init,
    /// Rescan the cave into a fresh staging tree
    Refresh,
    /// Compare the working tree to the last refresh
    Status,
    /// Dump the staging index
    #[command(name = "status_index")]
    StatusIndex,
}

pub fn run(dir: &Utf8Path, args: Args) -> Result<()> {
    let mut out = io::stdout().lock();
    match args.command {
        Command::Init => {
            CaveRepo::init(dir)?;
            println!("DONE");
            Ok(())
        }
        Command::Refresh => CaveRepo::open(dir)?.refresh(&mut out),
        Command::Status => CaveRepo::open(dir)?.status(&mut out),
        Command::StatusIndex => CaveRepo::open(dir)?.status_index(&mut out),
    }
}
