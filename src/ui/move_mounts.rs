use std::io;

use anyhow::Result;
use camino::Utf8Path;
use clap::Parser;

use crate::hoard::Hoard;
use crate::mount;

/// Remount every cave under one hoard path beneath another
#[derive(Debug, Parser)]
pub struct Args {
    from_path: String,
    to_path: String,
}

pub fn run(dir: &Utf8Path, args: Args) -> Result<()> {
    let mut hoard = Hoard::open(dir)?;
    let mut out = io::stdout().lock();
    if mount::move_mounts(&mut hoard, &args.from_path, &args.to_path, &mut out)? {
        println!("DONE");
    }
    Ok(())
}
