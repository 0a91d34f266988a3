use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;

use crate::hoard::Hoard;

/// Create a brand-new cave and register it at a mount point
#[derive(Debug, Parser)]
pub struct Args {
    /// Directory for the new cave (created if missing)
    to_path: Utf8PathBuf,
    /// Display name
    name: String,
    /// Hoard-absolute directory the cave appears under
    mount_at: String,
    #[arg(long)]
    fetch_new: bool,
}

pub fn run(dir: &Utf8Path, args: Args) -> Result<()> {
    let mut hoard = Hoard::open(dir)?;
    hoard.clone_cave(&args.to_path, &args.name, &args.mount_at, args.fetch_new)?;
    println!("DONE");
    Ok(())
}
