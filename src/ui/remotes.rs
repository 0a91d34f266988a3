use std::collections::BTreeMap;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;

use crate::config::CaveRole;
use crate::hoard::Hoard;

/// Register an existing cave with the hoard
#[derive(Debug, Parser)]
pub struct AddArgs {
    /// The cave's directory
    remote_path: Utf8PathBuf,
    /// Display name
    name: String,
    /// Hoard-absolute directory the cave appears under
    mount_point: String,
    #[arg(long, value_enum, default_value = "partial")]
    role: CaveRole,
    #[arg(long)]
    fetch_new: bool,
}

pub fn add(dir: &Utf8Path, args: AddArgs) -> Result<()> {
    let mut hoard = Hoard::open(dir)?;
    hoard.add_remote(
        &args.remote_path,
        &args.name,
        &args.mount_point,
        args.role,
        args.fetch_new,
    )?;
    println!("DONE");
    Ok(())
}

/// List every registered cave and the mount map.
pub fn list(dir: &Utf8Path) -> Result<()> {
    let hoard = Hoard::open(dir)?;
    println!("{} total remotes.", hoard.config.caves.len());
    for cave in &hoard.config.caves {
        println!("  [{}] {} ({})", cave.name, cave.uuid, cave.role);
    }
    println!("Mounts:");
    let mut mounts: BTreeMap<&Utf8Path, Vec<&str>> = BTreeMap::new();
    for cave in &hoard.config.caves {
        mounts.entry(&cave.mount).or_default().push(&cave.name);
    }
    for (mount, names) in mounts {
        println!("  {mount} -> {}", names.join(", "));
    }
    println!("DONE");
    Ok(())
}
