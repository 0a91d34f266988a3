use anyhow::Result;
use camino::Utf8Path;

use crate::hoard::Hoard;

/// Create a hoard in the given directory.
pub fn run(dir: &Utf8Path) -> Result<()> {
    Hoard::init(dir)?;
    println!("DONE");
    Ok(())
}
