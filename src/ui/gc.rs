use anyhow::Result;
use byte_unit::{Byte, UnitType};
use camino::Utf8Path;

use crate::gc::collect_garbage;
use crate::hoard::Hoard;

/// Sweep unreachable objects out of the store.
pub fn run(dir: &Utf8Path) -> Result<()> {
    let mut hoard = Hoard::open(dir)?;
    let stats = collect_garbage(&mut hoard)?;
    let freed = Byte::from_u64(stats.swept_bytes).get_appropriate_unit(UnitType::Binary);
    println!(
        "swept {} objects ({freed:.2}), kept {}",
        stats.swept, stats.kept
    );
    println!("DONE");
    Ok(())
}
