//! Mark-and-sweep garbage collection over the object store.
//!
//! Marks everything reachable from any ref, sweeps the rest. An aborted
//! sweep leaves the store consistent - unreachable objects are always
//! safe to keep around.

use anyhow::Result;
use rustc_hash::FxHashSet;
use tracing::*;

use crate::hashing::ObjectId;
use crate::hoard::Hoard;
use crate::object::Kind;

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct SweepStats {
    pub kept: u64,
    pub swept: u64,
    pub swept_bytes: u64,
}

pub fn collect_garbage(hoard: &mut Hoard) -> Result<SweepStats> {
    let uuids: Vec<String> = hoard.uuids().map(str::to_owned).collect();
    let snapshot = hoard.refs.snapshot(uuids.iter().map(String::as_str))?;

    let mut marked = FxHashSet::default();
    let mut roots: Vec<ObjectId> = snapshot.head.into_iter().collect();
    for state in snapshot.caves.values() {
        roots.extend(state.refs.current);
        roots.extend(state.refs.staging);
        roots.extend(state.refs.desired);
    }
    for root in roots {
        mark(hoard, root, &mut marked)?;
    }
    debug!("{} objects reachable", marked.len());

    let mut stats = SweepStats::default();
    let mut doomed = Vec::new();
    for (id, size) in hoard.objects.ids_and_sizes()? {
        if marked.contains(&id) {
            stats.kept += 1;
        } else {
            stats.swept += 1;
            stats.swept_bytes += size;
            doomed.push(id);
        }
    }
    hoard.objects.remove(&doomed)?;
    info!(
        "Swept {} objects ({} bytes); {} kept",
        stats.swept, stats.swept_bytes, stats.kept
    );
    Ok(stats)
}

fn mark(hoard: &Hoard, id: ObjectId, marked: &mut FxHashSet<ObjectId>) -> Result<()> {
    if !marked.insert(id) {
        return Ok(());
    }
    let tree = hoard.objects.read_tree(&id)?;
    for node in tree.values() {
        match node.kind {
            Kind::Tree => mark(hoard, node.id, marked)?,
            Kind::File => {
                marked.insert(node.id);
            }
        }
    }
    Ok(())
}
