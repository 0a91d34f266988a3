//! The presence index: where every hoard file is, and where it's headed.
//!
//! A pure function of the refs - one tree zip per cave, no per-file
//! global scan. Rebuild it after any ref change.

use std::collections::BTreeMap;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};

use crate::hashing::ObjectId;
use crate::hoard::Hoard;
use crate::object::{FileEntry, Kind};
use crate::refs::RefSnapshot;
use crate::tree;

/// Where one cave stands with respect to one hoard path.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Status {
    /// The cave holds the file with the hash the hoard expects
    Available,
    /// The cave should fetch the file; somebody has it at this path
    Get,
    /// The cave should materialize the file, but no cave holds this path
    /// yet - the content has to come from somewhere else
    Copy,
    /// The cave holds a copy the hoard no longer wants there
    Cleanup,
}

impl Status {
    /// The single-letter form `ls` and friends print.
    pub fn letter(&self) -> char {
        match self {
            Status::Available => 'a',
            Status::Get => 'g',
            Status::Copy => 'x',
            Status::Cleanup => 'c',
        }
    }
}

/// Everything known about one hoard path.
#[derive(Debug, Default, Clone)]
pub struct Row {
    /// The file identity HEAD records, None for directories
    pub entry: Option<FileEntry>,
    /// Per-cave status, keyed by uuid
    pub statuses: BTreeMap<String, Status>,
    /// Caves holding the expected bytes (available or pending cleanup);
    /// these can serve as copy sources
    pub sources: Vec<String>,
}

impl Row {
    pub fn is_file(&self) -> bool {
        self.entry.is_some()
    }
}

#[derive(Debug, Default)]
pub struct PresenceIndex {
    /// Hoard-root-relative path to row, in path order.
    /// Directories get rows too (with no entry).
    pub rows: BTreeMap<Utf8PathBuf, Row>,
}

impl PresenceIndex {
    /// Builds the index from a consistent ref snapshot.
    pub fn build(hoard: &Hoard, snapshot: &RefSnapshot) -> Result<Self> {
        let head = snapshot.head;
        let mut rows: BTreeMap<Utf8PathBuf, Row> = BTreeMap::new();

        tree::walk(&hoard.objects, head, Utf8Path::new(""), &mut |path, node| {
            let entry = match node.kind {
                Kind::File => Some(hoard.objects.read_file(&node.id)?),
                Kind::Tree => None,
            };
            rows.insert(
                path.to_owned(),
                Row {
                    entry,
                    ..Row::default()
                },
            );
            Ok(())
        })?;

        // One zip per cave: its slice of HEAD against current and desired.
        // A subtree with the same ID on all three sides means everything
        // inside is settled; the zip short-circuits there, so those
        // files are marked available with a plain walk instead.
        let mut wants = Vec::new();
        for cave in &hoard.config.caves {
            let state = snapshot.cave(&cave.uuid);
            let head_sub = tree::subtree_id(&hoard.objects, head, cave.mount_rel())?;
            let sides = [head_sub, state.refs.current, state.refs.desired];
            if sides.iter().all(|s| *s == sides[0]) {
                mark_settled(hoard, sides[0], cave.mount_rel(), &cave.uuid, &mut rows)?;
                continue;
            }
            tree::zip(&hoard.objects, cave.mount_rel(), &sides, &mut |path, nodes| {
                let [h, cur, des] = nodes else {
                    unreachable!()
                };
                if nodes.iter().flatten().any(|n| n.kind == Kind::Tree) {
                    let all_same = nodes.iter().all(|n| *n == nodes[0]);
                    if all_same {
                        if let Some(dir) = nodes[0] {
                            mark_settled(hoard, Some(dir.id), path, &cave.uuid, &mut rows)?;
                        }
                        return Ok(tree::Visit::Skip);
                    }
                    return Ok(tree::Visit::Descend);
                }
                let Some(h) = h else {
                    // Not a hoard path (e.g. an orphan in a backup);
                    // presence doesn't track it.
                    return Ok(tree::Visit::Skip);
                };
                let Some(row) = rows.get_mut(path) else {
                    return Ok(tree::Visit::Skip);
                };
                let holds_expected = cur.is_some_and(|c| c.id == h.id);
                if holds_expected {
                    row.sources.push(cave.uuid.clone());
                }
                match (holds_expected, des.is_some()) {
                    (true, true) => {
                        row.statuses.insert(cave.uuid.clone(), Status::Available);
                    }
                    (true, false) => {
                        row.statuses.insert(cave.uuid.clone(), Status::Cleanup);
                    }
                    (false, true) => {
                        // Get or Copy - decided once every cave is in.
                        wants.push((path.to_owned(), cave.uuid.clone()));
                    }
                    (false, false) => {
                        if cur.is_some() {
                            // A stale copy nobody wants: sweep it.
                            row.statuses.insert(cave.uuid.clone(), Status::Cleanup);
                        }
                    }
                }
                Ok(tree::Visit::Skip)
            })?;
        }

        for (path, uuid) in wants {
            let Some(row) = rows.get_mut(&path) else {
                continue;
            };
            let status = if row.sources.is_empty() {
                Status::Copy
            } else {
                Status::Get
            };
            row.statuses.insert(uuid, status);
        }

        Ok(Self { rows })
    }

    /// Per-cave status at one path.
    pub fn status_at(&self, path: &Utf8Path) -> BTreeMap<String, Status> {
        self.rows
            .get(path)
            .map(|r| r.statuses.clone())
            .unwrap_or_default()
    }

    /// How many caves could serve the expected bytes for this path.
    pub fn num_sources(&self, path: &Utf8Path) -> u64 {
        self.rows.get(path).map(|r| r.sources.len() as u64).unwrap_or(0)
    }

    /// Files (not directories) under the given folder.
    pub fn count_non_deleted(&self, folder: &Utf8Path) -> u64 {
        self.files_under(folder).count() as u64
    }

    /// `(count, total size)` of the files under the given folder.
    pub fn stats_in_folder(&self, folder: &Utf8Path) -> (u64, u64) {
        self.files_under(folder).fold((0, 0), |(count, size), (_, row)| {
            (count + 1, size + row.entry.unwrap().size)
        })
    }

    fn files_under<'a>(
        &'a self,
        folder: &'a Utf8Path,
    ) -> impl Iterator<Item = (&'a Utf8PathBuf, &'a Row)> {
        self.rows
            .iter()
            .filter(move |(path, row)| row.is_file() && path.strip_prefix(folder).is_ok())
    }
}

/// Marks every file under a settled subtree as available to the cave.
fn mark_settled(
    hoard: &Hoard,
    subtree: Option<ObjectId>,
    prefix: &Utf8Path,
    uuid: &str,
    rows: &mut BTreeMap<Utf8PathBuf, Row>,
) -> Result<()> {
    tree::walk(&hoard.objects, subtree, prefix, &mut |path, node| {
        if node.kind != Kind::File {
            return Ok(());
        }
        if let Some(row) = rows.get_mut(path) {
            row.sources.push(uuid.to_owned());
            row.statuses.insert(uuid.to_owned(), Status::Available);
        }
        Ok(())
    })
}

/// Total size of everything a cave currently holds.
///
/// Walks the cave's `current` tree directly so orphans count too.
pub fn used_size(hoard: &Hoard, current: Option<ObjectId>) -> Result<u64> {
    let mut total = 0;
    tree::walk_files(&hoard.objects, current, Utf8Path::new(""), &mut |_, entry| {
        total += entry.size;
        Ok(())
    })?;
    Ok(total)
}

/// Per-cave totals for the status table.
#[derive(Debug, Default, Copy, Clone)]
pub struct CaveTally {
    pub files: [u64; 4],
    pub sizes: [u64; 4],
}

impl CaveTally {
    pub fn total_files(&self) -> u64 {
        self.files.iter().sum()
    }

    pub fn total_size(&self) -> u64 {
        self.sizes.iter().sum()
    }

    fn slot(status: Status) -> usize {
        match status {
            Status::Available => 0,
            Status::Get => 1,
            Status::Copy => 2,
            Status::Cleanup => 3,
        }
    }
}

/// Sums every cave's statuses in one pass over the index.
pub fn tally_by_cave(index: &PresenceIndex) -> BTreeMap<String, CaveTally> {
    let mut tallies: BTreeMap<String, CaveTally> = BTreeMap::new();
    for row in index.rows.values() {
        let Some(entry) = row.entry else {
            continue;
        };
        for (uuid, status) in &row.statuses {
            let tally = tallies.entry(uuid.clone()).or_default();
            let slot = CaveTally::slot(*status);
            tally.files[slot] += 1;
            tally.sizes[slot] += entry.size;
        }
    }
    tallies
}
