//! Planning and applying file movement: copies to caves that want
//! content, deletes from caves that are done with it.
//!
//! The planner does no I/O. It reads one ref snapshot, emits an ordered
//! op list (copies strictly before deletes, so content scheduled to move
//! is never lost to a failed copy), and leaves the byte-shuffling to a
//! [`Fetcher`]. The engine advances `current` refs only for ops that
//! come back `Ok`.

use std::io::Write;

use anyhow::{Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashMap;
use tracing::*;

use crate::config::{CaveRecord, CaveRole, display_path};
use crate::fetch::{Fetcher, Outcome};
use crate::hashing::ObjectId;
use crate::hoard::Hoard;
use crate::object::{Kind, Node};
use crate::refs::RefSnapshot;
use crate::tree;

/// One scheduled copy: bytes come from `(src_cave, src_rel)` and land at
/// `dst_rel` in the planned cave.
#[derive(Debug, Clone)]
pub struct CopyOp {
    pub src_cave: String,
    pub src_rel: Utf8PathBuf,
    pub dst_rel: Utf8PathBuf,
    /// The file entry the destination should end up holding
    pub node: Node,
}

#[derive(Debug, Clone)]
pub struct DeleteOp {
    pub rel: Utf8PathBuf,
    /// Incoming caves only part with content the hoard can prove is
    /// placed (or still wanted) elsewhere; checked again at apply time.
    pub guard_content: Option<ObjectId>,
}

/// Everything one cave should do, in order.
#[derive(Debug, Default, Clone)]
pub struct CavePlan {
    pub uuid: String,
    pub copies: Vec<CopyOp>,
    pub deletes: Vec<DeleteOp>,
    /// Wanted paths with no source anywhere; retried next push
    pub missing: Vec<Utf8PathBuf>,
}

#[derive(Debug, Default, Clone)]
pub struct Plan {
    pub caves: Vec<CavePlan>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.caves
            .iter()
            .all(|c| c.copies.is_empty() && c.deletes.is_empty())
    }
}

/// Plans ops for one cave, or for every registered cave.
pub fn plan(hoard: &Hoard, snapshot: &RefSnapshot, only: Option<&str>) -> Result<Plan> {
    let mut sources = ContentSources::default();
    let mut caves = Vec::new();
    for record in &hoard.config.caves {
        if only.is_some_and(|uuid| uuid != record.uuid) {
            continue;
        }
        caves.push(plan_cave(hoard, snapshot, record, &mut sources)?);
    }
    Ok(Plan { caves })
}

fn plan_cave(
    hoard: &Hoard,
    snapshot: &RefSnapshot,
    record: &CaveRecord,
    sources: &mut ContentSources,
) -> Result<CavePlan> {
    let state = snapshot.cave(&record.uuid);
    let head_sub = tree::subtree_id(&hoard.objects, snapshot.head, record.mount_rel())?;
    let mut plan = CavePlan {
        uuid: record.uuid.clone(),
        ..CavePlan::default()
    };

    let sides = [head_sub, state.refs.current, state.refs.desired];
    tree::zip(
        &hoard.objects,
        Utf8Path::new(""),
        &sides,
        &mut |rel, nodes| {
            let [h, cur, des] = nodes else { unreachable!() };
            if !nodes.iter().flatten().any(|n| n.kind == Kind::File) {
                return Ok(tree::Visit::Descend);
            }
            let file_only = |n: &Option<Node>| n.filter(|n| n.kind == Kind::File);
            let (h, cur, des) = (file_only(h), file_only(cur), file_only(des));
            let hoard_rel = record.to_hoard_path(rel);
            match (des, cur) {
                // Wanted and not (correctly) held: find a source.
                (Some(want), held) if held.map(|c| c.id) != Some(want.id) => {
                    match sources.pick(hoard, snapshot, record, &hoard_rel, want)? {
                        Some((src_cave, src_rel)) => plan.copies.push(CopyOp {
                            src_cave,
                            src_rel,
                            dst_rel: rel.to_owned(),
                            node: want,
                        }),
                        None => {
                            debug!("No source anywhere for {hoard_rel}");
                            plan.missing.push(rel.to_owned());
                        }
                    }
                }
                // Held but no longer wanted here - but only sweep copies
                // of files the hoard still tracks; orphans are left alone.
                (None, Some(held)) => {
                    if h.is_some() {
                        let guard_content = if record.role == CaveRole::Incoming {
                            Some(hoard.objects.read_file(&held.id)?.hash)
                        } else {
                            None
                        };
                        plan.deletes.push(DeleteOp {
                            rel: rel.to_owned(),
                            guard_content,
                        });
                    }
                }
                _ => {}
            }
            Ok(tree::Visit::Descend)
        },
    )?;
    Ok(plan)
}

/// Finds copy sources: same hoard path first, same content hash second.
#[derive(Default)]
struct ContentSources {
    /// content hash -> (cave uuid, cave-relative path), built lazily
    by_hash: Option<FxHashMap<ObjectId, Vec<(String, Utf8PathBuf)>>>,
}

impl ContentSources {
    fn pick(
        &mut self,
        hoard: &Hoard,
        snapshot: &RefSnapshot,
        dst: &CaveRecord,
        hoard_rel: &Utf8Path,
        want: Node,
    ) -> Result<Option<(String, Utf8PathBuf)>> {
        // Same-path sources: prefer the cave mounted closest to the file,
        // tie-break by uuid.
        let mut candidates = Vec::new();
        for cave in &hoard.config.caves {
            if cave.uuid == dst.uuid {
                continue;
            }
            let Some(rel) = cave.covers(hoard_rel) else {
                continue;
            };
            let current = snapshot.cave(&cave.uuid).refs.current;
            if tree::lookup(&hoard.objects, current, rel)?.is_some_and(|n| n.id == want.id) {
                candidates.push((rel.components().count(), cave.uuid.clone(), rel.to_owned()));
            }
        }
        candidates.sort();
        if let Some((_, uuid, rel)) = candidates.into_iter().next() {
            return Ok(Some((uuid, rel)));
        }

        // Nobody has this path; look for the bytes at any other path,
        // preferring a copy already inside the destination cave.
        let want_hash = hoard.objects.read_file(&want.id)?.hash;
        let by_hash = self.by_hash(hoard, snapshot)?;
        let Some(holders) = by_hash.get(&want_hash) else {
            return Ok(None);
        };
        let best = holders
            .iter()
            .min_by_key(|(uuid, rel)| (*uuid != dst.uuid, rel.components().count(), uuid.clone()))
            .cloned();
        Ok(best)
    }

    fn by_hash(
        &mut self,
        hoard: &Hoard,
        snapshot: &RefSnapshot,
    ) -> Result<&FxHashMap<ObjectId, Vec<(String, Utf8PathBuf)>>> {
        if self.by_hash.is_none() {
            let mut map: FxHashMap<ObjectId, Vec<(String, Utf8PathBuf)>> = FxHashMap::default();
            for cave in &hoard.config.caves {
                let current = snapshot.cave(&cave.uuid).refs.current;
                tree::walk_files(&hoard.objects, current, Utf8Path::new(""), &mut |rel, entry| {
                    map.entry(entry.hash)
                        .or_default()
                        .push((cave.uuid.clone(), rel.to_owned()));
                    Ok(())
                })?;
            }
            self.by_hash = Some(map);
        }
        Ok(self.by_hash.as_ref().unwrap())
    }
}

/// Runs a plan through the fetcher and folds the outcomes back into the
/// refs: `current` advances per successful op, and paths whose last copy
/// went away leave the hoard.
pub fn apply(
    hoard: &mut Hoard,
    plan: &Plan,
    fetcher: &mut dyn Fetcher,
    out: &mut dyn Write,
) -> Result<()> {
    let uuids: Vec<String> = hoard.uuids().map(str::to_owned).collect();
    let snapshot = hoard.refs.snapshot(uuids.iter().map(String::as_str))?;
    let mut currents: FxHashMap<String, Option<ObjectId>> = snapshot
        .caves
        .iter()
        .map(|(uuid, s)| (uuid.clone(), s.refs.current))
        .collect();
    let mut head = hoard.head()?;
    let mut desired: FxHashMap<String, Option<ObjectId>> = snapshot
        .caves
        .iter()
        .map(|(uuid, s)| (uuid.clone(), s.refs.desired))
        .collect();
    let mut failures = 0u64;

    // Copies first, across every cave, so nothing is deleted before its
    // replacement landed.
    for cave_plan in &plan.caves {
        let record = record_for(hoard, &cave_plan.uuid)?.clone();
        writeln!(out, "{}:", record.name)?;
        for op in &cave_plan.copies {
            let src = record_for(hoard, &op.src_cave)?.clone();
            match fetcher.copy(&src.path, &op.src_rel, &record.path, &op.dst_rel) {
                Outcome::Ok => {
                    let root = currents.get(&record.uuid).copied().flatten();
                    let new_root = tree::replace(
                        &hoard.objects,
                        &hoard.objects,
                        root,
                        &op.dst_rel,
                        Some(op.node),
                    )?;
                    currents.insert(record.uuid.clone(), new_root);
                    let prefix = if op.src_cave == record.uuid { "c+" } else { "+" };
                    writeln!(out, "{prefix} {}", op.dst_rel)?;
                }
                Outcome::MissingSource => {
                    failures += 1;
                    writeln!(out, "E {}", op.dst_rel)?;
                }
                Outcome::IoError(msg) => {
                    failures += 1;
                    warn!("Copy to {}:{} failed: {msg}", record.name, op.dst_rel);
                    writeln!(out, "E {}", op.dst_rel)?;
                }
            }
        }
        for rel in &cave_plan.missing {
            writeln!(out, "E {rel}")?;
        }
    }

    // Then the sweeps.
    let mut removed: Vec<(Utf8PathBuf, ObjectId)> = Vec::new();
    for cave_plan in &plan.caves {
        let record = record_for(hoard, &cave_plan.uuid)?.clone();
        writeln!(out, "{}:", record.name)?;
        for op in &cave_plan.deletes {
            if let Some(content) = op.guard_content {
                if !content_placed_elsewhere(hoard, &currents, &record.uuid, content)? {
                    debug!(
                        "Keeping {}:{} - its content isn't safe anywhere else yet",
                        record.name, op.rel
                    );
                    continue;
                }
            }
            match fetcher.delete(&record.path, &op.rel) {
                Outcome::Ok => {
                    let root = currents.get(&record.uuid).copied().flatten();
                    let held = tree::lookup(&hoard.objects, root, &op.rel)?;
                    let new_root =
                        tree::replace(&hoard.objects, &hoard.objects, root, &op.rel, None)?;
                    currents.insert(record.uuid.clone(), new_root);
                    writeln!(out, "d {}", op.rel)?;
                    if let Some(held) = held {
                        let entry = hoard.objects.read_file(&held.id)?;
                        removed.push((record.to_hoard_path(&op.rel), entry.hash));
                    }
                }
                Outcome::MissingSource => unreachable!("deletes have no source"),
                Outcome::IoError(msg) => {
                    failures += 1;
                    warn!("Delete of {}:{} failed: {msg}", record.name, op.rel);
                    writeln!(out, "E {}", op.rel)?;
                }
            }
        }
    }

    // Anything whose last physical copy just went away leaves the hoard.
    for (hoard_rel, content) in removed {
        if content_placed_anywhere(hoard, &currents, content)? {
            continue;
        }
        head = tree::replace_in_root(&hoard.objects, &hoard.objects, head, &hoard_rel, None)?;
        for cave in hoard.config.caves.clone() {
            let Some(rel) = cave.covers(&hoard_rel) else {
                continue;
            };
            let root = desired.get(&cave.uuid).copied().flatten();
            let new_root = tree::replace(&hoard.objects, &hoard.objects, root, rel, None)?;
            desired.insert(cave.uuid.clone(), new_root);
        }
        writeln!(out, "remove dangling {}", display_path(&hoard_rel))?;
    }

    if failures > 0 {
        debug!("{failures} ops failed; they'll be retried next push");
    }

    let mut txn = hoard.refs.transaction()?;
    for (uuid, root) in &currents {
        txn.set_current(uuid, *root)?;
    }
    for (uuid, root) in &desired {
        txn.set_desired(uuid, *root)?;
    }
    txn.set_head(head);
    txn.commit()?;
    Ok(())
}

fn record_for<'h>(hoard: &'h Hoard, uuid: &str) -> Result<&'h CaveRecord> {
    hoard
        .config
        .by_uuid(uuid)
        .ok_or_else(|| anyhow!("No cave {uuid} in the registry"))
}

/// Is this content hash held by some non-incoming cave other than `uuid`?
fn content_placed_elsewhere(
    hoard: &Hoard,
    currents: &FxHashMap<String, Option<ObjectId>>,
    uuid: &str,
    content: ObjectId,
) -> Result<bool> {
    for cave in &hoard.config.caves {
        if cave.uuid == uuid || cave.role == CaveRole::Incoming {
            continue;
        }
        if tree_holds_content(hoard, currents.get(&cave.uuid).copied().flatten(), content)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn content_placed_anywhere(
    hoard: &Hoard,
    currents: &FxHashMap<String, Option<ObjectId>>,
    content: ObjectId,
) -> Result<bool> {
    for root in currents.values() {
        if tree_holds_content(hoard, *root, content)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn tree_holds_content(hoard: &Hoard, root: Option<ObjectId>, content: ObjectId) -> Result<bool> {
    let mut found = false;
    tree::walk_files(&hoard.objects, root, Utf8Path::new(""), &mut |_, entry| {
        found |= entry.hash == content;
        Ok(())
    })?;
    Ok(found)
}
