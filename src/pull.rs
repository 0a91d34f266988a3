//! Pulling a cave's refreshed scan into the hoard.
//!
//! This is the center of the design: a three-way zip of the hoard root,
//! the cave's staging tree, and its last observed state, with the
//! outcome of each leaf decided by the cave's role. All ref moves land
//! in one transaction, `HEAD` last, so a failed pull changes nothing.

use std::io::Write;

use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::*;

use crate::cancel::CancelToken;
use crate::cave::CaveRepo;
use crate::config::{CaveRecord, CaveRole, display_path};
use crate::error::HoardError;
use crate::hashing::ObjectId;
use crate::hoard::Hoard;
use crate::object::{Kind, Node, Object};
use crate::store::ObjectStore;
use crate::tree;

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Reconcile even if the cave's epoch hasn't advanced
    pub ignore_epoch: bool,
    /// Resolve hash conflicts by taking the cave's version
    pub assume_current: bool,
    /// Re-fetch files the cave lost instead of deregistering them
    pub force_fetch_local_missing: bool,
    pub cancel: CancelToken,
}

/// Merges the named cave's staging tree into the hoard.
pub fn pull(
    hoard: &mut Hoard,
    name_or_uuid: &str,
    opts: &PullOptions,
    out: &mut dyn Write,
) -> Result<()> {
    let record = hoard.resolve(name_or_uuid)?.clone();
    let cave = CaveRepo::open(&record.path)?;
    let staging = cave
        .scan_root()?
        .ok_or_else(|| anyhow!("{} has never been refreshed", record.name))?;
    let cave_epoch = cave.epoch()?;

    let uuids: Vec<String> = hoard.uuids().map(str::to_owned).collect();
    let snapshot = hoard.refs.snapshot(uuids.iter().map(String::as_str))?;
    let state = snapshot.cave(&record.uuid);

    if !opts.ignore_epoch {
        if cave_epoch <= state.epoch {
            writeln!(
                out,
                "{}",
                HoardError::StaleEpoch {
                    past: cave_epoch,
                    current: state.epoch,
                }
            )?;
            return Ok(());
        }
        if state.last_pulled == Some(staging) {
            writeln!(
                out,
                "Skipping update as staging {} is already pulled",
                staging.short_name()
            )?;
            return Ok(());
        }
    }

    import(&cave.objects, &mut hoard.objects, staging)
        .with_context(|| format!("Couldn't import staging tree from {}", record.name))?;

    let head = hoard.head()?;
    let mut merge = Merge {
        hoard: &*hoard,
        record: &record,
        opts,
        head,
        desired: snapshot
            .caves
            .iter()
            .map(|(uuid, s)| (uuid.clone(), s.refs.desired))
            .collect(),
        currents: snapshot
            .caves
            .iter()
            .map(|(uuid, s)| (uuid.clone(), s.refs.current))
            .collect(),
        content_map: None,
        removals: Vec::new(),
        dangling: Vec::new(),
        out: &mut *out,
    };

    let head_sub = tree::subtree_id(&hoard.objects, Some(head), record.mount_rel())?;
    let sides = [head_sub, Some(staging), state.refs.current];
    tree::zip(
        &hoard.objects,
        Utf8Path::new(""),
        &sides,
        &mut |path, nodes| {
            opts.cancel.check()?;
            let [h, s, c] = nodes else { unreachable!() };
            // Trees recurse; anything file-shaped is judged on its own,
            // so a file/directory mismatch reads as the file being
            // missing on the directory side.
            let file_only = |n: &Option<Node>| n.filter(|n| n.kind == Kind::File);
            if nodes.iter().flatten().any(|n| n.kind == Kind::File) {
                merge.leaf(path, file_only(h), file_only(s), file_only(c))?;
            }
            Ok(tree::Visit::Descend)
        },
    )?;

    merge.finish()?;
    let new_head = merge.head;
    let desired = std::mem::take(&mut merge.desired);
    drop(merge);

    let mut txn = hoard.refs.transaction()?;
    for (uuid, root) in &desired {
        txn.set_desired(uuid, *root)?;
    }
    txn.set_staging(&record.uuid, Some(staging))?;
    txn.set_current(&record.uuid, Some(staging))?;
    txn.record_pull(&record.uuid, cave_epoch, staging)?;
    txn.set_head(new_head);
    txn.commit()?;

    debug!(
        "Pulled {} (epoch {cave_epoch}); HEAD is {}",
        record.name,
        new_head.short_name()
    );
    writeln!(out, "Sync'ed {} to hoard!", record.name)?;
    Ok(())
}

/// Copies everything reachable from `root` out of a cave's store.
fn import(src: &ObjectStore, dst: &mut ObjectStore, root: ObjectId) -> Result<()> {
    fn copy_tree(src: &ObjectStore, txn: &crate::store::Txn, id: ObjectId) -> Result<()> {
        let tree = src.read_tree(&id)?;
        for node in tree.values() {
            match node.kind {
                Kind::Tree => copy_tree(src, txn, node.id)?,
                Kind::File => {
                    txn.put(&Object::File(src.read_file(&node.id)?))?;
                }
            }
        }
        txn.put(&Object::Tree(tree))?;
        Ok(())
    }

    let txn = dst.transaction()?;
    copy_tree(src, &txn, root)?;
    txn.commit()
}

struct Merge<'a> {
    hoard: &'a Hoard,
    record: &'a CaveRecord,
    opts: &'a PullOptions,
    head: ObjectId,
    /// Working copies of every cave's desired tree (mount-relative)
    desired: FxHashMap<String, Option<ObjectId>>,
    currents: FxHashMap<String, Option<ObjectId>>,
    /// Content hashes held somewhere, built lazily for dangling checks
    content_map: Option<FxHashSet<ObjectId>>,
    /// Deletions surface after the adds and updates
    removals: Vec<Utf8PathBuf>,
    dangling: Vec<Utf8PathBuf>,
    out: &'a mut dyn Write,
}

impl Merge<'_> {
    /// Decides one leaf of the (hoard, staging, current) zip.
    /// `path` is relative to the pulling cave's mount.
    fn leaf(
        &mut self,
        rel: &Utf8Path,
        h: Option<Node>,
        s: Option<Node>,
        c: Option<Node>,
    ) -> Result<()> {
        let hoard_rel = self.record.to_hoard_path(rel);
        let me = self.record.uuid.clone();
        let role = self.record.role;
        match (h, s) {
            // The cave brings a file the hoard doesn't know.
            (None, Some(new)) => match role {
                CaveRole::Backup => {
                    // Backups don't originate content; note the orphan.
                    writeln!(self.out, "?{}", display_path(&hoard_rel))?;
                }
                CaveRole::Incoming => {
                    writeln!(self.out, "<+{}", display_path(&hoard_rel))?;
                    self.add_to_head(&hoard_rel, new)?;
                    self.offer_to_fetchers(&hoard_rel, new, false)?;
                }
                CaveRole::Partial | CaveRole::Full => {
                    writeln!(self.out, "+{}", display_path(&hoard_rel))?;
                    self.add_to_head(&hoard_rel, new)?;
                    self.offer_to_fetchers(&hoard_rel, new, true)?;
                }
            },

            // The cave agrees with the hoard.
            (Some(known), Some(seen)) if known.id == seen.id => {
                if role == CaveRole::Incoming {
                    // Content already placed elsewhere (or on its way
                    // there): sweep this copy out.
                    if self.held_or_wanted_elsewhere(&hoard_rel, known)? {
                        writeln!(self.out, "-{}", display_path(&hoard_rel))?;
                    }
                } else if self.cleanup_pending(&hoard_rel, c)? {
                    // The hoard is waiting for this copy to go away;
                    // don't re-register it.
                } else {
                    let settled = c.is_some_and(|cur| cur.id == known.id)
                        && self.desired_contains(&hoard_rel)?;
                    if !settled {
                        writeln!(self.out, "={}", display_path(&hoard_rel))?;
                        self.set_desired(&me, &hoard_rel, Some(known))?;
                    }
                }
            }

            // The cave disagrees with the hoard.
            (Some(known), Some(seen)) => {
                let legitimate_change =
                    role == CaveRole::Incoming || c.is_some_and(|c| c.id == known.id);
                if legitimate_change {
                    writeln!(self.out, "u{}", display_path(&hoard_rel))?;
                } else if self.opts.assume_current {
                    writeln!(self.out, "RESETTING {}", display_path(&hoard_rel))?;
                } else {
                    return Err(HoardError::HashConflict {
                        path: display_path(&hoard_rel).into(),
                    }
                    .into());
                }
                self.update_head(&hoard_rel, seen)?;
            }

            // The cave lost (or dropped) a file it used to hold.
            (Some(known), None) if c.is_some() => {
                if self.opts.force_fetch_local_missing || role == CaveRole::Backup {
                    // Backups never originate deletions; schedule a
                    // re-fetch instead.
                    writeln!(self.out, "g{}", display_path(&hoard_rel))?;
                    self.set_desired(&me, &hoard_rel, Some(known))?;
                } else {
                    match role {
                        CaveRole::Incoming => {
                            // A swept (or hand-removed) staging copy.
                        }
                        CaveRole::Partial => {
                            self.removals.push(hoard_rel.clone());
                            self.set_desired(&me, &hoard_rel, None)?;
                        }
                        CaveRole::Full => {
                            // A full cave's deletions are authoritative:
                            // nobody should keep this file.
                            self.removals.push(hoard_rel.clone());
                            self.drop_desired_everywhere(&hoard_rel)?;
                        }
                        CaveRole::Backup => unreachable!(),
                    }
                    self.dangling_check(&hoard_rel, known)?;
                }
            }

            // Hoard-only files: fetch-capable caves want them.
            (Some(known), None) => {
                if self.record.fetches() && role != CaveRole::Incoming {
                    self.set_desired(&me, &hoard_rel, Some(known))?;
                }
                self.dangling_check(&hoard_rel, known)?;
            }

            (None, None) => {
                // Only the stale current side has it; the new scan
                // replaces current wholesale, so there's nothing to do.
            }
        }
        Ok(())
    }

    /// Emits deferred removals and sweeps paths nobody can supply anymore.
    fn finish(&mut self) -> Result<()> {
        for path in std::mem::take(&mut self.removals) {
            writeln!(self.out, "-{}", display_path(&path))?;
        }
        for path in std::mem::take(&mut self.dangling) {
            writeln!(self.out, "remove dangling {}", display_path(&path))?;
        }
        Ok(())
    }

    fn add_to_head(&mut self, hoard_rel: &Utf8Path, node: Node) -> Result<()> {
        self.head = tree::replace_in_root(
            &self.hoard.objects,
            &self.hoard.objects,
            self.head,
            hoard_rel,
            Some(node),
        )?;
        Ok(())
    }

    fn remove_from_head(&mut self, hoard_rel: &Utf8Path) -> Result<()> {
        self.head = tree::replace_in_root(
            &self.hoard.objects,
            &self.hoard.objects,
            self.head,
            hoard_rel,
            None,
        )?;
        Ok(())
    }

    /// Replaces the hoard's idea of a file and re-points every cave that
    /// wants it, so stale holders show up as `GET`.
    fn update_head(&mut self, hoard_rel: &Utf8Path, new: Node) -> Result<()> {
        self.add_to_head(hoard_rel, new)?;
        let me = self.record.uuid.clone();
        for cave in self.hoard.config.caves.clone() {
            let Some(rel) = cave.covers(hoard_rel).map(Utf8Path::to_owned) else {
                continue;
            };
            if cave.uuid == me {
                if self.record.role != CaveRole::Incoming {
                    self.set_desired(&me, hoard_rel, Some(new))?;
                }
                continue;
            }
            let desired = self.desired.get(&cave.uuid).copied().flatten();
            if tree::lookup(&self.hoard.objects, desired, &rel)?.is_some() {
                self.set_desired(&cave.uuid.clone(), hoard_rel, Some(new))?;
            }
        }
        Ok(())
    }

    /// Hands a new hoard file to every cave that auto-fetches under this
    /// path, and (for non-incoming contributors) to the cave itself.
    fn offer_to_fetchers(
        &mut self,
        hoard_rel: &Utf8Path,
        node: Node,
        register_self: bool,
    ) -> Result<()> {
        let me = self.record.uuid.clone();
        for cave in self.hoard.config.caves.clone() {
            if cave.covers(hoard_rel).is_none() {
                continue;
            }
            if cave.uuid == me {
                if register_self {
                    self.set_desired(&me, hoard_rel, Some(node))?;
                }
            } else if cave.fetches() && cave.role != CaveRole::Incoming {
                self.set_desired(&cave.uuid, hoard_rel, Some(node))?;
            }
        }
        Ok(())
    }

    /// Edits one cave's (mount-relative) desired tree.
    fn set_desired(&mut self, uuid: &str, hoard_rel: &Utf8Path, node: Option<Node>) -> Result<()> {
        let Some(cave) = self.hoard.config.by_uuid(uuid) else {
            return Ok(());
        };
        let Some(rel) = cave.covers(hoard_rel) else {
            return Ok(());
        };
        let root = self.desired.get(uuid).copied().flatten();
        let new_root = tree::replace(&self.hoard.objects, &self.hoard.objects, root, rel, node)?;
        self.desired.insert(uuid.to_owned(), new_root);
        Ok(())
    }

    fn drop_desired_everywhere(&mut self, hoard_rel: &Utf8Path) -> Result<()> {
        for uuid in self.desired.keys().cloned().collect::<Vec<_>>() {
            self.set_desired(&uuid, hoard_rel, None)?;
        }
        Ok(())
    }

    fn desired_contains(&self, hoard_rel: &Utf8Path) -> Result<bool> {
        let desired = self.desired.get(&self.record.uuid).copied().flatten();
        let Some(rel) = self.record.covers(hoard_rel) else {
            return Ok(false);
        };
        Ok(tree::lookup(&self.hoard.objects, desired, rel)?.is_some())
    }

    /// Is the hoard waiting for this cave's copy to be deleted?
    fn cleanup_pending(&self, hoard_rel: &Utf8Path, current: Option<Node>) -> Result<bool> {
        if current.is_none() {
            return Ok(false);
        }
        let desired = self.desired.get(&self.record.uuid).copied().flatten();
        let Some(rel) = self.record.covers(hoard_rel) else {
            return Ok(false);
        };
        Ok(tree::lookup(&self.hoard.objects, desired, rel)?.is_none())
    }

    /// Does any *other* cave hold this path's content, or want it?
    fn held_or_wanted_elsewhere(&mut self, hoard_rel: &Utf8Path, known: Node) -> Result<bool> {
        let me = self.record.uuid.clone();
        for cave in self.hoard.config.caves.clone() {
            if cave.uuid == me {
                continue;
            }
            let Some(rel) = cave.covers(hoard_rel).map(Utf8Path::to_owned) else {
                continue;
            };
            let current = self.currents.get(&cave.uuid).copied().flatten();
            if tree::lookup(&self.hoard.objects, current, &rel)?.is_some_and(|n| n.id == known.id) {
                return Ok(true);
            }
            let desired = self.desired.get(&cave.uuid).copied().flatten();
            if tree::lookup(&self.hoard.objects, desired, &rel)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// If nobody holds this file's bytes anymore, drop it from the hoard.
    fn dangling_check(&mut self, hoard_rel: &Utf8Path, known: Node) -> Result<()> {
        let entry = self.hoard.objects.read_file(&known.id)?;
        if self.held_content_hashes()?.contains(&entry.hash) {
            return Ok(());
        }
        debug!("{hoard_rel} is dangling; removing from the hoard");
        self.remove_from_head(hoard_rel)?;
        self.drop_desired_everywhere(hoard_rel)?;
        self.dangling.push(hoard_rel.to_owned());
        Ok(())
    }

    /// Content hashes present in any cave's current tree, except the
    /// pulling cave (whose new scan already speaks for itself).
    fn held_content_hashes(&mut self) -> Result<&FxHashSet<ObjectId>> {
        if self.content_map.is_none() {
            let mut held = FxHashSet::default();
            for (uuid, current) in &self.currents {
                if *uuid == self.record.uuid {
                    continue;
                }
                tree::walk_files(
                    &self.hoard.objects,
                    *current,
                    Utf8Path::new(""),
                    &mut |_, entry| {
                        held.insert(entry.hash);
                        Ok(())
                    },
                )?;
            }
            self.content_map = Some(held);
        }
        Ok(self.content_map.as_ref().unwrap())
    }
}
