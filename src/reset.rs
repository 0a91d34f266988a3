//! Editing what a cave is scheduled to hold: `get`, `reset`, and
//! `reset_with_existing`.

use std::io::Write;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

use crate::config::{CaveRecord, display_path};
use crate::hoard::Hoard;
use crate::object::{Kind, Node};
use crate::tree;

/// Marks hoard files under the cave's mount (optionally narrowed to a
/// subpath) as wanted by the cave. Prints one `+` line per newly wanted
/// file.
pub fn get(
    hoard: &mut Hoard,
    record: &CaveRecord,
    subpath: Option<&Utf8Path>,
    out: &mut dyn Write,
) -> Result<()> {
    let head = hoard.head()?;
    let mut desired = hoard.refs.cave_refs(&record.uuid)?.desired;

    let mut scope = record.mount_rel().to_owned();
    if let Some(subpath) = subpath {
        scope = scope.join(subpath);
    }
    let scope_root = tree::subtree_id(&hoard.objects, Some(head), &scope)?;
    let scope_in_cave = record
        .covers(&scope)
        .ok_or_else(|| crate::error::HoardError::PathEscape(scope.clone()))?
        .to_owned();

    tree::walk(&hoard.objects, scope_root, &scope_in_cave, &mut |rel, node| {
        if node.kind != Kind::File {
            return Ok(());
        }
        if tree::lookup(&hoard.objects, desired, rel)?.is_none() {
            desired = tree::replace(&hoard.objects, &hoard.objects, desired, rel, Some(*node))?;
            writeln!(out, "+{}", display_path(&record.to_hoard_path(rel)))?;
        }
        Ok(())
    })?;

    let txn = hoard.refs.transaction()?;
    txn.set_desired(&record.uuid, desired)?;
    txn.commit()?;
    Ok(())
}

/// Clears every pending fetch: desired drops back to what the cave
/// actually holds. Prints one `WONT_GET` line per cleared path.
pub fn reset(hoard: &mut Hoard, record: &CaveRecord, out: &mut dyn Write) -> Result<()> {
    let refs = hoard.refs.cave_refs(&record.uuid)?;
    let mut desired = refs.desired;

    let mut cleared = Vec::new();
    tree::zip(
        &hoard.objects,
        Utf8Path::new(""),
        &[refs.desired, refs.current],
        &mut |rel, nodes| {
            let [want, held] = nodes else { unreachable!() };
            if nodes.iter().flatten().all(|n| n.kind == Kind::Tree) {
                return Ok(tree::Visit::Descend);
            }
            if want.is_some_and(|w| w.kind == Kind::File)
                && held.map(|h| h.id) != want.map(|w| w.id)
            {
                cleared.push(rel.to_owned());
            }
            Ok(tree::Visit::Descend)
        },
    )?;

    for rel in &cleared {
        desired = tree::replace(&hoard.objects, &hoard.objects, desired, rel, None)?;
        writeln!(out, "WONT_GET {}", display_path(&record.to_hoard_path(rel)))?;
    }
    debug!("Cleared {} pending fetches for {}", cleared.len(), record.name);

    let txn = hoard.refs.transaction()?;
    txn.set_desired(&record.uuid, desired)?;
    txn.commit()?;
    Ok(())
}

/// Points desired at exactly the files (within the cave's mount) that
/// some cave can actually supply. Prints `RESET` for newly wanted paths
/// and `WONT_GET` for abandoned ones.
pub fn reset_with_existing(
    hoard: &mut Hoard,
    record: &CaveRecord,
    out: &mut dyn Write,
) -> Result<()> {
    let head = hoard.head()?;
    let uuids: Vec<String> = hoard.uuids().map(str::to_owned).collect();
    let snapshot = hoard.refs.snapshot(uuids.iter().map(String::as_str))?;
    let old_desired = snapshot.cave(&record.uuid).refs.desired;

    // Everything under the mount that's reachable: in HEAD, and held
    // with the expected hash by somebody.
    let head_sub = tree::subtree_id(&hoard.objects, Some(head), record.mount_rel())?;
    let mut reachable: Vec<(Utf8PathBuf, Node)> = Vec::new();
    tree::walk(&hoard.objects, head_sub, Utf8Path::new(""), &mut |rel, node| {
        if node.kind != Kind::File {
            return Ok(());
        }
        let hoard_rel = record.to_hoard_path(rel);
        for cave in &hoard.config.caves {
            let Some(cave_rel) = cave.covers(&hoard_rel) else {
                continue;
            };
            let current = snapshot.cave(&cave.uuid).refs.current;
            if tree::lookup(&hoard.objects, current, cave_rel)?.is_some_and(|n| n.id == node.id) {
                reachable.push((rel.to_owned(), *node));
                break;
            }
        }
        Ok(())
    })?;

    let entries = reachable
        .iter()
        .map(|(path, node)| Ok((path.clone(), hoard.objects.read_file(&node.id)?)))
        .collect::<Result<Vec<_>>>()?;
    let new_desired = Some(tree::build_sorted(&hoard.objects, entries)?);

    // Report the difference.
    tree::zip(
        &hoard.objects,
        Utf8Path::new(""),
        &[old_desired, new_desired],
        &mut |rel, nodes| {
            let [old, new] = nodes else { unreachable!() };
            if nodes.iter().flatten().all(|n| n.kind == Kind::Tree) {
                return Ok(tree::Visit::Descend);
            }
            let path = display_path(&record.to_hoard_path(rel));
            match (old, new) {
                (None, Some(_)) => writeln!(out, "RESET {path}")?,
                (Some(_), None) => writeln!(out, "WONT_GET {path}")?,
                (Some(o), Some(n)) if o.id != n.id => writeln!(out, "RESET {path}")?,
                _ => {}
            }
            Ok(tree::Visit::Descend)
        },
    )?;

    let txn = hoard.refs.transaction()?;
    txn.set_desired(&record.uuid, new_desired)?;
    txn.commit()?;
    Ok(())
}
