//! Remounting caves under new hoard paths, and virtual subtree copies.
//!
//! Cave refs are mount-relative, so a move only rewrites `HEAD` (one
//! subtree replace) and the registry; no file is rehashed and no per-cave
//! ref moves.

use std::io::Write;

use anyhow::{Result, bail, ensure};
use camino::Utf8Path;
use tracing::*;

use crate::config::{display_path, normalize_hoard_path};
use crate::error::HoardError;
use crate::hoard::Hoard;
use crate::object::{Kind, Node};
use crate::tree;

/// Moves every mount under `from` to sit under `to`, rewriting `HEAD`
/// as a pure rename. Returns false if no mount was affected.
pub fn move_mounts(
    hoard: &mut Hoard,
    from: &str,
    to: &str,
    out: &mut dyn Write,
) -> Result<bool> {
    let from = normalize_hoard_path(from)?;
    let to = normalize_hoard_path(to)?;
    let from_rel = Utf8Path::new(from.as_str().trim_start_matches('/')).to_owned();
    let to_rel = Utf8Path::new(to.as_str().trim_start_matches('/')).to_owned();

    let affected: Vec<String> = hoard
        .config
        .caves
        .iter()
        .filter(|c| c.mount == from || c.mount.strip_prefix(&from).is_ok())
        .map(|c| c.uuid.clone())
        .collect();
    if affected.is_empty() {
        // A move from inside some cave's mount isn't a rename anymore:
        // it would tear files out of that cave.
        for cave in &hoard.config.caves {
            if let Some(subpath) = cave.covers(&from_rel).filter(|s| !s.as_str().is_empty()) {
                return Err(HoardError::MountOverlap {
                    cave: cave.name.clone(),
                    subpath: subpath.to_owned(),
                }
                .into());
            }
        }
        writeln!(out, "No repos to move!")?;
        return Ok(false);
    }

    let head = hoard.head()?;
    let moved_subtree = tree::subtree_id(&hoard.objects, Some(head), &from_rel)?;

    writeln!(out, "Moving files and folders:")?;
    let mut dirs = Vec::new();
    tree::walk(&hoard.objects, moved_subtree, Utf8Path::new(""), &mut |path, node| {
        match node.kind {
            Kind::File => writeln!(
                out,
                "{}=>{}",
                display_path(&from_rel.join(path)),
                display_path(&to_rel.join(path))
            )?,
            Kind::Tree => dirs.push(path.to_owned()),
        }
        Ok(())
    })?;
    for dir in dirs {
        writeln!(
            out,
            "{}=>{}",
            display_path(&from_rel.join(&dir)),
            display_path(&to_rel.join(&dir))
        )?;
    }

    let mut new_head = tree::replace_in_root(&hoard.objects, &hoard.objects, head, &from_rel, None)?;
    if let Some(subtree) = moved_subtree {
        ensure!(
            tree::lookup(&hoard.objects, Some(new_head), &to_rel)?.is_none(),
            "{to} already has files"
        );
        new_head = tree::replace_in_root(
            &hoard.objects,
            &hoard.objects,
            new_head,
            &to_rel,
            Some(Node::tree(subtree)),
        )?;
    }
    let mut txn = hoard.refs.transaction()?;
    txn.set_head(new_head);
    txn.commit()?;

    writeln!(out, "Moving {} repos:", affected.len())?;
    for uuid in &affected {
        let record = hoard
            .config
            .caves
            .iter_mut()
            .find(|c| c.uuid == *uuid)
            .expect("Affected cave vanished");
        let old_mount = record.mount.clone();
        let remainder = old_mount.strip_prefix(&from).unwrap_or(Utf8Path::new(""));
        let new_mount = if remainder.as_str().is_empty() {
            to.clone()
        } else if to == "/" {
            normalize_hoard_path(&format!("/{remainder}"))?
        } else {
            to.join(remainder)
        };
        writeln!(out, "[{}] {old_mount} => {new_mount}", record.name)?;
        info!("Remounted {} from {old_mount} to {new_mount}", record.name);
        record.mount = new_mount;
    }
    hoard.save_config()?;
    Ok(true)
}

/// Adds a virtual copy of the subtree (or file) at `from` under `to`,
/// sharing object IDs; fetch-capable caves are scheduled to materialize
/// it on the next push.
pub fn copy_contents(hoard: &mut Hoard, from: &str, to: &str, out: &mut dyn Write) -> Result<()> {
    let from = normalize_hoard_path(from)?;
    let to = normalize_hoard_path(to)?;
    let from_rel = Utf8Path::new(from.as_str().trim_start_matches('/'));
    let to_rel = Utf8Path::new(to.as_str().trim_start_matches('/'));

    let head = hoard.head()?;
    let Some(node) = tree::lookup(&hoard.objects, Some(head), from_rel)? else {
        bail!("Nothing at {from} to copy");
    };
    ensure!(
        tree::lookup(&hoard.objects, Some(head), to_rel)?.is_none(),
        "{to} already exists"
    );

    let new_head =
        tree::replace_in_root(&hoard.objects, &hoard.objects, head, to_rel, Some(node))?;

    // Schedule the copies: every auto-fetching cave that covers the new
    // location wants the new files.
    let uuids: Vec<String> = hoard.uuids().map(str::to_owned).collect();
    let snapshot = hoard.refs.snapshot(uuids.iter().map(String::as_str))?;
    let mut desired: Vec<(String, Option<crate::hashing::ObjectId>)> = Vec::new();
    let mut new_files = Vec::new();
    let mut new_dirs = Vec::new();
    match node.kind {
        Kind::File => new_files.push(to_rel.to_owned()),
        Kind::Tree => {
            tree::walk(&hoard.objects, Some(node.id), Utf8Path::new(""), &mut |path, n| {
                match n.kind {
                    Kind::File => new_files.push(to_rel.join(path)),
                    Kind::Tree => new_dirs.push(to_rel.join(path)),
                }
                Ok(())
            })?;
            new_dirs.push(to_rel.to_owned());
        }
    }

    for cave in hoard.config.caves.clone() {
        if !cave.fetches() || cave.role == crate::config::CaveRole::Incoming {
            continue;
        }
        let mut root = snapshot.cave(&cave.uuid).refs.desired;
        let mut changed = false;
        for file in &new_files {
            let Some(rel) = cave.covers(file) else {
                continue;
            };
            let target = tree::lookup(&hoard.objects, Some(new_head), file)?
                .expect("Copied file vanished from the new root");
            root = tree::replace(&hoard.objects, &hoard.objects, root, rel, Some(target))?;
            changed = true;
        }
        if changed {
            desired.push((cave.uuid.clone(), root));
        }
    }

    for file in &new_files {
        writeln!(out, "c+ {}", display_path(file))?;
    }
    for dir in &new_dirs {
        writeln!(out, "c+ {}", display_path(dir))?;
    }

    let mut txn = hoard.refs.transaction()?;
    for (uuid, root) in &desired {
        txn.set_desired(uuid, *root)?;
    }
    txn.set_head(new_head);
    txn.commit()?;
    Ok(())
}
