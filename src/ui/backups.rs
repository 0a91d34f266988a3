use std::collections::BTreeMap;
use std::io::{self, Write};

use anyhow::Result;
use camino::Utf8Path;
use clap::{Parser, Subcommand};

use crate::config::CaveRole;
use crate::hoard::Hoard;
use crate::presence::{PresenceIndex, Status};

/// Check how well the backup caves cover the hoard
#[derive(Debug, Parser)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Copy-count histograms across the backup caves
    Health,
}

pub fn run(dir: &Utf8Path, args: Args) -> Result<()> {
    match args.command {
        Command::Health => health(dir),
    }
}

fn health(dir: &Utf8Path) -> Result<()> {
    let hoard = Hoard::open(dir)?;
    let snapshot = super::contents::snapshot_all(&hoard)?;
    let index = PresenceIndex::build(&hoard, &snapshot)?;
    let mut out = io::stdout().lock();

    let backups: Vec<&str> = hoard
        .config
        .caves
        .iter()
        .filter(|c| c.role == CaveRole::Backup)
        .map(|c| c.uuid.as_str())
        .collect();
    writeln!(out, "# backups: {}", backups.len())?;

    // How many backup caves have each file in the given set of states?
    let histogram = |wanted: &[Status]| {
        let mut buckets: BTreeMap<u64, (u64, u64)> = BTreeMap::new();
        for row in index.rows.values() {
            let Some(entry) = row.entry else {
                continue;
            };
            let count = backups
                .iter()
                .filter(|uuid| {
                    row.statuses
                        .get(**uuid)
                        .is_some_and(|s| wanted.contains(s))
                })
                .count() as u64;
            let bucket = buckets.entry(count).or_default();
            bucket.0 += 1;
            bucket.1 += entry.size;
        }
        buckets
    };

    let sections: [(&str, &[Status]); 4] = [
        (
            "scheduled",
            &[Status::Available, Status::Get, Status::Copy],
        ),
        ("available", &[Status::Available]),
        ("get_or_copy", &[Status::Get, Status::Copy]),
        ("cleanup", &[Status::Cleanup]),
    ];
    for (label, states) in sections {
        writeln!(out, "{label} count:")?;
        for (copies, (files, size)) in histogram(states) {
            writeln!(out, " {copies}: {files} files ({size})")?;
        }
    }
    writeln!(out, "DONE")?;
    Ok(())
}
