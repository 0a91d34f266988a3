use std::io::{self, Write};

use anyhow::{Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use jiff::Timestamp;

use crate::config::display_path;
use crate::hoard::Hoard;
use crate::presence::{CaveTally, PresenceIndex, Status, tally_by_cave};
use crate::pull::{self, PullOptions};
use crate::{mount, reset};

/// Query and steer the hoard's logical contents
#[derive(Debug, Parser)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Merge caves' refreshed scans into the hoard
    Pull {
        cave: Option<String>,
        /// Pull every registered cave, in registration order
        #[arg(long)]
        all: bool,
        /// Reconcile even if the cave's epoch hasn't advanced
        #[arg(long)]
        ignore_epoch: bool,
        /// Resolve hash conflicts by taking the cave's version
        #[arg(long)]
        assume_current: bool,
        /// Re-fetch files the cave lost instead of deregistering them
        #[arg(long)]
        force_fetch_local_missing: bool,
    },
    /// Per-cave counts of where files stand
    Status {
        #[arg(long)]
        hide_time: bool,
        #[arg(long)]
        hide_disk_sizes: bool,
        #[arg(long)]
        show_empty: bool,
    },
    /// List hoard paths and their presence
    Ls {
        /// Annotate folders with the caves mounted over them
        #[arg(long)]
        show_remotes: bool,
        /// Only list paths this many components deep
        #[arg(long)]
        depth: Option<usize>,
        #[arg(long)]
        skip_folders: bool,
    },
    /// Schedule hoard files into a cave
    Get {
        cave: String,
        path: Option<Utf8PathBuf>,
    },
    /// Clear a cave's pending fetches
    Reset { cave: String },
    /// Re-point a cave's wants at whatever is actually reachable
    #[command(name = "reset_with_existing")]
    ResetWithExisting { cave: String },
    /// Virtually copy a subtree to a new hoard path
    Copy {
        from_path: String,
        to_path: String,
    },
    /// Show what one cave is waiting on
    Pending { cave: String },
}

pub fn run(dir: &Utf8Path, args: Args) -> Result<()> {
    let mut hoard = Hoard::open(dir)?;
    let mut out = io::stdout().lock();
    match args.command {
        Command::Pull {
            cave,
            all,
            ignore_epoch,
            assume_current,
            force_fetch_local_missing,
        } => {
            let caves: Vec<String> = if all {
                hoard.config.caves.iter().map(|c| c.name.clone()).collect()
            } else {
                vec![cave.ok_or_else(|| anyhow!("Give a cave to pull, or --all"))?]
            };
            let opts = PullOptions {
                ignore_epoch,
                assume_current,
                force_fetch_local_missing,
                ..PullOptions::default()
            };
            for cave in caves {
                pull::pull(&mut hoard, &cave, &opts, &mut out)?;
            }
            writeln!(out, "DONE")?;
        }
        Command::Status {
            hide_time,
            hide_disk_sizes,
            show_empty,
        } => status(&hoard, hide_time, hide_disk_sizes, show_empty, &mut out)?,
        Command::Ls {
            show_remotes,
            depth,
            skip_folders,
        } => ls(&hoard, show_remotes, depth, skip_folders, &mut out)?,
        Command::Get { cave, path } => {
            let record = hoard.resolve(&cave)?.clone();
            reset::get(&mut hoard, &record, path.as_deref(), &mut out)?;
            writeln!(out, "DONE")?;
        }
        Command::Reset { cave } => {
            let record = hoard.resolve(&cave)?.clone();
            writeln!(out, "{}:", record.name)?;
            reset::reset(&mut hoard, &record, &mut out)?;
            writeln!(out, "DONE")?;
        }
        Command::ResetWithExisting { cave } => {
            let record = hoard.resolve(&cave)?.clone();
            writeln!(out, "{}:", record.name)?;
            reset::reset_with_existing(&mut hoard, &record, &mut out)?;
            writeln!(out, "DONE")?;
        }
        Command::Copy { from_path, to_path } => {
            mount::copy_contents(&mut hoard, &from_path, &to_path, &mut out)?;
            writeln!(out, "DONE")?;
        }
        Command::Pending { cave } => {
            let uuid = hoard.resolve(&cave)?.uuid.clone();
            let snapshot = snapshot_all(&hoard)?;
            let index = PresenceIndex::build(&hoard, &snapshot)?;
            super::files::pending_report(&hoard, &index, Some(&uuid), &mut out)?;
            writeln!(out, "DONE")?;
        }
    }
    Ok(())
}

pub fn snapshot_all(hoard: &Hoard) -> Result<crate::refs::RefSnapshot> {
    let uuids: Vec<String> = hoard.uuids().map(str::to_owned).collect();
    hoard.refs.snapshot(uuids.iter().map(String::as_str))
}

fn status(
    hoard: &Hoard,
    hide_time: bool,
    hide_disk_sizes: bool,
    show_empty: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let snapshot = snapshot_all(hoard)?;
    let index = PresenceIndex::build(hoard, &snapshot)?;
    let tallies = tally_by_cave(&index);

    let mut rows: Vec<(String, Option<Timestamp>, CaveTally)> = Vec::new();
    for cave in hoard.caves_by_name() {
        let tally = tallies.get(&cave.uuid).copied().unwrap_or_default();
        if tally.total_files() == 0 && !show_empty {
            continue;
        }
        rows.push((
            cave.name.clone(),
            snapshot.cave(&cave.uuid).updated,
            tally,
        ));
    }

    let cell = |n: u64| {
        if n == 0 {
            "          ".to_owned()
        } else {
            format!("{n:>10}")
        }
    };
    let header = |label: &str, out: &mut dyn Write| -> Result<()> {
        write!(out, "|{label:<25}|")?;
        if !hide_time {
            write!(out, "{:>20}|", "updated")?;
        }
        writeln!(out, "total     |available |get       |copy      |cleanup   |")?;
        Ok(())
    };

    header("Num Files", out)?;
    for (name, updated, tally) in &rows {
        write!(out, "|{name:<25}|")?;
        if !hide_time {
            write!(out, "{:>20}|", humanize(*updated))?;
        }
        writeln!(
            out,
            "{}|{}|{}|{}|{}|",
            cell(tally.total_files()),
            cell(tally.files[0]),
            cell(tally.files[1]),
            cell(tally.files[2]),
            cell(tally.files[3]),
        )?;
    }

    if !hide_disk_sizes {
        writeln!(out)?;
        header("Size", out)?;
        for (name, updated, tally) in &rows {
            write!(out, "|{name:<25}|")?;
            if !hide_time {
                write!(out, "{:>20}|", humanize(*updated))?;
            }
            writeln!(
                out,
                "{}|{}|{}|{}|{}|",
                cell(tally.total_size()),
                cell(tally.sizes[0]),
                cell(tally.sizes[1]),
                cell(tally.sizes[2]),
                cell(tally.sizes[3]),
            )?;
        }
    }
    Ok(())
}

fn humanize(updated: Option<Timestamp>) -> String {
    let Some(updated) = updated else {
        return "never".to_owned();
    };
    let age = Timestamp::now() - updated;
    if age.get_seconds() < 300 {
        "now".to_owned()
    } else {
        updated.strftime("%F %T").to_string()
    }
}

fn ls(
    hoard: &Hoard,
    show_remotes: bool,
    depth: Option<usize>,
    skip_folders: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let snapshot = snapshot_all(hoard)?;
    let index = PresenceIndex::build(hoard, &snapshot)?;

    let remotes_suffix = |path: &Utf8Path| {
        if !show_remotes {
            return String::new();
        }
        let mut mounted: Vec<(String, String)> = hoard
            .config
            .caves
            .iter()
            .filter_map(|c| {
                c.covers(path).map(|rel| {
                    let shown = if rel.as_str().is_empty() {
                        ".".to_owned()
                    } else {
                        rel.to_string()
                    };
                    (c.name.clone(), shown)
                })
            })
            .collect();
        mounted.sort();
        if mounted.is_empty() {
            String::new()
        } else {
            let list = mounted
                .iter()
                .map(|(name, rel)| format!("({name}:{rel})"))
                .collect::<Vec<_>>()
                .join(", ");
            format!(" => {list}")
        }
    };

    if !skip_folders {
        writeln!(out, "/{}", remotes_suffix(Utf8Path::new("")))?;
    }
    for (path, row) in &index.rows {
        if depth.is_some_and(|d| path.components().count() > d) {
            continue;
        }
        if row.is_file() {
            let mut counts = [0u64; 4];
            for status in row.statuses.values() {
                let slot = match status {
                    Status::Available => 0,
                    Status::Get => 1,
                    Status::Copy => 2,
                    Status::Cleanup => 3,
                };
                counts[slot] += 1;
            }
            let shown = ['a', 'g', 'x', 'c']
                .iter()
                .zip(counts)
                .filter(|(_, n)| *n > 0)
                .map(|(letter, n)| format!("{letter}:{n}"))
                .collect::<Vec<_>>();
            if shown.is_empty() {
                writeln!(out, "{}", display_path(path))?;
            } else {
                writeln!(out, "{} = {}", display_path(path), shown.join(" "))?;
            }
        } else if !skip_folders {
            writeln!(out, "{}{}", display_path(path), remotes_suffix(path))?;
        }
    }
    writeln!(out, "DONE")?;
    Ok(())
}
