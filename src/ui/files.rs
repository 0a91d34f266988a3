use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::io::{self, Write};

use anyhow::Result;
use camino::Utf8Path;
use clap::{Parser, Subcommand};

use crate::config::display_path;
use crate::fetch::FsFetcher;
use crate::hoard::Hoard;
use crate::presence::{PresenceIndex, Status};
use crate::push;

/// Move file bytes to realize the declared state
#[derive(Debug, Parser)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Copy files into caves that want them, then sweep cleanups
    Push {
        cave: Option<String>,
        /// Push every cave (the default when none is named)
        #[arg(long)]
        all: bool,
    },
    /// Alias of push, kept for muscle memory
    #[command(name = "sync_contents")]
    SyncContents { cave: Option<String> },
    /// What every cave is waiting on
    Pending,
}

pub fn run(dir: &Utf8Path, args: Args) -> Result<()> {
    let mut out = io::stdout().lock();
    match args.command {
        Command::Push { cave, .. } | Command::SyncContents { cave } => {
            let mut hoard = Hoard::open(dir)?;
            let only = match cave {
                Some(name) => Some(hoard.resolve(&name)?.uuid.clone()),
                None => None,
            };
            let snapshot = super::contents::snapshot_all(&hoard)?;
            let plan = push::plan(&hoard, &snapshot, only.as_deref())?;
            let mut fetcher = FsFetcher;
            push::apply(&mut hoard, &plan, &mut fetcher, &mut out)?;
            writeln!(out, "DONE")?;
        }
        Command::Pending => {
            let hoard = Hoard::open(dir)?;
            let snapshot = super::contents::snapshot_all(&hoard)?;
            let index = PresenceIndex::build(&hoard, &snapshot)?;
            pending_report(&hoard, &index, None, &mut out)?;
            writeln!(out, "DONE")?;
        }
    }
    Ok(())
}

/// One section per cave: what it's waiting to get, copy, or clean up,
/// plus who can supply the gets.
pub fn pending_report(
    hoard: &Hoard,
    index: &PresenceIndex,
    only: Option<&str>,
    out: &mut dyn Write,
) -> Result<()> {
    for cave in &hoard.config.caves {
        if only.is_some_and(|uuid| uuid != cave.uuid) {
            continue;
        }
        writeln!(out, "{}:", cave.name)?;

        let with_status = |wanted: Status| {
            index
                .rows
                .iter()
                .filter(move |(_, row)| row.statuses.get(&cave.uuid) == Some(&wanted))
        };

        let mut gets: Vec<_> = with_status(Status::Get).collect();
        gets.sort_by_key(|(path, _)| (Reverse(index.num_sources(path)), (*path).clone()));
        let mut suppliers: BTreeMap<&str, u64> = BTreeMap::new();
        for (path, row) in &gets {
            writeln!(
                out,
                "TO_GET (from {}) {}",
                index.num_sources(path),
                display_path(path)
            )?;
            for source in &row.sources {
                if let Some(supplier) = hoard.config.by_uuid(source) {
                    *suppliers.entry(supplier.name.as_str()).or_default() += 1;
                }
            }
        }
        for (path, _) in with_status(Status::Copy) {
            writeln!(out, "TO_COPY {}", display_path(path))?;
        }
        for (path, _) in with_status(Status::Cleanup) {
            writeln!(out, "TO_CLEANUP {}", display_path(path))?;
        }
        for (name, count) in suppliers {
            writeln!(out, " {name} has {count} files")?;
        }
    }
    Ok(())
}
