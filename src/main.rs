use std::process::ExitCode;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;

use hoard::error::HoardError;
use hoard::ui;

/// A content-addressed file hoard spread across many caves
#[derive(Debug, Parser)]
#[command(version, about, max_term_width = 80)]
struct Args {
    /// Verbosity (-v, -vv, -vvv, etc.)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// The hoard (or cave) directory to act on, instead of the working
    /// directory
    #[arg(short = 'C', long, global = true)]
    directory: Option<Utf8PathBuf>,

    #[command(subcommand)]
    subcommand: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Cave(ui::cave::Args),
    /// Create a hoard in the given directory
    Init,
    /// List registered caves and their mounts
    Remotes,
    #[command(name = "add_remote")]
    AddRemote(ui::remotes::AddArgs),
    #[command(name = "move_mounts")]
    MoveMounts(ui::move_mounts::Args),
    Clone(ui::clone::Args),
    Contents(ui::contents::Args),
    Files(ui::files::Args),
    Backups(ui::backups::Args),
    /// Sweep unreachable objects out of the store
    Gc,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            // Failed invariants get their own exit code; see the error
            // type for the distinction.
            let fatal = e
                .downcast_ref::<HoardError>()
                .is_some_and(HoardError::is_fatal_invariant);
            if fatal { ExitCode::from(3) } else { ExitCode::FAILURE }
        }
    }
}

fn run(args: Args) -> Result<()> {
    let dir = match args.directory {
        Some(dir) => dir,
        None => Utf8PathBuf::try_from(std::env::current_dir()?)?,
    };

    match args.subcommand {
        Command::Cave(cave_args) => ui::cave::run(&dir, cave_args),
        Command::Init => ui::init::run(&dir),
        Command::Remotes => ui::remotes::list(&dir),
        Command::AddRemote(add_args) => ui::remotes::add(&dir, add_args),
        Command::MoveMounts(move_args) => ui::move_mounts::run(&dir, move_args),
        Command::Clone(clone_args) => ui::clone::run(&dir, clone_args),
        Command::Contents(contents_args) => ui::contents::run(&dir, contents_args),
        Command::Files(files_args) => ui::files::run(&dir, files_args),
        Command::Backups(backups_args) => ui::backups::run(&dir, backups_args),
        Command::Gc => ui::gc::run(&dir),
    }
}

/// Set up tracing to spit messages to stderr.
fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
