//! Utilities for safely writing files.

use std::fs;
use std::io::prelude::*;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing::*;

/// Copies the reader to a new file at `to + ".part"`, then renames to `to`.
///
/// This should guarantee that `to` never contains a partial file.
pub fn safe_copy_to_file<R: Read>(mut from: R, to: &Utf8Path) -> Result<()> {
    let to_part = Utf8Path::new(to.as_str()).with_extension(match to.extension() {
        Some(ext) => format!("{ext}.part"),
        None => "part".to_owned(),
    });

    let mut to_fh = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&to_part)
        .with_context(|| format!("Couldn't open {to_part}"))?;

    std::io::copy(&mut from, &mut to_fh).with_context(|| format!("Couldn't write {to_part}"))?;
    drop(from);

    to_fh
        .sync_all()
        .with_context(|| format!("Couldn't sync {to_part}"))?;
    drop(to_fh);

    fs::rename(&to_part, to).with_context(|| format!("Couldn't rename {to_part} to {to}"))?;
    trace!("wrote {to}");
    Ok(())
}

/// Atomically replaces `to` with the given contents.
pub fn atomic_write(to: &Utf8Path, contents: &[u8]) -> Result<()> {
    safe_copy_to_file(contents, to)
}
