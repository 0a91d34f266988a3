//! The fetcher contract: the I/O worker that materializes push plans.
//!
//! The engine never touches cave filesystems itself; it hands ops to a
//! [`Fetcher`] and applies state changes only for ops that report `Ok`.

use std::collections::HashMap;
use std::fs;
use std::io;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

use crate::file_util::safe_copy_to_file;

/// What became of one op.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Outcome {
    Ok,
    MissingSource,
    IoError(String),
}

pub trait Fetcher {
    /// Copies the file at `src_root/src_rel` to `dst_root/dst_rel`.
    fn copy(
        &mut self,
        src_root: &Utf8Path,
        src_rel: &Utf8Path,
        dst_root: &Utf8Path,
        dst_rel: &Utf8Path,
    ) -> Outcome;

    /// Deletes the file at `root/rel`.
    fn delete(&mut self, root: &Utf8Path, rel: &Utf8Path) -> Outcome;
}

/// The real deal: copies bytes between locally-mounted caves.
#[derive(Debug, Default)]
pub struct FsFetcher;

impl FsFetcher {
    fn try_copy(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
        let fh = fs::File::open(src).with_context(|| format!("Couldn't open {src}"))?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Couldn't create {parent}"))?;
        }
        safe_copy_to_file(fh, dst)
    }
}

impl Fetcher for FsFetcher {
    fn copy(
        &mut self,
        src_root: &Utf8Path,
        src_rel: &Utf8Path,
        dst_root: &Utf8Path,
        dst_rel: &Utf8Path,
    ) -> Outcome {
        let src = src_root.join(src_rel);
        let dst = dst_root.join(dst_rel);
        if !src.is_file() {
            return Outcome::MissingSource;
        }
        match Self::try_copy(&src, &dst) {
            Ok(()) => {
                debug!("copied {src} to {dst}");
                Outcome::Ok
            }
            Err(e) => Outcome::IoError(format!("{e:#}")),
        }
    }

    fn delete(&mut self, root: &Utf8Path, rel: &Utf8Path) -> Outcome {
        let path = root.join(rel);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("deleted {path}");
                Outcome::Ok
            }
            // Someone beat us to it; the goal state holds either way.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Outcome::Ok,
            Err(e) => Outcome::IoError(format!("{e}")),
        }
    }
}

/// A fetcher that moves path-addressed buffers around in memory.
///
/// Great for testing
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    pub files: HashMap<Utf8PathBuf, Vec<u8>>,
    /// Paths whose ops should report an I/O error
    pub broken: Vec<Utf8PathBuf>,
}

impl MemoryFetcher {
    fn full(root: &Utf8Path, rel: &Utf8Path) -> Utf8PathBuf {
        root.join(rel)
    }
}

impl Fetcher for MemoryFetcher {
    fn copy(
        &mut self,
        src_root: &Utf8Path,
        src_rel: &Utf8Path,
        dst_root: &Utf8Path,
        dst_rel: &Utf8Path,
    ) -> Outcome {
        let dst = Self::full(dst_root, dst_rel);
        if self.broken.contains(&dst) {
            return Outcome::IoError("simulated".to_owned());
        }
        match self.files.get(&Self::full(src_root, src_rel)) {
            Some(buf) => {
                let buf = buf.clone();
                self.files.insert(dst, buf);
                Outcome::Ok
            }
            None => Outcome::MissingSource,
        }
    }

    fn delete(&mut self, root: &Utf8Path, rel: &Utf8Path) -> Outcome {
        let path = Self::full(root, rel);
        if self.broken.contains(&path) {
            return Outcome::IoError("simulated".to_owned());
        }
        self.files.remove(&path);
        Outcome::Ok
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn memory_fetcher_moves_buffers() {
        let mut fetcher = MemoryFetcher::default();
        fetcher
            .files
            .insert("src/wat/a.file".into(), b"payload".to_vec());

        let (src, dst) = (Utf8Path::new("src"), Utf8Path::new("dst"));
        assert_eq!(
            fetcher.copy(src, Utf8Path::new("wat/a.file"), dst, Utf8Path::new("wat/a.file")),
            Outcome::Ok
        );
        assert_eq!(
            fetcher.files[Utf8Path::new("dst/wat/a.file")],
            b"payload".to_vec()
        );

        assert_eq!(
            fetcher.copy(src, Utf8Path::new("nope"), dst, Utf8Path::new("nope")),
            Outcome::MissingSource
        );

        fetcher.broken.push("dst/wat/a.file".into());
        assert!(matches!(
            fetcher.delete(dst, Utf8Path::new("wat/a.file")),
            Outcome::IoError(_)
        ));
    }

    #[test]
    fn fs_fetcher_copies_and_deletes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = Utf8PathBuf::try_from(dir.path().to_owned())?;
        let (src, dst) = (root.join("src"), root.join("dst"));
        fs::create_dir_all(src.join("wat"))?;
        fs::write(src.join("wat/a.file"), "payload")?;

        let mut fetcher = FsFetcher;
        assert_eq!(
            fetcher.copy(&src, Utf8Path::new("wat/a.file"), &dst, Utf8Path::new("wat/a.file")),
            Outcome::Ok
        );
        assert_eq!(fs::read_to_string(dst.join("wat/a.file"))?, "payload");

        assert_eq!(
            fetcher.copy(&src, Utf8Path::new("missing"), &dst, Utf8Path::new("missing")),
            Outcome::MissingSource
        );

        assert_eq!(fetcher.delete(&dst, Utf8Path::new("wat/a.file")), Outcome::Ok);
        assert!(!dst.join("wat/a.file").exists());
        // Deleting something already gone still counts.
        assert_eq!(fetcher.delete(&dst, Utf8Path::new("wat/a.file")), Outcome::Ok);
        Ok(())
    }
}
