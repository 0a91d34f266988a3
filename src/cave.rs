//! The cave side of the world: a directory of files plus a `.cave/`
//! metadata folder holding the cave's uuid and its last scan.
//!
//! The scanner is deliberately dumb: every refresh hashes every regular
//! file and produces a total tree, so a stale entry can't outlive the
//! scan that should have removed it.

use std::fs;
use std::io;
use std::io::prelude::*;

use anyhow::{Context, Result, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

use crate::error::HoardError;
use crate::file_util::atomic_write;
use crate::hashing::{HashingReader, ObjectId};
use crate::object::FileEntry;
use crate::refs::RefStore;
use crate::store::ObjectStore;
use crate::tree;

pub const META_DIR: &str = ".cave";
const UUID_FILENAME: &str = "cave.uuid";
const OBJECTS_FILENAME: &str = "cave.objects";
const CONTENTS_FILENAME: &str = "cave.contents";

#[derive(Debug)]
pub struct CaveRepo {
    pub root: Utf8PathBuf,
    pub uuid: String,
    pub objects: ObjectStore,
    refs: RefStore,
}

impl CaveRepo {
    /// Sets up `.cave/` in the given directory, minting a uuid if this is
    /// the first init. Safe to re-run.
    pub fn init(root: &Utf8Path) -> Result<Self> {
        ensure!(root.is_dir(), "folder {root} does not exist");
        let meta = root.join(META_DIR);
        if !meta.is_dir() {
            fs::create_dir(&meta).with_context(|| format!("Couldn't create {meta}"))?;
        }
        let uuid_path = meta.join(UUID_FILENAME);
        if !uuid_path.is_file() {
            let uuid = generate_uuid(root);
            debug!("Minting uuid {uuid} for {root}");
            atomic_write(&uuid_path, uuid.as_bytes())?;
        }
        Self::open(root)
    }

    /// Opens an initialized cave, or reports it as uninitialized.
    pub fn open(root: &Utf8Path) -> Result<Self> {
        let meta = root.join(META_DIR);
        let uuid_path = meta.join(UUID_FILENAME);
        if !uuid_path.is_file() {
            return Err(HoardError::UninitializedRepo(root.to_owned()).into());
        }
        let uuid = fs::read_to_string(&uuid_path)
            .with_context(|| format!("Couldn't read {uuid_path}"))?
            .trim()
            .to_owned();
        let objects = ObjectStore::open(&meta.join(OBJECTS_FILENAME))?;
        let refs = RefStore::open(&meta.join(CONTENTS_FILENAME))?;
        Ok(Self {
            root: root.to_owned(),
            uuid,
            objects,
            refs,
        })
    }

    /// The last scan's root tree, if the cave has ever been refreshed.
    pub fn scan_root(&self) -> Result<Option<ObjectId>> {
        self.refs.head()
    }

    pub fn epoch(&self) -> Result<u64> {
        Ok(self.refs.cave_state(&self.uuid)?.epoch)
    }

    /// Walks the cave and hashes every regular file,
    /// returning `(relative path, entry)` pairs sorted by path.
    pub fn scan(&self) -> Result<Vec<(Utf8PathBuf, FileEntry)>> {
        let mut files = Vec::new();
        scan_dir(&self.root, Utf8Path::new(""), &mut files)?;
        files.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(files)
    }

    /// Rescans the cave into a fresh staging tree and bumps the epoch.
    pub fn refresh(&mut self, out: &mut dyn Write) -> Result<()> {
        let files = self.scan()?;
        let count = files.len();
        let root = tree::build_sorted(&self.objects, files)?;
        debug!("Scanned {count} files in {} into {root}", self.root);

        let previous = self.refs.head()?;
        if previous == Some(root) {
            writeln!(out, "NO CHANGES")?;
        }
        let epoch = self.epoch()? + 1;
        let mut txn = self.refs.transaction()?;
        txn.set_epoch(&self.uuid, epoch)?;
        txn.set_head(root);
        txn.commit()?;

        writeln!(out, "Refresh done!")?;
        Ok(())
    }

    /// Compares the working tree against the last refresh.
    pub fn status(&self, out: &mut dyn Write) -> Result<()> {
        let on_disk = self.scan()?;
        let mut disk_dirs = std::collections::BTreeSet::new();
        for (path, _) in &on_disk {
            let mut parent = path.parent();
            while let Some(p) = parent.filter(|p| !p.as_str().is_empty()) {
                disk_dirs.insert(p.to_owned());
                parent = p.parent();
            }
        }

        let mut scanned_files = std::collections::BTreeMap::new();
        let mut scanned_dirs = std::collections::BTreeSet::new();
        tree::walk(
            &self.objects,
            self.scan_root()?,
            Utf8Path::new(""),
            &mut |path, node| {
                match node.kind {
                    crate::object::Kind::File => {
                        scanned_files.insert(path.to_owned(), self.objects.read_file(&node.id)?);
                    }
                    crate::object::Kind::Tree => {
                        scanned_dirs.insert(path.to_owned());
                    }
                }
                Ok(())
            },
        )?;

        let mut same = 0u64;
        let mut modified = 0u64;
        let mut new = 0u64;
        for (path, entry) in &on_disk {
            match scanned_files.get(path) {
                Some(scanned) if scanned == entry => same += 1,
                Some(_) => modified += 1,
                None => new += 1,
            }
        }
        let current = on_disk.len() as u64;
        let in_repo = scanned_files.len() as u64;
        let deleted = scanned_files
            .keys()
            .filter(|p| !on_disk.iter().any(|(d, _)| d == *p))
            .count() as u64;

        let dirs_same = disk_dirs.intersection(&scanned_dirs).count() as u64;
        let dirs_new = disk_dirs.difference(&scanned_dirs).count() as u64;
        let dirs_deleted = scanned_dirs.difference(&disk_dirs).count() as u64;
        let dirs_current = disk_dirs.len() as u64;
        let dirs_in_repo = scanned_dirs.len() as u64;

        let pct = |part: u64, whole: u64| {
            if whole == 0 {
                "0.0%".to_owned()
            } else {
                format!("{:.1}%", part as f64 * 100.0 / whole as f64)
            }
        };

        writeln!(out, "{}:", self.uuid)?;
        writeln!(out, "files:")?;
        writeln!(out, "    same: {same} ({})", pct(same, current))?;
        writeln!(out, "     mod: {modified} ({})", pct(modified, current))?;
        writeln!(out, "     new: {new} ({})", pct(new, current))?;
        writeln!(out, " current: {current}")?;
        writeln!(out, " in repo: {in_repo}")?;
        writeln!(out, " deleted: {deleted} ({})", pct(deleted, in_repo))?;
        writeln!(out, "dirs:")?;
        writeln!(out, "    same: {dirs_same}")?;
        writeln!(out, "     new: {dirs_new} ({})", pct(dirs_new, dirs_current))?;
        writeln!(out, " current: {dirs_current}")?;
        writeln!(out, " in repo: {dirs_in_repo}")?;
        writeln!(out, " deleted: {dirs_deleted} ({})", pct(dirs_deleted, dirs_in_repo))?;
        Ok(())
    }

    /// Dumps the staging index: one line per scanned file.
    pub fn status_index(&self, out: &mut dyn Write) -> Result<()> {
        let root = self.scan_root()?;
        writeln!(
            out,
            "{} epoch {} root {}",
            self.uuid,
            self.epoch()?,
            root.map(|r| r.short_name())
                .unwrap_or_else(|| "MISSING".to_owned())
        )?;
        tree::walk_files(&self.objects, root, Utf8Path::new(""), &mut |path, entry| {
            writeln!(out, "{} {:>8} {path}", entry.hash.short_name(), entry.size)?;
            Ok(())
        })?;
        writeln!(out, "DONE")?;
        Ok(())
    }
}

fn scan_dir(
    root: &Utf8Path,
    rel: &Utf8Path,
    files: &mut Vec<(Utf8PathBuf, FileEntry)>,
) -> Result<()> {
    let dir = root.join(rel);
    for entry in dir
        .read_dir_utf8()
        .with_context(|| format!("Couldn't read {dir}"))?
    {
        let entry = entry?;
        let name = entry.file_name();
        if name == META_DIR {
            continue;
        }
        let rel_path = rel.join(name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            scan_dir(root, &rel_path, files)?;
        } else if file_type.is_file() {
            files.push((rel_path.clone(), hash_file(entry.path())?));
            trace!("scanned {rel_path}");
        } else {
            debug!("skipping {rel_path}: neither a file nor a directory");
        }
    }
    Ok(())
}

/// Streams a file through the hasher to fingerprint it.
pub fn hash_file(path: &Utf8Path) -> Result<FileEntry> {
    let fh = fs::File::open(path).with_context(|| format!("Couldn't open {path}"))?;
    let mut reader = HashingReader::new(fh);
    let size = io::copy(&mut reader, &mut io::sink())
        .with_context(|| format!("Couldn't read {path}"))?;
    let (hash, _) = reader.finalize();
    Ok(FileEntry { hash, size })
}

fn generate_uuid(root: &Utf8Path) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default();
    let seed = format!(
        "{host}\0{}\0{}\0{root}",
        std::process::id(),
        jiff::Timestamp::now().as_nanosecond(),
    );
    let hex = ObjectId::hash(seed.as_bytes()).to_string();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_files(root: &Utf8Path, files: &[(&str, &str)]) -> Result<()> {
        for (path, contents) in files {
            let full = root.join(path);
            fs::create_dir_all(full.parent().unwrap())?;
            fs::write(&full, contents)?;
        }
        Ok(())
    }

    #[test]
    fn init_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = Utf8PathBuf::try_from(dir.path().to_owned())?;

        let first = CaveRepo::init(&root)?;
        let second = CaveRepo::init(&root)?;
        assert_eq!(first.uuid, second.uuid);
        Ok(())
    }

    #[test]
    fn uninitialized_caves_are_refused() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = Utf8PathBuf::try_from(dir.path().to_owned())?;
        let err = CaveRepo::open(&root).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HoardError>(),
            Some(HoardError::UninitializedRepo(_))
        ));
        Ok(())
    }

    #[test]
    fn refresh_scans_everything_and_bumps_the_epoch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = Utf8PathBuf::try_from(dir.path().to_owned())?;
        write_files(&root, &[("test.me.1", "gsadfs"), ("wat/test.me.2", "gsadf3dq")])?;

        let mut cave = CaveRepo::init(&root)?;
        let mut out = Vec::new();
        cave.refresh(&mut out)?;
        assert_eq!(String::from_utf8(out)?, "Refresh done!\n");
        assert_eq!(cave.epoch()?, 1);

        let scanned = cave.scan()?;
        assert_eq!(
            scanned.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
            vec!["test.me.1", "wat/test.me.2"]
        );

        // Same bytes on disk, same root.
        let root_before = cave.scan_root()?.unwrap();
        let mut out = Vec::new();
        cave.refresh(&mut out)?;
        assert_eq!(String::from_utf8(out)?, "NO CHANGES\nRefresh done!\n");
        assert_eq!(cave.scan_root()?.unwrap(), root_before);
        assert_eq!(cave.epoch()?, 2);
        Ok(())
    }

    #[test]
    fn status_counts_working_tree_changes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = Utf8PathBuf::try_from(dir.path().to_owned())?;
        write_files(
            &root,
            &[
                ("test.me.1", "gsadfs"),
                ("wat/test.me.2", "gsadf3dq"),
                ("wat/test.me.3", "afaswewfas"),
            ],
        )?;

        let mut cave = CaveRepo::init(&root)?;
        cave.refresh(&mut io::sink())?;

        fs::remove_file(root.join("wat/test.me.3"))?;
        fs::write(root.join("test.me.1"), "changed!")?;
        write_files(&root, &[("newdir/newfile.is", "lhiWFELHFE")])?;

        let mut out = Vec::new();
        cave.status(&mut out)?;
        let expected = format!(
            "{}:\n\
             files:\n\
             \x20   same: 1 (33.3%)\n\
             \x20    mod: 1 (33.3%)\n\
             \x20    new: 1 (33.3%)\n\
             \x20current: 3\n\
             \x20in repo: 3\n\
             \x20deleted: 1 (33.3%)\n\
             dirs:\n\
             \x20   same: 1\n\
             \x20    new: 1 (50.0%)\n\
             \x20current: 2\n\
             \x20in repo: 1\n\
             \x20deleted: 0 (0.0%)\n",
            cave.uuid
        );
        assert_eq!(String::from_utf8(out)?, expected);
        Ok(())
    }
}
