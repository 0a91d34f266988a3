//! A hoard directory: the cave registry plus the object and ref stores.

use std::fs;

use anyhow::{Context, Result, anyhow, bail, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

use crate::cave::CaveRepo;
use crate::config::{CONFIG_FILENAME, CaveRecord, CaveRole, HoardConfig, normalize_hoard_path};
use crate::hashing::ObjectId;
use crate::object::{Object, Tree};
use crate::refs::RefStore;
use crate::store::ObjectStore;

pub const OBJECTS_FILENAME: &str = "hoard.objects";
pub const CONTENTS_FILENAME: &str = "hoard.contents";

pub struct Hoard {
    pub dir: Utf8PathBuf,
    pub config: HoardConfig,
    pub objects: ObjectStore,
    pub refs: RefStore,
}

impl Hoard {
    /// Sets up a hoard in the given directory. Safe to re-run.
    pub fn init(dir: &Utf8Path) -> Result<Self> {
        ensure!(dir.is_dir(), "folder {dir} does not exist");
        let config_path = dir.join(CONFIG_FILENAME);
        if !config_path.is_file() {
            HoardConfig::default().save(&config_path)?;
        }
        let mut hoard = Self::open(dir)?;
        if hoard.refs.head()?.is_none() {
            let empty = hoard.objects.put(&Object::Tree(Tree::new()))?;
            let mut txn = hoard.refs.transaction()?;
            txn.set_head(empty);
            txn.commit()?;
            debug!("Initialized hoard at {dir} with empty root {empty}");
        }
        Ok(hoard)
    }

    pub fn open(dir: &Utf8Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILENAME);
        if !config_path.is_file() {
            bail!("no hoard in {dir}");
        }
        let config = HoardConfig::load(&config_path)?;
        let objects = ObjectStore::open(&dir.join(OBJECTS_FILENAME))?;
        let refs = RefStore::open(&dir.join(CONTENTS_FILENAME))?;
        Ok(Self {
            dir: dir.to_owned(),
            config,
            objects,
            refs,
        })
    }

    /// The hoard root. Always present once the hoard is initialized.
    pub fn head(&self) -> Result<ObjectId> {
        self.refs
            .head()?
            .ok_or_else(|| anyhow!("Hoard at {} has no root; run init", self.dir))
    }

    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.dir.join(CONFIG_FILENAME))
    }

    pub fn resolve(&self, name_or_uuid: &str) -> Result<&CaveRecord> {
        self.config
            .find(name_or_uuid)
            .ok_or_else(|| anyhow!("No cave named {name_or_uuid}"))
    }

    pub fn open_cave(&self, record: &CaveRecord) -> Result<CaveRepo> {
        CaveRepo::open(&record.path)
    }

    /// Registers an existing, initialized cave.
    pub fn add_remote(
        &mut self,
        path: &Utf8Path,
        name: &str,
        mount: &str,
        role: CaveRole,
        fetch_new: bool,
    ) -> Result<String> {
        let cave = CaveRepo::open(path)?;
        let mount = normalize_hoard_path(mount)?;
        let record = CaveRecord {
            uuid: cave.uuid.clone(),
            name: name.to_owned(),
            path: path.to_owned(),
            mount,
            role,
            fetch_new,
        };
        info!("Registering {} ({}) at {}", record.name, record.uuid, record.mount);
        self.config.add(record)?;
        self.save_config()?;
        Ok(cave.uuid)
    }

    /// Creates a brand-new cave directory and registers it in one go.
    pub fn clone_cave(
        &mut self,
        to_path: &Utf8Path,
        name: &str,
        mount_at: &str,
        fetch_new: bool,
    ) -> Result<String> {
        if !to_path.is_dir() {
            fs::create_dir_all(to_path).with_context(|| format!("Couldn't create {to_path}"))?;
        }
        CaveRepo::init(to_path)?;
        self.add_remote(to_path, name, mount_at, CaveRole::Partial, fetch_new)
    }

    /// Registered caves, sorted by display name.
    pub fn caves_by_name(&self) -> Vec<&CaveRecord> {
        let mut caves: Vec<_> = self.config.caves.iter().collect();
        caves.sort_by(|a, b| a.name.cmp(&b.name));
        caves
    }

    pub fn uuids(&self) -> impl Iterator<Item = &str> {
        self.config.caves.iter().map(|c| c.uuid.as_str())
    }
}
