//! The hoard registry: which caves exist, where they live on disk,
//! and what role each one plays.

use std::fmt;
use std::fs;
use std::io::prelude::*;

use anyhow::{Context, Result, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use serde_derive::{Deserialize, Serialize};

pub const CONFIG_FILENAME: &str = "hoard.config";

/// What a cave holds, out of everything under its mount point.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaveRole {
    /// A user-curated subset
    Partial,
    /// Fetches everything it sees
    Full,
    /// Receives assignments; never originates deletions
    Backup,
    /// A staging area; contents sweep out after distribution
    Incoming,
}

impl fmt::Display for CaveRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaveRole::Partial => "partial",
            CaveRole::Full => "full",
            CaveRole::Backup => "backup",
            CaveRole::Incoming => "incoming",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaveRecord {
    pub uuid: String,
    pub name: String,
    /// Where the cave lives on disk
    pub path: Utf8PathBuf,
    /// The hoard-absolute directory the cave's root appears under
    pub mount: Utf8PathBuf,
    pub role: CaveRole,
    /// Auto-extend `desired` with hoard files this cave doesn't hold yet
    #[serde(default)]
    pub fetch_new: bool,
}

impl CaveRecord {
    /// Backups are always assigned new content; other roles opt in.
    pub fn fetches(&self) -> bool {
        self.fetch_new || self.role == CaveRole::Backup
    }

    /// The mount point as a path relative to the hoard root
    /// (empty for `/`).
    pub fn mount_rel(&self) -> &Utf8Path {
        Utf8Path::new(self.mount.as_str().trim_start_matches('/'))
    }

    /// If `hoard_path` (hoard-root-relative) falls under this cave's
    /// mount, the remainder relative to the mount.
    pub fn covers<'p>(&self, hoard_path: &'p Utf8Path) -> Option<&'p Utf8Path> {
        hoard_path.strip_prefix(self.mount_rel()).ok()
    }

    /// Maps a cave-relative path back into the hoard namespace.
    pub fn to_hoard_path(&self, rel: &Utf8Path) -> Utf8PathBuf {
        self.mount_rel().join(rel)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HoardConfig {
    #[serde(default, rename = "cave")]
    pub caves: Vec<CaveRecord>,
}

impl HoardConfig {
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("Couldn't open {path}"))?;
        let config = toml::from_str(&s).with_context(|| format!("Couldn't parse {path}"))?;
        Ok(config)
    }

    /// Saves atomically: written next to the target, then renamed over it.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let serialized = toml::to_string_pretty(self)?;
        let dir = path.parent().expect("Config path has no parent");
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Couldn't open temporary config in {dir}"))?;
        tmp.write_all(serialized.as_bytes())?;
        tmp.persist(path)
            .with_context(|| format!("Couldn't persist {path}"))?;
        Ok(())
    }

    /// Finds a cave by display name, falling back to uuid.
    pub fn find(&self, name_or_uuid: &str) -> Option<&CaveRecord> {
        self.caves
            .iter()
            .find(|c| c.name == name_or_uuid)
            .or_else(|| self.caves.iter().find(|c| c.uuid == name_or_uuid))
    }

    pub fn by_uuid(&self, uuid: &str) -> Option<&CaveRecord> {
        self.caves.iter().find(|c| c.uuid == uuid)
    }

    pub fn add(&mut self, record: CaveRecord) -> Result<()> {
        ensure!(
            self.find(&record.name).is_none(),
            "A cave named {} is already registered",
            record.name
        );
        ensure!(
            self.by_uuid(&record.uuid).is_none(),
            "Cave {} is already registered",
            record.uuid
        );
        self.caves.push(record);
        Ok(())
    }
}

/// Checks that a user-supplied mount point (or other hoard path) is
/// absolute, and normalizes away any trailing slash.
pub fn normalize_hoard_path(path: &str) -> Result<Utf8PathBuf> {
    if !path.starts_with('/') {
        return Err(crate::error::HoardError::PathEscape(path.into()).into());
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        Ok(Utf8PathBuf::from("/"))
    } else {
        Ok(Utf8PathBuf::from(trimmed))
    }
}

/// Renders a hoard-root-relative path in its absolute display form.
pub fn display_path(rel: &Utf8Path) -> String {
    format!("/{rel}")
}
