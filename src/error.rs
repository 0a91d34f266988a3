//! Typed errors for the handful of failures callers need to tell apart.
//!
//! Everything else rides along as a plain [`anyhow::Error`]; these get their
//! own variants because commands match on them (exit codes, retry policy).

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::hashing::ObjectId;

#[derive(Debug, Error)]
pub enum HoardError {
    #[error("{0} is not an initialized cave (no uuid file)")]
    UninitializedRepo(Utf8PathBuf),

    #[error("conflicting file hashes at {path}")]
    HashConflict { path: Utf8PathBuf },

    #[error("no available source for {path}")]
    MissingSource { path: Utf8PathBuf },

    #[error("{0} must be a hoard-absolute path")]
    PathEscape(Utf8PathBuf),

    #[error("requires moving files in {cave}:{subpath}")]
    MountOverlap { cave: String, subpath: Utf8PathBuf },

    #[error("Skipping update as past epoch {past} is not after hoard epoch {current}")]
    StaleEpoch { past: u64, current: u64 },

    #[error("ref points to {0} but no such object exists")]
    BrokenRef(ObjectId),
}

impl HoardError {
    /// Failed invariants get their own exit code so scripts and tests can
    /// tell them from garden-variety errors.
    pub fn is_fatal_invariant(&self) -> bool {
        matches!(
            self,
            HoardError::HashConflict { .. } | HoardError::BrokenRef(_)
        )
    }
}
