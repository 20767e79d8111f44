//! Configuration for archive storage

use choops_formats::TitleProfile;
use choops_formats::archive::DEFAULT_ALIGNMENT;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::{Result, StorageError};

/// Default capacity of one slot file written by the repack engine (1 GiB)
pub const DEFAULT_SLOT_CAPACITY: u64 = 0x4000_0000;

/// Default pristine threshold: a primary slot larger than this still holds
/// game data and has not been migrated (128 MiB)
pub const DEFAULT_PRISTINE_THRESHOLD: u64 = 0x10000 << 11;

/// Configuration for one archive set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the `0A`, `0B`, ... slot files
    pub game_dir: PathBuf,

    /// Title whose TOC layout is used
    pub profile: TitleProfile,

    /// Maximum bytes per slot file written by the repack engine
    pub slot_capacity: u64,

    /// Primary slot sizes above this are pristine
    pub pristine_threshold: u64,

    /// Where snapshots are stored, none to disable caching
    pub cache_dir: Option<PathBuf>,

    /// Ignore any stored snapshot and re-parse the slot files
    pub rebuild_cache: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            game_dir: PathBuf::from("."),
            profile: TitleProfile::Default,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            pristine_threshold: DEFAULT_PRISTINE_THRESHOLD,
            cache_dir: None,
            rebuild_cache: false,
        }
    }
}

impl StoreConfig {
    /// Create a configuration for the slot files in `game_dir`
    pub fn new<P: AsRef<Path>>(game_dir: P) -> Self {
        Self {
            game_dir: game_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set the title profile
    #[must_use]
    pub const fn with_profile(mut self, profile: TitleProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the slot capacity used when placing modified entries
    #[must_use]
    pub const fn with_slot_capacity(mut self, bytes: u64) -> Self {
        self.slot_capacity = bytes;
        self
    }

    /// Set the pristine threshold
    #[must_use]
    pub const fn with_pristine_threshold(mut self, bytes: u64) -> Self {
        self.pristine_threshold = bytes;
        self
    }

    /// Enable snapshot caching in `dir`
    #[must_use]
    pub fn with_cache_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Force a re-parse instead of loading a stored snapshot
    #[must_use]
    pub const fn with_rebuild_cache(mut self, rebuild: bool) -> Self {
        self.rebuild_cache = rebuild;
        self
    }

    /// Snapshot key for this archive set
    ///
    /// The title name followed by a short hash of `game_dir` as configured,
    /// so sets in different directories can share one cache directory.
    pub fn cache_key(&self) -> String {
        let digest = Sha256::digest(self.game_dir.to_string_lossy().as_bytes());
        format!("{}-{}", self.profile.name(), hex::encode(&digest[..8]))
    }

    /// Check that the capacity can hold whole alignment units
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Layout`] if the capacity is zero or not a
    /// multiple of the alignment unit.
    pub fn validate(&self) -> Result<()> {
        if self.slot_capacity == 0 || self.slot_capacity % DEFAULT_ALIGNMENT != 0 {
            return Err(StorageError::Layout(format!(
                "slot capacity {:#x} must be a non-zero multiple of {DEFAULT_ALIGNMENT:#x}",
                self.slot_capacity
            )));
        }
        Ok(())
    }
}
