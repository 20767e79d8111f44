//! Storage layer for 2K-era PS3 archive sets.
//!
//! This crate owns the physical side of an archive set: the `0A`, `0B`, ...
//! slot files in a game's `USRDIR`. It opens the table of contents, reads
//! entries, memoizes parsed containers and packages, writes modified entries
//! back through the repack engine, and reverts the set to its pristine layout.
//!
//! # Layout After the First Write
//!
//! The pristine `0A` carries the TOC followed by game data. The first repack
//! moves every slot file up one letter and writes a fresh `0A` holding only the
//! TOC. Modified entries are appended in new slot files after the pristine
//! ones; the pristine bytes are never touched, which is what makes
//! [`GameArchive::revert`] possible.
//!
//! ```text
//! pristine:  0A[TOC|data] 0B 0C 0D 0E
//! migrated:  0A[TOC] 0B[old TOC|data] 0C 0D 0E 0F 0G[mods] 0H[mods]
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use choops_formats::{NoLookup, TitleProfile};
//! use choops_storage::{GameArchive, StoreConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::new("/games/BLUS30078/USRDIR")
//!     .with_profile(TitleProfile::Choops2k8)
//!     .with_cache_dir("/tmp/choops-cache");
//! let mut archive = GameArchive::open(config, Arc::new(NoLookup)).await?;
//!
//! let id = archive.entry_by_name("loading.iff").map(|entry| entry.id);
//! if let Some(id) = id {
//!     let container = archive.container_mut(id).await?;
//!     if let Some(resource) = container.resources.first_mut() {
//!         resource.replace_segment(0, vec![0u8; 0x100])?;
//!     }
//! }
//!
//! let report = archive.repack().await?;
//! println!("relocated {} entries", report.relocated.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::cast_possible_truncation)] // Offsets are bounded by 32-bit on-disk fields
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

use std::path::PathBuf;
use thiserror::Error;

use choops_formats::archive::ArchiveError;
use choops_formats::iff::IffError;
use choops_formats::package::PackageError;

pub mod archive;
pub mod config;
pub mod repack;
pub mod revert;
pub mod slots;
pub mod snapshot;

pub use archive::GameArchive;
pub use config::StoreConfig;
pub use repack::{Placement, RepackReport, SlotPlan, plan_placements};
pub use snapshot::{ArchiveSnapshot, DiskSnapshotStore, SnapshotStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive index could not be read or written.
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Container could not be read or written.
    #[error("Container error: {0}")]
    Container(#[from] IffError),

    /// Texture package could not be read or written.
    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    /// No entry or resource with the given name or id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entry bytes do not start with the container magic.
    #[error("Entry {name} is not an IFF container")]
    NotAContainer {
        /// Entry name
        name: String,
    },

    /// A slot file could not be opened for read and write before mutation.
    #[error("Slot file {} is not accessible: {source}", path.display())]
    LockedFilesystem {
        /// File that failed the probe
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Writing failed after the archive set was partially modified.
    #[error("Write to {} failed, archive set may be inconsistent: {source}", path.display())]
    PartialWrite {
        /// File being written, renamed or removed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Package resources must have exactly two segments.
    #[error("Resource {resource} of entry {entry} has {count} segments, expected 2")]
    UnsupportedSegmentCount {
        /// Entry name
        entry: String,
        /// Resource name
        resource: String,
        /// Segments found
        count: usize,
    },

    /// The slot layout cannot represent the requested operation.
    #[error("Layout error: {0}")]
    Layout(String),

    /// Snapshot store error.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Snapshot (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether retrying the operation against the same files cannot succeed
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Archive(err) => err.is_permanent(),
            Self::Container(err) => err.is_data_corruption(),
            Self::Package(err) => err.is_data_corruption(),
            Self::NotAContainer { .. }
            | Self::UnsupportedSegmentCount { .. }
            | Self::Layout(_) => true,
            _ => false,
        }
    }

    /// Whether on-disk state may no longer match the in-memory index
    pub const fn is_partial_write(&self) -> bool {
        matches!(self, Self::PartialWrite { .. })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let locked = StorageError::LockedFilesystem {
            path: PathBuf::from("0A"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(!locked.is_permanent());
        assert!(locked.to_string().contains("0A"));

        let corrupt = StorageError::from(ArchiveError::MalformedHeader {
            magic: 0,
            expected: 0xAA00_B3BF,
        });
        assert!(corrupt.is_permanent());

        let partial = StorageError::PartialWrite {
            path: PathBuf::from("0G"),
            source: std::io::Error::other("disk full"),
        };
        assert!(partial.is_partial_write());
    }
}
