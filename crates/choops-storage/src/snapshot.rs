//! Snapshot store for parsed archive indexes
//!
//! Parsing a retail TOC means reading tens of thousands of records and
//! resolving every entry. A snapshot keeps the current index together with
//! the pristine one, so a migrated set does not need its original TOC read
//! back from slot 1.
//!
//! Snapshots are not validated against the slot files on load. A stale
//! snapshot goes unnoticed until the caller forces a rebuild.

use async_trait::async_trait;
use choops_formats::archive::ArchiveIndex;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::{Result, StorageError};

/// Current and pristine index of one archive set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSnapshot {
    /// Index as last written
    pub current: ArchiveIndex,
    /// Index as first read from the untouched slot files
    pub pristine: ArchiveIndex,
}

/// Storage for archive snapshots, keyed by [`StoreConfig::cache_key`]
///
/// [`StoreConfig::cache_key`]: crate::StoreConfig::cache_key
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot stored under `key`, if any
    ///
    /// # Errors
    ///
    /// Returns error if a stored snapshot exists but cannot be decoded.
    async fn get(&self, key: &str) -> Result<Option<ArchiveSnapshot>>;

    /// Store `snapshot` under `key`, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be written.
    async fn put(&self, key: &str, snapshot: &ArchiveSnapshot) -> Result<()>;
}

/// Gzip-compressed JSON snapshots in one directory
#[derive(Debug, Clone)]
pub struct DiskSnapshotStore {
    dir: PathBuf,
}

impl DiskSnapshotStore {
    /// Store snapshots in `dir`, created on first write
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// File holding the snapshot for `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.cache"))
    }
}

#[async_trait]
impl SnapshotStore for DiskSnapshotStore {
    async fn get(&self, key: &str) -> Result<Option<ArchiveSnapshot>> {
        let path = self.path_for(key);
        let compressed = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let snapshot = serde_json::from_reader(GzDecoder::new(compressed.as_slice()))
            .map_err(|err| {
                StorageError::Cache(format!("failed to decode {}: {err}", path.display()))
            })?;
        debug!("Loaded snapshot {}", path.display());
        Ok(Some(snapshot))
    }

    async fn put(&self, key: &str, snapshot: &ArchiveSnapshot) -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, snapshot)?;
        encoder.flush()?;
        let compressed = encoder.finish()?;

        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let temp_path = path.with_extension("cache.tmp");
        fs::write(&temp_path, &compressed).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(
            "Stored snapshot {} ({} bytes)",
            path.display(),
            compressed.len()
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use choops_formats::{NoLookup, TitleProfile};
    use choops_test_utils::{ArchiveSetBuilder, pattern};

    fn index() -> ArchiveIndex {
        let (dir, _) = ArchiveSetBuilder::new(0x4000)
            .entry(7, pattern(0x900, 1))
            .write_temp()
            .unwrap();
        let bytes = std::fs::read(dir.path().join("0A")).unwrap();
        ArchiveIndex::parse_bytes(&bytes, TitleProfile::Default, &NoLookup).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskSnapshotStore::new(dir.path().join("cache"));
        let snapshot = ArchiveSnapshot {
            current: index(),
            pristine: index(),
        };

        assert!(store.get("default").await.unwrap().is_none());
        store.put("default", &snapshot).await.unwrap();
        assert!(store.path_for("default").exists());
        assert!(!store.path_for("default").with_extension("cache.tmp").exists());
        assert_eq!(store.get("default").await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskSnapshotStore::new(dir.path());
        std::fs::write(store.path_for("nba2k8"), b"not gzip").unwrap();

        let err = store.get("nba2k8").await.unwrap_err();
        assert!(matches!(err, StorageError::Cache(_)));
    }
}
