//! Revert to the pristine layout
//!
//! Undoes every repack: the TOC-only `0A` and all modded slot files are
//! deleted, and the pristine slot files move back down one letter. The
//! pristine bytes were never written, so the original TOC in the old `0B`
//! becomes the live TOC again.

use tokio::fs;
use tracing::{debug, info};

use crate::archive::GameArchive;
use crate::slots;
use crate::{Result, StorageError};

impl GameArchive {
    /// Restore the slot files and index to the pristine layout.
    ///
    /// Reverting a set that was never migrated only resets the in-memory
    /// state. Pending edits are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Layout`] if the pristine layout is unknown
    /// (the set was opened already migrated, without a snapshot, and its
    /// original TOC could not be read back) or the slot files do not match
    /// it, [`StorageError::LockedFilesystem`] before
    /// any mutation if a slot file is not writable, and
    /// [`StorageError::PartialWrite`] if a rename or delete fails midway.
    pub async fn revert(&mut self) -> Result<()> {
        let threshold = self.config.pristine_threshold;
        if !self.has_pristine_layout() {
            return Err(StorageError::Layout(
                "pristine layout unknown, refusing to revert".to_string(),
            ));
        }

        let dir = self.config.game_dir.clone();
        let present = slots::discover(&dir).await?;
        let Some(primary) = present.first() else {
            return Err(StorageError::NotFound(format!(
                "no slot files in {}",
                dir.display()
            )));
        };
        slots::probe_access(&present).await?;

        let pristine_count = self.pristine.slots.len();
        let primary_length = fs::metadata(primary).await?.len();
        if primary_length <= threshold {
            if present.len() <= pristine_count {
                return Err(StorageError::Layout(format!(
                    "expected at least {} slot files, found {}",
                    pristine_count + 1,
                    present.len()
                )));
            }

            info!(
                "Reverting archive {}: dropping TOC slot and {} modded slots",
                dir.display(),
                present.len() - pristine_count - 1
            );
            slots::remove(&dir, 0).await?;
            for stale in (pristine_count + 1)..present.len() {
                slots::remove(&dir, stale).await?;
            }
            for index in 1..=pristine_count {
                slots::rename(&dir, index, index - 1).await?;
            }
        } else {
            debug!("Archive {} is already pristine", dir.display());
        }

        self.index = self.pristine.clone();
        self.containers.clear();
        self.packages.clear();
        self.save_snapshot().await;

        info!(
            "Reverted archive {} to {} pristine slots",
            dir.display(),
            pristine_count
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use choops_formats::NoLookup;
    use choops_test_utils::{ArchiveSetBuilder, pattern};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_revert_refuses_unknown_pristine_layout() {
        let (dir, _) = ArchiveSetBuilder::new(0x4000)
            .entry(1, pattern(0x100, 1))
            .write_temp()
            .unwrap();

        // Every slot counts as migrated under the default threshold.
        let mut archive = GameArchive::open(StoreConfig::new(dir.path()), Arc::new(NoLookup))
            .await
            .unwrap();
        assert!(archive.is_migrated());

        let err = archive.revert().await.unwrap_err();
        assert!(matches!(err, StorageError::Layout(_)));
        assert!(dir.path().join("0A").exists());
    }

    #[tokio::test]
    async fn test_revert_pristine_set_is_noop() {
        let (dir, _) = ArchiveSetBuilder::new(0x4000)
            .entry(1, pattern(0x100, 1))
            .entry(2, pattern(0x4000, 2))
            .write_temp()
            .unwrap();
        let before = std::fs::read(dir.path().join("0A")).unwrap();

        let config = StoreConfig::new(dir.path()).with_pristine_threshold(0x800);
        let mut archive = GameArchive::open(config, Arc::new(NoLookup)).await.unwrap();
        archive.revert().await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("0A")).unwrap(), before);
        assert_eq!(archive.index(), archive.pristine());
    }
}
